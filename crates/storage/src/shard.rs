use std::collections::HashMap;

use parking_lot::RwLock;

use crate::entry::Entry;

/// Número fixo de shards. Faz parte do contrato de recuperação: o replay
/// re-hasheia cada chave para o mesmo shard em qualquer execução, então
/// mudar este valor é uma quebra de formato.
pub(crate) const NUM_SHARDS: usize = 32;

/// FNV-1a de 32 bits sobre os bytes UTF-8 da chave. Também parte do
/// contrato de recuperação: precisa ser idêntico entre execuções e
/// plataformas.
fn fnv1a_32(key: &str) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 16_777_619;
    let mut hash = OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

fn shard_index(key: &str) -> usize {
    (fnv1a_32(key) % NUM_SHARDS as u32) as usize
}

/// Mapa chave→entrada particionado em shards com locks independentes.
/// Leituras usam o lock compartilhado, escritas o exclusivo; shards
/// distintos nunca contendem entre si.
pub(crate) struct ShardMap {
    shards: [RwLock<HashMap<String, Entry>>; NUM_SHARDS],
}

impl ShardMap {
    pub fn new() -> Self {
        Self {
            shards: std::array::from_fn(|_| RwLock::new(HashMap::new())),
        }
    }

    fn shard(&self, key: &str) -> &RwLock<HashMap<String, Entry>> {
        &self.shards[shard_index(key)]
    }

    /// Insere ou sobrescreve a entrada da chave.
    pub fn set(&self, key: String, value: String, expires_at: i64) {
        self.shard(&key)
            .write()
            .insert(key, Entry::new(value, expires_at));
    }

    /// Busca com expiração preguiçosa: uma entrada vencida é removida na
    /// própria leitura, então chamadores nunca observam dado vencido mesmo
    /// que o wheel ainda não tenha disparado.
    pub fn get(&self, key: &str, now: i64) -> Option<String> {
        let shard = self.shard(key);
        {
            let map = shard.read();
            match map.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => {} // vencida: troca para o write lock abaixo
            }
        }
        // Re-verifica sob o write lock: um SET concorrente pode ter
        // ressuscitado a chave entre os dois locks.
        let mut map = shard.write();
        let expired = map.get(key).is_some_and(|e| e.is_expired(now));
        if expired {
            map.remove(key);
            return None;
        }
        map.get(key).map(|e| e.value.clone())
    }

    /// Remove a entrada se existir. Retorna true se removeu.
    pub fn delete(&self, key: &str) -> bool {
        self.shard(key).write().remove(key).is_some()
    }

    /// Remove a chave apenas se ela estiver vencida neste instante. O
    /// wheel e o sweeper passam por aqui: a re-verificação sob o write
    /// lock torna inofensivo um hint atrasado de uma chave re-gravada.
    pub fn delete_if_expired(&self, key: &str, now: i64) -> bool {
        let mut map = self.shard(key).write();
        let expired = map.get(key).is_some_and(|e| e.is_expired(now));
        if expired {
            map.remove(key);
        }
        expired
    }

    /// Verifica se a chave existe e não está vencida.
    pub fn contains_live(&self, key: &str, now: i64) -> bool {
        self.shard(key)
            .read()
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    /// Varre todos os shards sob read lock e coleta as chaves vencidas.
    pub fn collect_expired(&self, now: i64) -> Vec<String> {
        let mut expired = Vec::new();
        for shard in &self.shards {
            let map = shard.read();
            for (key, entry) in map.iter() {
                if entry.is_expired(now) {
                    expired.push(key.clone());
                }
            }
        }
        expired
    }

    /// Executa `f` com acesso exclusivo ao shard da chave. O store usa
    /// isso para acoplar a mutação em memória ao enfileiramento do
    /// registro no log: com os dois sob o mesmo lock, a ordem aplicada em
    /// memória é a ordem dos registros no log.
    pub fn with_write<R>(&self, key: &str, f: impl FnOnce(&mut HashMap<String, Entry>) -> R) -> R {
        let mut map = self.shard(key).write();
        f(&mut map)
    }

    /// Número total de entradas (inclui vencidas ainda não coletadas).
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::epoch_secs;

    #[test]
    fn fnv1a_published_vectors() {
        // vetores de teste clássicos do FNV-1a 32 bits
        assert_eq!(fnv1a_32(""), 0x811c_9dc5);
        assert_eq!(fnv1a_32("a"), 0xe40c_292c);
        assert_eq!(fnv1a_32("foobar"), 0xbf9c_f968);
    }

    #[test]
    fn shard_index_is_stable() {
        // valores fixos: mudar o hash ou NUM_SHARDS quebra o formato
        assert_eq!(shard_index(""), 5);
        assert_eq!(shard_index("a"), 12);
        assert_eq!(shard_index("foobar"), 8);

        for key in ["", "a", "foobar", "user:1", "çã"] {
            assert_eq!(shard_index(key), shard_index(key));
            assert!(shard_index(key) < NUM_SHARDS);
        }
    }

    #[test]
    fn set_get_overwrite() {
        let shards = ShardMap::new();
        let now = epoch_secs();
        shards.set("k".into(), "v1".into(), 0);
        assert_eq!(shards.get("k", now), Some("v1".into()));

        shards.set("k".into(), "v2".into(), 0);
        assert_eq!(shards.get("k", now), Some("v2".into()));
        assert_eq!(shards.len(), 1);
    }

    #[test]
    fn get_missing() {
        let shards = ShardMap::new();
        assert_eq!(shards.get("missing", epoch_secs()), None);
    }

    #[test]
    fn lazy_expiry_removes_on_read() {
        let shards = ShardMap::new();
        let now = epoch_secs();
        shards.set("k".into(), "v".into(), now - 10);

        assert_eq!(shards.get("k", now), None);
        // a leitura removeu a entrada, não só escondeu
        assert_eq!(shards.len(), 0);
    }

    #[test]
    fn entry_at_deadline_still_readable() {
        let shards = ShardMap::new();
        let now = epoch_secs();
        shards.set("k".into(), "v".into(), now);
        // expira estritamente depois do deadline
        assert_eq!(shards.get("k", now), Some("v".into()));
    }

    #[test]
    fn delete_present_and_absent() {
        let shards = ShardMap::new();
        shards.set("k".into(), "v".into(), 0);
        assert!(shards.delete("k"));
        assert!(!shards.delete("k"));
    }

    #[test]
    fn delete_if_expired_is_noop_on_live_entry() {
        let shards = ShardMap::new();
        let now = epoch_secs();
        shards.set("k".into(), "v".into(), now + 100);

        // hint atrasado do wheel: a entrada continua viva, nada acontece
        assert!(!shards.delete_if_expired("k", now));
        assert_eq!(shards.get("k", now), Some("v".into()));
    }

    #[test]
    fn delete_if_expired_removes_expired() {
        let shards = ShardMap::new();
        let now = epoch_secs();
        shards.set("k".into(), "v".into(), now - 1);
        assert!(shards.delete_if_expired("k", now));
        assert_eq!(shards.len(), 0);
    }

    #[test]
    fn collect_expired_finds_only_expired() {
        let shards = ShardMap::new();
        let now = epoch_secs();
        shards.set("dead1".into(), "v".into(), now - 5);
        shards.set("dead2".into(), "v".into(), now - 1);
        shards.set("live".into(), "v".into(), now + 100);
        shards.set("forever".into(), "v".into(), 0);

        let mut expired = shards.collect_expired(now);
        expired.sort();
        assert_eq!(expired, vec!["dead1".to_string(), "dead2".to_string()]);
    }

    #[test]
    fn contains_live_semantics() {
        let shards = ShardMap::new();
        let now = epoch_secs();
        shards.set("live".into(), "v".into(), 0);
        shards.set("dead".into(), "v".into(), now - 1);

        assert!(shards.contains_live("live", now));
        assert!(!shards.contains_live("dead", now));
        assert!(!shards.contains_live("missing", now));
    }

    #[test]
    fn keys_spread_across_shards() {
        let shards = ShardMap::new();
        for i in 0..1_000 {
            shards.set(format!("key:{i}"), "v".into(), 0);
        }
        assert_eq!(shards.len(), 1_000);

        let occupied = shards.shards.iter().filter(|s| !s.read().is_empty()).count();
        // com 1000 chaves, todos os 32 shards devem estar ocupados
        assert_eq!(occupied, NUM_SHARDS);
    }
}
