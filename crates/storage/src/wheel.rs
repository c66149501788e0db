use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::debug;

/// Geometria fixa do wheel: 60 slots de 1 s cobrem um minuto por volta.
/// TTLs maiores dão a volta e o hint dispara cedo; a expiração
/// autoritativa é sempre o `expires_at` da entrada, então um disparo
/// precoce vira no-op e o sweeper cobre o resto.
pub(crate) const WHEEL_SLOTS: usize = 60;
pub(crate) const WHEEL_TICK: Duration = Duration::from_secs(1);

/// Implementado pelo store. O wheel só dispara tentativas de remoção;
/// quem decide expiração é a entrada no shard, sob o write lock.
pub(crate) trait Expirable: Send + Sync {
    /// Remove a chave se (e somente se) ela estiver vencida agora.
    /// Retorna true se removeu.
    fn delete_if_expired(&self, key: &str) -> bool;
}

struct Slots {
    slots: Vec<HashSet<String>>,
    index: usize,
}

/// Roda de expiração aproximada: inserção O(1), custo por tick
/// proporcional ao slot corrente, independente do total de chaves.
/// Os slots guardam apenas chaves, nunca prazos: são hints.
pub(crate) struct TimeWheel {
    state: Mutex<Slots>,
    tick: Duration,
}

impl TimeWheel {
    pub fn new(slots: usize, tick: Duration) -> Self {
        Self {
            state: Mutex::new(Slots {
                slots: vec![HashSet::new(); slots],
                index: 0,
            }),
            tick,
        }
    }

    /// Registra a chave no slot correspondente ao TTL. `ttl == 0` cai no
    /// slot corrente — aceitável porque o dequeue re-verifica a expiração.
    pub fn add(&self, key: &str, ttl: Duration) {
        let mut state = self.state.lock();
        let offset = (ttl.as_millis() / self.tick.as_millis()) as usize;
        let slot = (state.index + offset) % state.slots.len();
        state.slots[slot].insert(key.to_string());
    }

    /// Avança o índice e devolve o conteúdo do novo slot corrente,
    /// esvaziando-o. O chamador processa o snapshot já sem o mutex do
    /// wheel, para nunca segurá-lo junto com um lock de shard.
    fn advance(&self) -> HashSet<String> {
        let mut state = self.state.lock();
        state.index = (state.index + 1) % state.slots.len();
        let index = state.index;
        std::mem::take(&mut state.slots[index])
    }
}

/// Loop do tick. A referência ao store é fraca: o store é dono do wheel,
/// não o contrário; se o store sumir o loop termina sozinho.
pub(crate) async fn run_wheel(
    wheel: Arc<TimeWheel>,
    store: Weak<dyn Expirable>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(wheel.tick);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let keys = wheel.advance();
                if keys.is_empty() {
                    continue;
                }
                let Some(store) = store.upgrade() else { return };
                let mut removed = 0usize;
                for key in &keys {
                    if store.delete_if_expired(key) {
                        removed += 1;
                    }
                }
                if removed > 0 {
                    debug!(hints = keys.len(), removed, "tick do wheel removeu chaves vencidas");
                }
            }
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    debug!("wheel recebeu sinal de shutdown");
                    return;
                }
            }
        }
    }
}
