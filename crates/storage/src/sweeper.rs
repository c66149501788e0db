use std::collections::HashSet;
use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, warn};

use crate::entry::epoch_secs;
use crate::store::StoreInner;

/// Loop do sweeper: a rede de segurança para TTLs maiores que uma volta
/// do wheel e para hints que o wheel perdeu. Cada passe varre os shards,
/// remove o que venceu e compacta o log.
pub(crate) async fn run_sweeper(
    store: Weak<StoreInner>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(period);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let Some(store) = store.upgrade() else { return };
                sweep(&store).await;
            }
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    debug!("sweeper recebeu sinal de shutdown");
                    return;
                }
            }
        }
    }
}

/// Um passe: coleta sob read lock, re-verifica e remove sob write lock,
/// compacta o log com o conjunto final.
async fn sweep(store: &StoreInner) {
    let now = epoch_secs();

    // Fase 1: varredura só de leitura.
    let mut expired: HashSet<String> = store.shards.collect_expired(now).into_iter().collect();

    // Chaves que o wheel já removeu da memória mas cujos registros ainda
    // ocupam o log.
    expired.extend(store.take_pending_compaction());

    if expired.is_empty() {
        return;
    }

    // Fase 2, obrigatória: um SET concorrente pode ter ressuscitado uma
    // chave entre as fases. Só remove quem continua vencido, e só manda
    // para a compactação quem não está vivo agora.
    expired.retain(|key| {
        store.shards.delete_if_expired(key, now);
        !store.shards.contains_live(key, now)
    });

    if expired.is_empty() {
        return;
    }

    debug!(expired = expired.len(), "sweeper removendo chaves vencidas");

    // Fase 3: compactação do log, serializada pela fila do writer.
    match store.compact_log(expired).await {
        Some(Ok(kept)) => debug!(kept, "log compactado pelo sweeper"),
        Some(Err(e)) => warn!("compactação disparada pelo sweeper falhou: {e}"),
        None => warn!("writer do AOF indisponível, compactação pulada"),
    }
}
