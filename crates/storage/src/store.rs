use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use squall_common::StorageError;

use crate::aof::{self, AofCommand, FsyncPolicy};
use crate::entry::{Entry, epoch_secs};
use crate::record::Record;
use crate::shard::ShardMap;
use crate::sweeper;
use crate::wheel::{self, Expirable, TimeWheel, WHEEL_SLOTS, WHEEL_TICK};

/// Caminho default do log de persistência.
pub const DEFAULT_AOF_PATH: &str = "cache.aof";

/// Intervalo default entre passes do sweeper.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Opções de abertura do store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub aof_path: PathBuf,
    pub fsync: FsyncPolicy,
    pub sweep_interval: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            aof_path: PathBuf::from(DEFAULT_AOF_PATH),
            fsync: FsyncPolicy::default(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Tasks de fundo, colhidas no close.
struct BackgroundTasks {
    sweeper: JoinHandle<()>,
    wheel: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Estado compartilhado entre todos os handles do store.
pub(crate) struct StoreInner {
    pub(crate) shards: ShardMap,
    wheel: Arc<TimeWheel>,
    aof_tx: mpsc::Sender<AofCommand>,
    /// Chaves que o wheel removeu da memória e cujos registros aguardam a
    /// próxima compactação do sweeper.
    pending_compaction: Mutex<HashSet<String>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: tokio::sync::Mutex<Option<BackgroundTasks>>,
}

/// Handle para o cache. Clone é barato; todos os clones compartilham o
/// mesmo estado.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Abre o store: reconstrói o estado em memória pelo replay do log e
    /// inicia as tasks de fundo (writer do AOF, wheel, sweeper). O único
    /// erro fatal é não conseguir abrir o log para escrita.
    pub async fn open(options: StoreOptions) -> Result<Store, StorageError> {
        let shards = ShardMap::new();
        let wheel = Arc::new(TimeWheel::new(WHEEL_SLOTS, WHEEL_TICK));

        // Recuperação: replay dos registros em ordem, single-threaded.
        // SETs já vencidos não voltam; o último registro de cada chave
        // vence.
        let now = epoch_secs();
        let records = aof::read_records(&options.aof_path).await?;
        let mut applied = 0usize;
        for record in records {
            match record {
                Record::Set {
                    key,
                    value,
                    expires_at,
                } => {
                    if expires_at == 0 || expires_at > now {
                        // TTL 0 no wheel: o hint dispara no próximo giro e a
                        // re-verificação descarta; barato o suficiente
                        wheel.add(&key, Duration::ZERO);
                        shards.set(key, value, expires_at);
                        applied += 1;
                    }
                }
                Record::Del { key } => {
                    shards.delete(&key);
                    applied += 1;
                }
            }
        }
        if applied > 0 {
            info!("{applied} registros aplicados do AOF");
        }

        let (aof_tx, writer) = aof::create_aof(options.aof_path.clone(), options.fsync).await?;
        let writer_handle = tokio::spawn(writer.run());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(StoreInner {
            shards,
            wheel: wheel.clone(),
            aof_tx,
            pending_compaction: Mutex::new(HashSet::new()),
            shutdown_tx,
            tasks: tokio::sync::Mutex::new(None),
        });

        let inner_dyn: Arc<dyn Expirable> = inner.clone();
        let expirable: Weak<dyn Expirable> = Arc::downgrade(&inner_dyn);
        let wheel_handle = tokio::spawn(wheel::run_wheel(wheel, expirable, shutdown_rx.clone()));
        let sweeper_handle = tokio::spawn(sweeper::run_sweeper(
            Arc::downgrade(&inner),
            options.sweep_interval,
            shutdown_rx,
        ));

        *inner.tasks.lock().await = Some(BackgroundTasks {
            sweeper: sweeper_handle,
            wheel: wheel_handle,
            writer: writer_handle,
        });

        Ok(Store { inner })
    }

    /// Grava a chave. O slot na fila do log é reservado antes de tocar o
    /// shard (backpressure sem lock); o envio acontece sob o write lock do
    /// shard, então a ordem aplicada em memória é a ordem dos registros no
    /// log. O registro no wheel vem por último, fora de qualquer lock de
    /// shard.
    pub async fn set(&self, key: String, value: String, ttl: Duration) {
        let expires_at = if ttl > Duration::ZERO {
            epoch_secs() + ttl.as_secs() as i64
        } else {
            0
        };
        debug!(key = %key, ttl_s = ttl.as_secs(), "set");

        let record = Record::Set {
            key: key.clone(),
            value: value.clone(),
            expires_at,
        };
        let permit = match self.inner.aof_tx.reserve().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                warn!("fila do AOF fechada, gravando apenas em memória");
                None
            }
        };

        self.inner.shards.with_write(&key, |map| {
            map.insert(key.clone(), Entry::new(value, expires_at));
            if let Some(permit) = permit {
                permit.send(AofCommand::Append(record));
            }
        });

        if ttl > Duration::ZERO {
            self.inner.wheel.add(&key, ttl);
        }
    }

    /// Busca a chave. Expiração preguiçosa: uma entrada vencida some na
    /// própria leitura, mesmo que o wheel ainda não tenha disparado.
    pub fn get(&self, key: &str) -> Option<String> {
        debug!(key = %key, "get");
        self.inner.shards.get(key, epoch_secs())
    }

    /// Remove a chave e registra um DEL no log, sob o mesmo write lock.
    pub async fn delete(&self, key: &str) {
        debug!(key = %key, "delete");
        let record = Record::Del {
            key: key.to_string(),
        };
        let permit = match self.inner.aof_tx.reserve().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                warn!("fila do AOF fechada, removendo apenas da memória");
                None
            }
        };

        self.inner.shards.with_write(key, |map| {
            map.remove(key);
            if let Some(permit) = permit {
                permit.send(AofCommand::Append(record));
            }
        });
    }

    /// Número de entradas em memória (inclui vencidas ainda não varridas).
    pub fn len(&self) -> usize {
        self.inner.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encerra na ordem: sweeper → wheel → fila do log → join do writer.
    /// Idempotente: a segunda chamada é no-op.
    pub async fn close(&self) {
        let Some(tasks) = self.inner.tasks.lock().await.take() else {
            return;
        };
        let _ = self.inner.shutdown_tx.send(true);

        if let Err(e) = tasks.sweeper.await {
            warn!("sweeper terminou com erro: {e}");
        }
        if let Err(e) = tasks.wheel.await {
            warn!("wheel terminou com erro: {e}");
        }

        // Tudo que foi enfileirado antes do Shutdown ainda é gravado.
        let _ = self.inner.aof_tx.send(AofCommand::Shutdown).await;
        if let Err(e) = tasks.writer.await {
            warn!("AOF writer terminou com erro: {e}");
        }
        info!("store encerrado");
    }
}

impl StoreInner {
    pub(crate) fn take_pending_compaction(&self) -> HashSet<String> {
        std::mem::take(&mut *self.pending_compaction.lock())
    }

    /// Envia a compactação para a fila do writer e espera o resultado.
    /// Retorna None se o writer já encerrou.
    pub(crate) async fn compact_log(
        &self,
        expired: HashSet<String>,
    ) -> Option<std::io::Result<usize>> {
        let (done_tx, done_rx) = oneshot::channel();
        let command = AofCommand::Compact {
            expired,
            done: done_tx,
        };
        if self.aof_tx.send(command).await.is_err() {
            return None;
        }
        done_rx.await.ok()
    }
}

impl Expirable for StoreInner {
    fn delete_if_expired(&self, key: &str) -> bool {
        let removed = self.shards.delete_if_expired(key, epoch_secs());
        if removed {
            // o registro SET continua no log; o próximo passe do sweeper
            // compacta
            self.pending_compaction.lock().insert(key.to_string());
        }
        removed
    }
}
