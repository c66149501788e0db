#![forbid(unsafe_code)]

mod aof;
mod entry;
mod record;
mod shard;
mod store;
mod sweeper;
mod wheel;

pub use aof::FsyncPolicy;
pub use record::Record;
pub use store::{DEFAULT_AOF_PATH, DEFAULT_SWEEP_INTERVAL, Store, StoreOptions};
