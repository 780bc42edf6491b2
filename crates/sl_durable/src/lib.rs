//! # sl_durable - SheetLink Local Persistence
//!
//! 本地持久化底座: 同步的 FastKV 快速层、异步的 SQLite DurableKV 主存储层，以及带版本迁移的快照格式。

pub mod durable_kv;
pub mod fast_kv;
pub mod snapshot;
pub mod tier;

pub use durable_kv::{DurableKv, HANDLE_SLOT};
pub use fast_kv::FastKv;
pub use snapshot::{PersistenceSnapshot, SNAPSHOT_SCHEMA_VERSION};
pub use tier::SnapshotTier;
