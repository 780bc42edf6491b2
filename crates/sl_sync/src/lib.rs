//! SheetLink Sync Engine
//!
//! 让内存中的运营数据集与外部独立编辑的工作簿以及两个本地持久化层保持一致。

pub mod autosave;
pub mod bus;
pub mod engine;
pub mod handle;
pub mod host;
pub mod reload;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod watchdog;
pub mod write;

pub use autosave::{AutosaveReport, AutosaveScheduler, AutosaveTrigger};
pub use bus::EventBus;
pub use engine::{LinkOutcome, SyncEngine, AUTOSAVE_TASK, WATCHDOG_TASK};
pub use handle::{AcquireOutcome, HandleManager, LinkState};
pub use host::{
    CapabilityToken, FileHost, FileStamp, HostCapabilities, HostError, MemoryFileHost, NativeFileHost, PermissionMode,
    PermissionState,
};
pub use reload::{ReloadOutcome, ReloadPipeline};
pub use scheduler::{Scheduler, TaskState};
pub use state::SyncState;
pub use store::{StateStore, StoreSnapshot};
pub use watchdog::{ChangeWatchdog, PollOutcome};
pub use write::{WriteOutcome, WritePipeline};
