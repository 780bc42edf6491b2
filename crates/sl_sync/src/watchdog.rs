//! 变更看门狗
//!
//! 每个周期只读取外部文件的元数据，与上次已知的修改戳比较。变化发生在写入进行中或
//! 自写抑制窗口内时视为自己造成的，只更新修改戳不重载；否则进入重载管线。
//! 元数据读取失败只会把状态切到 "暂停"，下一次轮询继续重试。重载时读取失败同样暂停，
//! 并把修改戳退回旧值，保证外部修改在下一次轮询时仍会被导入。读取权限被收回时链接关闭。

use std::sync::Arc;

use tokio::time::Instant;

use sl_core::{EventKind, LinkStatus, Notice, SheetLinkError};

use crate::bus::EventBus;
use crate::handle::HandleManager;
use crate::reload::{ReloadOutcome, ReloadPipeline};
use crate::state::SyncState;
use crate::store::StateStore;

/// 单次轮询结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// 没有实时链接
    NoHandle,
    /// 修改戳未变化
    Unchanged,
    /// 变化由自己的写入造成
    SelfWrite,
    /// 已从外部文件重载
    Reloaded,
    /// 重载期间开始了写入，本次变化交给写入覆盖
    Superseded,
    /// 重载失败，仓库未变。读取失败时下次轮询重试，解析失败时等待文件再次变化
    ReloadFailed,
    /// 元数据读取失败，下次重试
    Paused,
}

/// 变更看门狗
pub struct ChangeWatchdog {
    handles: Arc<HandleManager>,
    sync: Arc<SyncState>,
    reload: Arc<ReloadPipeline>,
    store: Arc<StateStore>,
    bus: EventBus,
}

impl ChangeWatchdog {
    pub fn new(
        handles: Arc<HandleManager>,
        sync: Arc<SyncState>,
        reload: Arc<ReloadPipeline>,
        store: Arc<StateStore>,
        bus: EventBus,
    ) -> Self {
        Self { handles, sync, reload, store, bus }
    }

    /// 执行一次轮询
    pub async fn poll_once(&self) -> PollOutcome {
        if !self.handles.is_live() {
            return PollOutcome::NoHandle;
        }

        let stamp = match self.handles.read_metadata().await {
            Ok(stamp) => stamp,
            Err(err) => {
                tracing::warn!(error = %err, "metadata read failed, watchdog paused until next tick");
                self.bus.set_status(LinkStatus::Paused);
                return PollOutcome::Paused;
            }
        };
        if self.bus.status() == LinkStatus::Paused {
            self.bus.set_status(LinkStatus::Online);
        }

        let previous = self.sync.last_known_stamp();
        if previous == Some(stamp) {
            return PollOutcome::Unchanged;
        }
        self.sync.set_last_known_stamp(stamp);

        if previous.is_none() {
            tracing::debug!(?stamp, "watchdog baseline recorded");
            return PollOutcome::Unchanged;
        }

        if self.sync.is_write_in_progress() || self.sync.within_suppress_window(Instant::now()) {
            tracing::debug!(?stamp, "change attributed to own write, suppressed");
            self.bus.publish(EventKind::SelfWriteSuppressed, self.store.revision());
            return PollOutcome::SelfWrite;
        }

        tracing::info!(?stamp, "external change detected");
        self.bus.publish(EventKind::ExternalChangeDetected, self.store.revision());
        self.bus.set_status(LinkStatus::Updating);

        let outcome = match self.reload.reload(true).await {
            Ok(ReloadOutcome::Replaced { .. }) => PollOutcome::Reloaded,
            Ok(ReloadOutcome::OwnWrite) => PollOutcome::SelfWrite,
            Ok(ReloadOutcome::Superseded) => PollOutcome::Superseded,
            Err(SheetLinkError::StaleHandle(path)) => {
                tracing::warn!(%path, "external file lost, live link closed");
                self.bus.set_status(LinkStatus::Disconnected);
                return PollOutcome::NoHandle;
            }
            Err(SheetLinkError::PermissionDenied(reason)) => {
                tracing::warn!(%reason, "read permission revoked, live link closed");
                self.handles.invalidate("read permission revoked").await;
                self.bus.set_status(LinkStatus::Disconnected);
                self.bus.notify(Notice::PermissionRequired { reason }, self.store.revision());
                return PollOutcome::NoHandle;
            }
            Err(err @ SheetLinkError::Parse(_)) => {
                // 内容本身不可解析，重试没有意义；警告已由重载管线发出
                tracing::warn!(error = %err, "reload aborted, dataset left untouched");
                PollOutcome::ReloadFailed
            }
            Err(err) => {
                self.sync.restore_last_known_stamp(stamp, previous);
                tracing::warn!(error = %err, "external file could not be read, will retry on next tick");
                self.bus.set_status(LinkStatus::Paused);
                return PollOutcome::ReloadFailed;
            }
        };
        self.bus.set_status(LinkStatus::Online);
        outcome
    }
}
