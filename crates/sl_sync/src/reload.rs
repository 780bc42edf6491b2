//! 重载管线: 重新解析外部文件并整体替换状态仓库

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sl_core::{Notice, ReplaceOrigin, Result, SheetLinkError};
use sl_workbook::{decode, fingerprint};

use crate::bus::EventBus;
use crate::handle::HandleManager;
use crate::host::HostError;
use crate::state::SyncState;
use crate::store::StateStore;

/// 重载结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// 仓库已被替换
    Replaced { revision: u64, records: usize },
    /// 文件内容与最近一次自写完全一致
    OwnWrite,
    /// 读取期间开始了一次写入，本次重载放弃
    Superseded,
}

/// 重载管线
pub struct ReloadPipeline {
    handles: Arc<HandleManager>,
    store: Arc<StateStore>,
    sync: Arc<SyncState>,
    bus: EventBus,
    preferred_sheet: String,
    reloads: AtomicU64,
}

impl ReloadPipeline {
    pub fn new(
        handles: Arc<HandleManager>,
        store: Arc<StateStore>,
        sync: Arc<SyncState>,
        bus: EventBus,
        preferred_sheet: impl Into<String>,
    ) -> Self {
        Self {
            handles,
            store,
            sync,
            bus,
            preferred_sheet: preferred_sheet.into(),
            reloads: AtomicU64::new(0),
        }
    }

    /// 已完成的替换次数
    pub fn count(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }

    /// 读取并解析外部文件。解析失败时发出警告并保持仓库不变。
    /// `skip_own_write` 为真时，内容与最近一次自写相同的文件不会被重新导入。
    pub async fn reload(&self, skip_own_write: bool) -> Result<ReloadOutcome> {
        let bytes = match self.handles.read().await {
            Ok(bytes) => bytes,
            Err(HostError::NotFound(path)) => {
                self.handles.invalidate("external file disappeared").await;
                return Err(SheetLinkError::StaleHandle(path));
            }
            Err(err) => return Err(err.into()),
        };

        if skip_own_write && self.sync.matches_last_write(&fingerprint(&bytes)) {
            tracing::debug!("file content matches last self-write, skipping reload");
            return Ok(ReloadOutcome::OwnWrite);
        }

        let decoded = match decode(&bytes, &self.preferred_sheet) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.bus.notify(Notice::ParseWarning { message: err.to_string() }, self.store.revision());
                return Err(err);
            }
        };

        // 读取挂起期间可能开始了写入；写入携带的是仓库的最新内容，不能被覆盖
        if self.sync.is_write_in_progress() {
            tracing::debug!("write started during reload, discarding parsed content");
            return Ok(ReloadOutcome::Superseded);
        }

        let records = decoded.dataset.len();
        let revision = self
            .store
            .replace_all(decoded.dataset, decoded.column_map, ReplaceOrigin::ExternalFile);
        self.reloads.fetch_add(1, Ordering::Relaxed);
        tracing::info!(sheet = %decoded.sheet, records, revision, "reloaded dataset from external file");
        Ok(ReloadOutcome::Replaced { revision, records })
    }
}
