//! 同步引擎
//!
//! 显式构造一次的上下文对象，把状态仓库、本地层、句柄管理器、看门狗、写入管线、
//! 自动保存与调度器连接在一起。所有组件都通过这里注入共享状态，不存在全局单例。

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use sl_core::{
    ColumnMap, EngineConfig, Event, LinkStatus, Notice, Patch, ReplaceOrigin, Result, SheetLinkError,
};
use sl_durable::{DurableKv, FastKv, PersistenceSnapshot, SnapshotTier};
use sl_workbook::{decode, encode};

use crate::autosave::{AutosaveReport, AutosaveScheduler, AutosaveTrigger};
use crate::bus::EventBus;
use crate::handle::{AcquireOutcome, HandleManager, LinkState};
use crate::host::{CapabilityToken, FileHost, HostError, PermissionMode, PermissionState};
use crate::reload::{ReloadOutcome, ReloadPipeline};
use crate::scheduler::Scheduler;
use crate::state::SyncState;
use crate::store::{StateStore, StoreSnapshot};
use crate::watchdog::{ChangeWatchdog, PollOutcome};
use crate::write::{WriteOutcome, WritePipeline};

/// 看门狗周期任务名
pub const WATCHDOG_TASK: &str = "watchdog";
/// 自动保存周期任务名
pub const AUTOSAVE_TASK: &str = "autosave";

/// 建立实时链接的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// 链接已建立，附带首次读取的记录数
    Live { records: usize },
    /// 无法自动恢复，需要用户手动选择文件
    NeedsManualPick { reason: String },
    /// 用户取消了文件选择
    Cancelled,
}

/// 同步引擎
pub struct SyncEngine {
    config: EngineConfig,
    bus: EventBus,
    store: Arc<StateStore>,
    sync: Arc<SyncState>,
    handles: Arc<HandleManager>,
    fast: Option<Arc<FastKv>>,
    durable: Option<DurableKv>,
    reload: Arc<ReloadPipeline>,
    watchdog: Arc<ChangeWatchdog>,
    writer: Arc<WritePipeline>,
    autosave: Arc<AutosaveScheduler>,
    scheduler: Arc<Scheduler>,
}

impl SyncEngine {
    /// 按配置打开两个本地层并构造引擎。任何一层不可用都只会降级，不会失败。
    pub async fn bootstrap(config: EngineConfig, host: Arc<dyn FileHost>) -> Result<Self> {
        config.validate()?;

        let fast = FastKv::open(&config.fast_kv_dir, config.fast_kv_quota_bytes);
        let fast = if fast.is_enabled() {
            Some(fast)
        } else {
            tracing::warn!("fast_kv unavailable, continuing on durable_kv only");
            None
        };

        let durable = match DurableKv::connect(&config.durable_kv_url).await {
            Ok(durable) => Some(durable),
            Err(err) => {
                tracing::warn!(error = %err, "durable_kv unavailable, file must be picked every session");
                None
            }
        };

        Self::with_tiers(config, host, fast, durable)
    }

    /// 使用给定的本地层构造引擎，并启动自动保存周期任务
    pub fn with_tiers(
        config: EngineConfig,
        host: Arc<dyn FileHost>,
        fast: Option<FastKv>,
        durable: Option<DurableKv>,
    ) -> Result<Self> {
        config.validate()?;

        let bus = EventBus::default();
        let store = Arc::new(StateStore::new(bus.clone(), config.contract_horizon_days));
        let sync = Arc::new(SyncState::new(config.suppress_window()));
        let handles = Arc::new(HandleManager::new(host, durable.clone(), config.allowed_extensions.clone()));
        let fast = fast.map(Arc::new);

        let reload = Arc::new(ReloadPipeline::new(
            Arc::clone(&handles),
            Arc::clone(&store),
            Arc::clone(&sync),
            bus.clone(),
            config.preferred_sheet.clone(),
        ));
        let watchdog = Arc::new(ChangeWatchdog::new(
            Arc::clone(&handles),
            Arc::clone(&sync),
            Arc::clone(&reload),
            Arc::clone(&store),
            bus.clone(),
        ));
        let writer = Arc::new(WritePipeline::new(
            Arc::clone(&handles),
            Arc::clone(&store),
            Arc::clone(&sync),
            bus.clone(),
            &config,
        ));

        let mut tiers: Vec<Arc<dyn SnapshotTier>> = Vec::new();
        if let Some(fast) = &fast {
            tiers.push(Arc::clone(fast) as Arc<dyn SnapshotTier>);
        }
        if let Some(durable) = &durable {
            tiers.push(Arc::new(durable.clone()));
        }
        let autosave = Arc::new(AutosaveScheduler::new(Arc::clone(&store), tiers, bus.clone()));

        let scheduler = Arc::new(Scheduler::new());
        let periodic = Arc::clone(&autosave);
        scheduler.spawn_periodic(AUTOSAVE_TASK, config.autosave_interval(), move || {
            let autosave = Arc::clone(&periodic);
            async move {
                autosave.on_trigger(AutosaveTrigger::Periodic).await;
            }
        });

        Ok(Self {
            config,
            bus,
            store,
            sync,
            handles,
            fast,
            durable,
            reload,
            watchdog,
            writer,
            autosave,
            scheduler,
        })
    }

    /// 启动加载: FastKV → DurableKV → 外部文件 (仅在已有读权限时静默读取) → 内置默认数据集。
    /// 返回实际使用的来源；全部为空时仓库保持空数据集。
    pub async fn load_initial(&self) -> Result<Option<ReplaceOrigin>> {
        if let Some(fast) = &self.fast {
            match fast.load() {
                Ok(Some(snapshot)) if !snapshot.dataset.is_empty() => {
                    return Ok(Some(self.restore(snapshot, ReplaceOrigin::FastTier)));
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "fast_kv snapshot unusable, trying durable_kv"),
            }
        }

        if let Some(durable) = &self.durable {
            match durable.load_snapshot().await {
                Ok(Some(snapshot)) if !snapshot.dataset.is_empty() => {
                    return Ok(Some(self.restore(snapshot, ReplaceOrigin::DurableTier)));
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "durable_kv snapshot unusable"),
            }
        }

        if self.load_from_external().await {
            return Ok(Some(ReplaceOrigin::ExternalFile));
        }

        if let Some(path) = self.config.default_dataset.clone() {
            match self.read_workbook(&path).await {
                Ok(decoded) if !decoded.dataset.is_empty() => {
                    self.store.replace_all(decoded.dataset, decoded.column_map, ReplaceOrigin::BundledDefault);
                    tracing::info!(path = %path.display(), "seeded dataset from bundled default");
                    return Ok(Some(ReplaceOrigin::BundledDefault));
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(path = %path.display(), error = %err, "bundled default dataset unreadable"),
            }
        }

        tracing::info!("no stored dataset found, starting empty");
        Ok(None)
    }

    fn restore(&self, snapshot: PersistenceSnapshot, origin: ReplaceOrigin) -> ReplaceOrigin {
        let records = snapshot.dataset.len();
        let column_map = snapshot
            .column_map
            .unwrap_or_else(|| ColumnMap::discover(snapshot.dataset.columns()));
        self.store.replace_all(snapshot.dataset, column_map, origin);
        tracing::info!(?origin, records, revision = snapshot.revision, "dataset restored from local tier");
        origin
    }

    /// 已持久化的令牌仍有读权限时，不打扰用户直接读取一次外部文件
    async fn load_from_external(&self) -> bool {
        let token = match self.handles.resume().await {
            Ok(Some(token)) => token,
            Ok(None) => return false,
            Err(err) => {
                tracing::warn!(error = %err, "persisted file handle not resumable");
                return false;
            }
        };
        let host = self.handles.host();
        let granted = matches!(
            host.query_permission(&token, PermissionMode::Read).await,
            Ok(PermissionState::Granted)
        );
        let loaded = if granted {
            match host.read(&token).await {
                Ok(bytes) => match decode(&bytes, &self.config.preferred_sheet) {
                    Ok(decoded) if !decoded.dataset.is_empty() => {
                        self.store.replace_all(decoded.dataset, decoded.column_map, ReplaceOrigin::ExternalFile);
                        tracing::info!(file = %token.display_name, "initial dataset read from external file");
                        true
                    }
                    Ok(_) => false,
                    Err(err) => {
                        tracing::warn!(error = %err, "external file unreadable at startup");
                        false
                    }
                },
                Err(err) => {
                    tracing::warn!(error = %err, "external file read failed at startup");
                    false
                }
            }
        } else {
            false
        };
        // 只读取内容，实时链接需要显式 go_live
        self.handles.release();
        loaded
    }

    fn ensure_live_capable(&self) -> Result<()> {
        let capabilities = self.handles.host().capabilities();
        if capabilities.supports_live() {
            Ok(())
        } else {
            Err(SheetLinkError::Unsupported(format!(
                "host '{}' supports one-shot import/export only",
                self.handles.host().name()
            )))
        }
    }

    /// 进入实时模式: 先尝试恢复已持久化的令牌，失败时回退到手动选择
    pub async fn go_live(&self) -> Result<LinkOutcome> {
        self.ensure_live_capable()?;
        match self.resume_live().await? {
            LinkOutcome::NeedsManualPick { reason } => {
                tracing::info!(%reason, "falling back to manual file pick");
                self.pick_and_go_live().await
            }
            outcome => Ok(outcome),
        }
    }

    /// 仅从已持久化的令牌恢复。权限被拒绝时发出提示并返回 `NeedsManualPick`，不重试。
    pub async fn resume_live(&self) -> Result<LinkOutcome> {
        self.ensure_live_capable()?;
        let token = match self.handles.resume().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                return Ok(LinkOutcome::NeedsManualPick { reason: "no persisted file handle".to_string() });
            }
            Err(SheetLinkError::HandleResume(reason)) => {
                return Ok(LinkOutcome::NeedsManualPick { reason });
            }
            Err(err) => return Err(err),
        };

        // 已持久化的令牌被拒绝或指向已删除的文件时作废，避免下次启动再次申请
        match self.handles.ensure_permission(&token, PermissionMode::ReadWrite).await {
            Ok(PermissionState::Granted) => self.establish(token).await,
            Ok(_) => {
                self.handles.invalidate("persisted handle denied").await;
                let reason = format!("access to {} was not granted, pick the file again", token.display_name);
                self.bus.notify(Notice::PermissionRequired { reason: reason.clone() }, self.store.revision());
                Ok(LinkOutcome::NeedsManualPick { reason })
            }
            Err(SheetLinkError::HandleResume(reason)) => {
                self.handles.invalidate(&reason).await;
                Ok(LinkOutcome::NeedsManualPick { reason })
            }
            Err(err) => Err(err),
        }
    }

    /// 打开文件选择器并建立新链接
    pub async fn pick_and_go_live(&self) -> Result<LinkOutcome> {
        self.ensure_live_capable()?;
        let token = match self.handles.acquire_new().await? {
            AcquireOutcome::Acquired(token) => token,
            AcquireOutcome::Cancelled => return Ok(LinkOutcome::Cancelled),
        };

        match self.handles.ensure_permission(&token, PermissionMode::ReadWrite).await? {
            PermissionState::Granted => {
                if let Err(err) = self.handles.persist(&token).await {
                    tracing::warn!(error = %err, "file handle not persisted, next session needs a manual pick");
                }
                self.establish(token).await
            }
            _ => {
                let reason = format!("access to {} was not granted", token.display_name);
                self.bus.notify(Notice::PermissionRequired { reason: reason.clone() }, self.store.revision());
                Ok(LinkOutcome::NeedsManualPick { reason })
            }
        }
    }

    async fn establish(&self, token: CapabilityToken) -> Result<LinkOutcome> {
        self.scheduler.cancel(WATCHDOG_TASK);
        let display_name = token.display_name.clone();
        self.handles.activate(token);
        self.sync.reset();

        let stamp = match self.handles.read_metadata().await {
            Ok(stamp) => stamp,
            Err(HostError::NotFound(path)) => {
                self.handles.invalidate("external file disappeared before link").await;
                self.bus.set_status(LinkStatus::Disconnected);
                return Err(SheetLinkError::StaleHandle(path));
            }
            Err(err) => {
                self.handles.release();
                return Err(err.into());
            }
        };

        match self.reload.reload(false).await {
            Ok(ReloadOutcome::Replaced { records, .. }) => {
                tracing::info!(file = %display_name, records, "live link established");
            }
            Ok(_) => {}
            Err(SheetLinkError::StaleHandle(path)) => {
                self.bus.set_status(LinkStatus::Disconnected);
                return Err(SheetLinkError::StaleHandle(path));
            }
            Err(SheetLinkError::Parse(reason)) => {
                tracing::warn!(%reason, "linked file not parseable yet, keeping current dataset");
            }
            Err(err) => {
                self.handles.release();
                return Err(err);
            }
        }

        self.sync.set_last_known_stamp(stamp);
        self.bus.set_status(LinkStatus::Online);
        self.start_watchdog();
        Ok(LinkOutcome::Live { records: self.store.len() })
    }

    fn start_watchdog(&self) {
        let watchdog = Arc::clone(&self.watchdog);
        let scheduler = Arc::downgrade(&self.scheduler);
        self.scheduler.spawn_periodic(WATCHDOG_TASK, self.config.poll_interval(), move || {
            let watchdog = Arc::clone(&watchdog);
            let scheduler = scheduler.clone();
            async move {
                if watchdog.poll_once().await == PollOutcome::NoHandle {
                    // 能力丢失: 挂起轮询直到重新建立链接
                    if let Some(scheduler) = scheduler.upgrade() {
                        scheduler.pause(WATCHDOG_TASK);
                    }
                }
            }
        });
    }

    /// 手动 "立即同步": 直接调用写入管线
    pub async fn sync_now(&self) -> Result<WriteOutcome> {
        self.writer.trigger_write().await
    }

    pub fn apply_mutation(&self, patches: &[Patch]) -> Result<u64> {
        self.store.apply_mutation(patches)
    }

    /// 立即从外部文件重载
    pub async fn reload_now(&self) -> Result<ReloadOutcome> {
        if !self.handles.is_live() {
            return Err(SheetLinkError::NoHandle);
        }
        self.reload.reload(false).await
    }

    /// 生命周期信号 (隐藏、失焦、离开、手动保存)
    pub async fn lifecycle(&self, trigger: AutosaveTrigger) -> Option<AutosaveReport> {
        self.autosave.on_trigger(trigger).await
    }

    async fn read_workbook(&self, path: &Path) -> Result<sl_workbook::DecodedWorkbook> {
        if !self.config.accepts_extension(path) {
            return Err(SheetLinkError::Unsupported(format!("{} is not a spreadsheet file", path.display())));
        }
        let bytes = tokio::fs::read(path).await?;
        decode(&bytes, &self.config.preferred_sheet)
    }

    /// 一次性导入，不建立实时链接
    pub async fn import_once(&self, path: &Path) -> Result<usize> {
        let decoded = self.read_workbook(path).await?;
        let records = decoded.dataset.len();
        self.store.replace_all(decoded.dataset, decoded.column_map, ReplaceOrigin::Import);
        tracing::info!(path = %path.display(), records, "workbook imported");
        Ok(records)
    }

    /// 一次性导出当前数据集
    pub async fn export_once(&self, path: &Path) -> Result<usize> {
        if !self.config.accepts_extension(path) {
            return Err(SheetLinkError::Unsupported(format!("{} is not a spreadsheet file", path.display())));
        }
        let bytes = encode(&self.store.dataset(), &self.config.preferred_sheet)?;
        tokio::fs::write(path, &bytes).await?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "workbook exported");
        Ok(bytes.len())
    }

    /// 断开实时链接，保留已持久化的令牌以便下次恢复
    pub fn disconnect(&self) {
        self.scheduler.cancel(WATCHDOG_TASK);
        self.handles.release();
        self.sync.reset();
        self.bus.set_status(LinkStatus::Disconnected);
    }

    /// 会话结束: 最后一次保存并停止所有周期任务
    pub async fn shutdown(&self) -> Option<AutosaveReport> {
        let report = self.lifecycle(AutosaveTrigger::BeforeUnload).await;
        self.scheduler.shutdown();
        self.handles.release();
        self.bus.set_status(LinkStatus::Disconnected);
        tracing::info!(saved = report.is_some(), "engine shut down");
        report
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    pub fn status(&self) -> LinkStatus {
        self.bus.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.bus.watch_status()
    }

    pub fn link_state(&self) -> LinkState {
        self.handles.state()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.store.get_snapshot()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn sync_state(&self) -> &Arc<SyncState> {
        &self.sync
    }

    pub fn handles(&self) -> &Arc<HandleManager> {
        &self.handles
    }

    pub fn watchdog(&self) -> &Arc<ChangeWatchdog> {
        &self.watchdog
    }

    pub fn writer(&self) -> &Arc<WritePipeline> {
        &self.writer
    }

    pub fn reload_pipeline(&self) -> &Arc<ReloadPipeline> {
        &self.reload
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }
}
