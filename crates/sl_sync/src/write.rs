//! 写入管线
//!
//! 把状态仓库序列化为工作簿并写回外部文件。同一时刻至多一次写入: 写入进行中时新的请求直接丢弃
//! (不排队，下一次触发总会读取仓库最新内容)。文件被占用时以固定间隔有限次重试。
//! 成功后记录自写时间，并在超过下一次看门狗轮询的宽限期后才清除写入标志，
//! 保证看门狗观察到新修改戳时抑制窗口一定已经生效。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use sl_core::{EngineConfig, EventKind, LinkStatus, Notice, Result, SheetLinkError};
use sl_workbook::{encode, fingerprint};

use crate::bus::EventBus;
use crate::handle::HandleManager;
use crate::host::HostError;
use crate::state::SyncState;
use crate::store::StateStore;

/// 写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { attempts: u32 },
    /// 已有写入在进行，本次请求被丢弃
    Dropped,
}

/// 写入期间持有写入标志，提前返回时自动释放
struct WriteGuard {
    sync: Arc<SyncState>,
    armed: bool,
}

impl WriteGuard {
    fn new(sync: Arc<SyncState>) -> Self {
        Self { sync, armed: true }
    }

    /// 在宽限期结束后释放标志
    fn release_after(mut self, grace: Duration) {
        self.armed = false;
        let sync = Arc::clone(&self.sync);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            sync.end_write();
        });
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if self.armed {
            self.sync.end_write();
        }
    }
}

/// 写入管线
pub struct WritePipeline {
    handles: Arc<HandleManager>,
    store: Arc<StateStore>,
    sync: Arc<SyncState>,
    bus: EventBus,
    sheet_name: String,
    max_attempts: u32,
    retry_delay: Duration,
    grace: Duration,
    attempts_total: AtomicU64,
}

impl WritePipeline {
    pub fn new(
        handles: Arc<HandleManager>,
        store: Arc<StateStore>,
        sync: Arc<SyncState>,
        bus: EventBus,
        config: &EngineConfig,
    ) -> Self {
        Self {
            handles,
            store,
            sync,
            bus,
            sheet_name: config.preferred_sheet.clone(),
            max_attempts: config.write_max_attempts.max(1),
            retry_delay: config.write_retry_delay(),
            grace: config.write_grace(),
            attempts_total: AtomicU64::new(0),
        }
    }

    /// 累计写入尝试次数
    pub fn attempts_total(&self) -> u64 {
        self.attempts_total.load(Ordering::Relaxed)
    }

    /// 把仓库当前内容写回外部文件
    pub async fn trigger_write(&self) -> Result<WriteOutcome> {
        if !self.handles.is_live() {
            return Err(SheetLinkError::NoHandle);
        }
        if !self.sync.try_begin_write() {
            tracing::debug!("write already in progress, request dropped");
            self.bus.publish(EventKind::WriteDropped, self.store.revision());
            return Ok(WriteOutcome::Dropped);
        }
        let guard = WriteGuard::new(Arc::clone(&self.sync));

        let (dataset, _, revision) = self.store.persist_view();
        let bytes = match encode(&dataset, &self.sheet_name) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.bus.notify(Notice::FatalWriteError { message: err.to_string() }, revision);
                return Err(err);
            }
        };

        for attempt in 1..=self.max_attempts {
            self.attempts_total.fetch_add(1, Ordering::Relaxed);
            match self.handles.write(&bytes).await {
                Ok(()) => {
                    self.sync.mark_self_write(Instant::now(), fingerprint(&bytes));
                    guard.release_after(self.grace);
                    tracing::info!(attempt, revision, bytes = bytes.len(), "dataset written to external file");
                    self.bus.publish(EventKind::WriteCompleted { attempts: attempt }, revision);
                    return Ok(WriteOutcome::Written { attempts: attempt });
                }
                Err(HostError::Locked) => {
                    tracing::warn!(attempt, max = self.max_attempts, "external file locked");
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
                Err(HostError::NotFound(path)) => {
                    self.handles.invalidate("external file disappeared during write").await;
                    self.bus.set_status(LinkStatus::Disconnected);
                    self.bus.notify(
                        Notice::FatalWriteError { message: format!("file no longer exists: {path}") },
                        revision,
                    );
                    return Err(SheetLinkError::StaleHandle(path));
                }
                Err(HostError::PermissionDenied(reason)) => {
                    self.handles.invalidate("write permission revoked").await;
                    self.bus.set_status(LinkStatus::Disconnected);
                    self.bus.notify(Notice::PermissionRequired { reason: reason.clone() }, revision);
                    return Err(SheetLinkError::PermissionDenied(reason));
                }
                Err(err) => {
                    self.bus.notify(Notice::FatalWriteError { message: err.to_string() }, revision);
                    return Err(err.into());
                }
            }
        }

        drop(guard);
        let message = format!("external file stayed locked after {} attempts", self.max_attempts);
        tracing::error!("{message}");
        self.bus.notify(Notice::FatalWriteError { message }, revision);
        Err(SheetLinkError::FileLocked { attempts: self.max_attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{CapabilityToken, MemoryFileHost, PermissionMode};

    const FILE: &str = "turnos.xlsx";

    async fn live_pipeline(config: &EngineConfig) -> (WritePipeline, Arc<MemoryFileHost>, Arc<SyncState>, EventBus) {
        let host = Arc::new(MemoryFileHost::new());
        host.put_file(FILE, Vec::new());
        let handles = Arc::new(HandleManager::new(host.clone(), None, config.allowed_extensions.clone()));
        let token = CapabilityToken::new("memory", FILE, FILE);
        handles.ensure_permission(&token, PermissionMode::ReadWrite).await.unwrap();
        handles.activate(token);

        let bus = EventBus::default();
        let store = Arc::new(StateStore::new(bus.clone(), config.contract_horizon_days));
        let sync = Arc::new(SyncState::new(config.suppress_window()));
        let pipeline = WritePipeline::new(handles, store, Arc::clone(&sync), bus.clone(), config);
        (pipeline, host, sync, bus)
    }

    #[tokio::test(start_paused = true)]
    async fn test_flag_held_through_grace() {
        let config = EngineConfig::default();
        let (pipeline, host, sync, _bus) = live_pipeline(&config).await;

        assert_eq!(pipeline.trigger_write().await.unwrap(), WriteOutcome::Written { attempts: 1 });
        assert_eq!(host.write_attempts(), 1);
        assert!(sync.is_write_in_progress());

        tokio::time::sleep(config.write_grace() + Duration::from_millis(10)).await;
        assert!(!sync.is_write_in_progress());
    }

    #[tokio::test]
    async fn test_encode_failure_is_surfaced() {
        // 未经校验的配置直接构造管线，工作表名非法
        let config = EngineConfig { preferred_sheet: "Datos[1]".to_string(), ..EngineConfig::default() };
        let (pipeline, host, sync, bus) = live_pipeline(&config).await;
        let mut rx = bus.subscribe();

        let err = pipeline.trigger_write().await.unwrap_err();
        assert!(matches!(err, SheetLinkError::Workbook(_)));
        assert_eq!(host.write_attempts(), 0);
        assert!(!sync.is_write_in_progress());

        let event = rx.try_recv().unwrap();
        assert!(matches!(event.kind, EventKind::Notice(Notice::FatalWriteError { .. })));
    }
}
