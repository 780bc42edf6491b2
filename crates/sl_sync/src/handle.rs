//! 外部文件句柄管理
//!
//! 获取、持久化、恢复能力令牌，并维护链接状态机:
//!
//! ```text
//! NoHandle → Resuming → (PermissionGranted → Live) | (PermissionDenied → NoHandle)
//! NoHandle → PermissionGranted (手动选择)
//! Live → NoHandle (不可恢复的 I/O 错误，令牌作废)
//! ```
//!
//! 权限被拒绝只会上报给用户，从不在循环里静默重试。

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use sl_core::{Result, SheetLinkError};
use sl_durable::{DurableKv, HANDLE_SLOT};

use crate::host::{CapabilityToken, FileHost, FileStamp, HostError, PermissionMode, PermissionState};

/// 链接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    NoHandle,
    Resuming,
    PermissionGranted,
    PermissionDenied,
    Live,
}

impl LinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::NoHandle => "no_handle",
            LinkState::Resuming => "resuming",
            LinkState::PermissionGranted => "permission_granted",
            LinkState::PermissionDenied => "permission_denied",
            LinkState::Live => "live",
        }
    }

    pub fn can_transition_to(self, next: LinkState) -> bool {
        if self == next || next == LinkState::NoHandle {
            return true;
        }
        matches!(
            (self, next),
            (LinkState::NoHandle, LinkState::Resuming)
                | (LinkState::NoHandle, LinkState::PermissionGranted)
                | (LinkState::NoHandle, LinkState::PermissionDenied)
                | (LinkState::Resuming, LinkState::PermissionGranted)
                | (LinkState::Resuming, LinkState::PermissionDenied)
                | (LinkState::PermissionGranted, LinkState::Live)
                | (LinkState::Live, LinkState::Resuming)
        )
    }
}

/// 手动选择的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(CapabilityToken),
    Cancelled,
}

/// 句柄管理器
pub struct HandleManager {
    host: Arc<dyn FileHost>,
    durable: Option<DurableKv>,
    extensions: Vec<String>,
    state: Mutex<LinkState>,
    token: Mutex<Option<CapabilityToken>>,
}

impl HandleManager {
    pub fn new(host: Arc<dyn FileHost>, durable: Option<DurableKv>, extensions: Vec<String>) -> Self {
        Self {
            host,
            durable,
            extensions,
            state: Mutex::new(LinkState::NoHandle),
            token: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &Arc<dyn FileHost> {
        &self.host
    }

    pub fn state(&self) -> LinkState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_live(&self) -> bool {
        self.state() == LinkState::Live
    }

    pub fn current_token(&self) -> Option<CapabilityToken> {
        self.token.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn transition(&self, next: LinkState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.can_transition_to(next) {
            tracing::warn!(from = state.as_str(), to = next.as_str(), "ignoring invalid link transition");
            return;
        }
        if *state != next {
            tracing::debug!(from = state.as_str(), to = next.as_str(), "link state transition");
        }
        *state = next;
    }

    /// 打开文件选择器，仅允许表格文件
    pub async fn acquire_new(&self) -> Result<AcquireOutcome> {
        match self.host.pick_file(&self.extensions).await {
            Ok(token) => {
                tracing::info!(file = %token.display_name, "file picked");
                Ok(AcquireOutcome::Acquired(token))
            }
            Err(HostError::Cancelled) => {
                tracing::info!("file pick cancelled");
                Ok(AcquireOutcome::Cancelled)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// 把令牌保存到 DurableKV 的固定槽位
    pub async fn persist(&self, token: &CapabilityToken) -> Result<()> {
        let durable = self.durable.as_ref().ok_or_else(|| {
            SheetLinkError::Storage("durable tier unavailable; file must be picked again next session".to_string())
        })?;
        let bytes = serde_json::to_vec(token)?;
        durable.put(HANDLE_SLOT, &bytes).await?;
        tracing::debug!(token = %token.id, "file handle persisted");
        Ok(())
    }

    /// 读取已持久化的令牌。不假定令牌仍然有效；损坏的令牌会被清除并返回 `HandleResume`。
    pub async fn resume(&self) -> Result<Option<CapabilityToken>> {
        let Some(durable) = self.durable.as_ref() else {
            return Ok(None);
        };
        self.transition(LinkState::Resuming);

        let bytes = match durable.get(HANDLE_SLOT).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.transition(LinkState::NoHandle);
                return Ok(None);
            }
            Err(err) => {
                self.transition(LinkState::NoHandle);
                return Err(err);
            }
        };

        let token: CapabilityToken = match serde_json::from_slice(&bytes) {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(error = %err, "persisted file handle is corrupt, clearing it");
                self.clear_persisted().await;
                self.transition(LinkState::NoHandle);
                return Err(SheetLinkError::HandleResume(err.to_string()));
            }
        };
        if token.host != self.host.name() {
            self.clear_persisted().await;
            self.transition(LinkState::NoHandle);
            return Err(SheetLinkError::HandleResume(format!(
                "handle was issued by host '{}', running on '{}'",
                token.host,
                self.host.name()
            )));
        }
        Ok(Some(token))
    }

    /// 查询权限，未授予时申请一次。拒绝或文件已不存在时只断开内存中的链接，
    /// 是否清除已持久化的令牌由调用方决定 (新选择的文件被拒绝时，旧令牌可能仍然有效)。
    pub async fn ensure_permission(&self, token: &CapabilityToken, mode: PermissionMode) -> Result<PermissionState> {
        let queried = match self.host.query_permission(token, mode).await {
            Ok(state) => state,
            Err(HostError::NotFound(path)) => {
                self.release();
                return Err(SheetLinkError::HandleResume(format!("file no longer exists: {path}")));
            }
            Err(err) => return Err(err.into()),
        };

        let state = if queried == PermissionState::Granted {
            PermissionState::Granted
        } else {
            self.host.request_permission(token, mode).await?
        };

        if state == PermissionState::Granted {
            self.transition(LinkState::PermissionGranted);
            Ok(PermissionState::Granted)
        } else {
            tracing::warn!(file = %token.display_name, "permission denied");
            self.transition(LinkState::PermissionDenied);
            self.release();
            Ok(PermissionState::Denied)
        }
    }

    /// 权限已授予后进入 Live
    pub fn activate(&self, token: CapabilityToken) {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = Some(token);
        self.transition(LinkState::Live);
    }

    /// 断开链接但保留已持久化的令牌
    pub fn release(&self) {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.transition(LinkState::NoHandle);
    }

    /// 令牌作废: 清空内存与持久化的令牌，回到 NoHandle
    pub async fn invalidate(&self, reason: &str) {
        tracing::warn!(reason, "file handle invalidated");
        self.release();
        self.clear_persisted().await;
    }

    async fn clear_persisted(&self) {
        if let Some(durable) = self.durable.as_ref() {
            if let Err(err) = durable.delete(HANDLE_SLOT).await {
                tracing::warn!(error = %err, "failed to clear persisted file handle");
            }
        }
    }

    fn live_token(&self) -> std::result::Result<CapabilityToken, HostError> {
        self.current_token()
            .ok_or_else(|| HostError::Unsupported("no live file handle".to_string()))
    }

    pub async fn read_metadata(&self) -> std::result::Result<FileStamp, HostError> {
        let token = self.live_token()?;
        self.host.read_metadata(&token).await
    }

    pub async fn read(&self) -> std::result::Result<Vec<u8>, HostError> {
        let token = self.live_token()?;
        self.host.read(&token).await
    }

    pub async fn write(&self, bytes: &[u8]) -> std::result::Result<(), HostError> {
        let token = self.live_token()?;
        self.host.write(&token, bytes).await
    }
}
