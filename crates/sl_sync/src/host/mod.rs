//! 宿主文件能力抽象
//!
//! 引擎其余部分只依赖 [`FileHost`]，不接触任何平台相关的能力形态。
//! 宿主需要提供: 可持久化句柄的文件选择器、独立于选择器的权限查询/申请、只读元数据。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use sl_core::SheetLinkError;

pub mod memory;
pub mod native;

pub use memory::MemoryFileHost;
pub use native::NativeFileHost;

/// 外部文件能力令牌 (可序列化后保存到 DurableKV)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken {
    /// 令牌 ID
    pub id: Uuid,
    /// 签发该令牌的宿主
    pub host: String,
    /// 宿主内部定位符
    pub locator: String,
    /// 展示名称
    pub display_name: String,
    /// 签发时间
    pub issued_at: DateTime<Utc>,
}

impl CapabilityToken {
    pub fn new(host: impl Into<String>, locator: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            host: host.into(),
            locator: locator.into(),
            display_name: display_name.into(),
            issued_at: Utc::now(),
        }
    }
}

/// 文件元数据戳，只用于相等比较
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    /// 最后修改时间 (毫秒)
    pub modified_ms: i64,
    /// 文件长度
    pub len: u64,
}

/// 权限模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    Read,
    ReadWrite,
}

/// 权限状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    /// 需要向用户申请
    Prompt,
}

/// 宿主能力声明
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapabilities {
    /// 选择器返回可跨会话持久化的句柄
    pub persistable_handles: bool,
    /// 能独立于选择器查询/申请权限
    pub permission_query: bool,
    /// 能只读元数据而不读取全部内容
    pub metadata_reads: bool,
}

impl HostCapabilities {
    pub const FULL: HostCapabilities = HostCapabilities {
        persistable_handles: true,
        permission_query: true,
        metadata_reads: true,
    };

    /// 是否支持实时链接；否则只能一次性导入/导出
    pub fn supports_live(&self) -> bool {
        self.persistable_handles && self.permission_query && self.metadata_reads
    }
}

/// 宿主 I/O 错误分类
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("file is locked by another application")]
    Locked,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("file pick cancelled")]
    Cancelled,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<HostError> for SheetLinkError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::Locked => SheetLinkError::FileLocked { attempts: 1 },
            HostError::PermissionDenied(msg) => SheetLinkError::PermissionDenied(msg),
            HostError::NotFound(msg) => SheetLinkError::StaleHandle(msg),
            HostError::Cancelled => SheetLinkError::NoHandle,
            HostError::Unsupported(msg) => SheetLinkError::Unsupported(msg),
            HostError::Io(msg) => SheetLinkError::Io(std::io::Error::new(std::io::ErrorKind::Other, msg)),
        }
    }
}

/// 宿主文件能力
#[async_trait]
pub trait FileHost: Send + Sync {
    /// 宿主名称 (写入令牌，用于拒绝其他宿主签发的令牌)
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> HostCapabilities;

    /// 打开文件选择器，只允许给定扩展名
    async fn pick_file(&self, extensions: &[String]) -> Result<CapabilityToken, HostError>;

    /// 查询当前权限，不打扰用户
    async fn query_permission(&self, token: &CapabilityToken, mode: PermissionMode) -> Result<PermissionState, HostError>;

    /// 申请权限，可能无限期挂起等待用户操作
    async fn request_permission(&self, token: &CapabilityToken, mode: PermissionMode) -> Result<PermissionState, HostError>;

    /// 只读元数据
    async fn read_metadata(&self, token: &CapabilityToken) -> Result<FileStamp, HostError>;

    /// 读取全部内容
    async fn read(&self, token: &CapabilityToken) -> Result<Vec<u8>, HostError>;

    /// 覆盖写入全部内容
    async fn write(&self, token: &CapabilityToken, bytes: &[u8]) -> Result<(), HostError>;
}
