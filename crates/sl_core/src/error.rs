//! 全局错误处理机制

use thiserror::Error;

/// 本地持久化层标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Tier {
    /// 同步、容量受限的快速层
    Fast,
    /// 异步、大容量的持久层
    Durable,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Fast => "fast_kv",
            Tier::Durable => "durable_kv",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SheetLink 统一错误类型
#[derive(Error, Debug)]
pub enum SheetLinkError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("External file is locked (gave up after {attempts} attempts)")]
    FileLocked { attempts: u32 },

    #[error("Workbook parse error: {0}")]
    Parse(String),

    #[error("Storage quota exceeded on {tier}: needed {needed} bytes, limit {limit} bytes")]
    StorageQuotaExceeded { tier: Tier, needed: usize, limit: usize },

    #[error("Persisted file handle could not be resumed: {0}")]
    HandleResume(String),

    #[error("No live file handle")]
    NoHandle,

    #[error("File handle is stale: {0}")]
    StaleHandle(String),

    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Workbook encode error: {0}")]
    Workbook(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported by host: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SheetLinkError {
    /// 是否需要人工介入 (重新授权或重新选择文件)
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            SheetLinkError::PermissionDenied(_)
                | SheetLinkError::HandleResume(_)
                | SheetLinkError::StaleHandle(_)
                | SheetLinkError::NoHandle
                | SheetLinkError::FileLocked { .. }
        )
    }
}

/// 统一 Result 类型别名
pub type Result<T> = std::result::Result<T, SheetLinkError>;
