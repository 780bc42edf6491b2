//! 引擎事件定义
//!
//! 状态仓库与同步组件通过事件总线发布这些事件，渲染层只订阅事件，不直接依赖同步引擎。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 引擎事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// 事件唯一标识
    pub id: Uuid,
    /// 事件类型
    pub kind: EventKind,
    /// 事件时间戳
    pub timestamp: DateTime<Utc>,
    /// 事件发生时状态仓库的修订号
    pub revision: u64,
}

impl Event {
    /// 创建新事件
    pub fn new(kind: EventKind, revision: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp: Utc::now(),
            revision,
        }
    }
}

/// 数据集整体替换的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplaceOrigin {
    FastTier,
    DurableTier,
    ExternalFile,
    BundledDefault,
    Import,
}

/// 需要用户处理的提示
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notice {
    /// 权限被拒绝，需要重新手动选择文件
    PermissionRequired { reason: String },
    /// 写回外部文件彻底失败
    FatalWriteError { message: String },
    /// 外部文件无法解析，本次重载已放弃
    ParseWarning { message: String },
    /// 两个本地层都保存失败
    StorageFailed { message: String },
}

/// 实时链接状态指示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    /// 没有实时链接
    Disconnected,
    /// 正常监视中
    Online,
    /// 正在从外部文件重载
    Updating,
    /// 元数据读取失败，下一次轮询重试
    Paused,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Disconnected => "disconnected",
            LinkStatus::Online => "online",
            LinkStatus::Updating => "updating",
            LinkStatus::Paused => "paused",
        }
    }
}

/// 事件类型枚举
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    // 状态仓库事件
    DatasetMutated,
    DatasetReplaced { origin: ReplaceOrigin },

    // 外部文件事件
    ExternalChangeDetected,
    SelfWriteSuppressed,
    WriteCompleted { attempts: u32 },
    WriteDropped,

    // 本地持久化事件
    Autosaved { fast_ok: bool, durable_ok: bool },

    // 链接事件
    LinkStatusChanged(LinkStatus),

    // 用户提示
    Notice(Notice),
}

impl EventKind {
    /// 获取事件类型名称
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::DatasetMutated => "dataset_mutated",
            EventKind::DatasetReplaced { .. } => "dataset_replaced",
            EventKind::ExternalChangeDetected => "external_change_detected",
            EventKind::SelfWriteSuppressed => "self_write_suppressed",
            EventKind::WriteCompleted { .. } => "write_completed",
            EventKind::WriteDropped => "write_dropped",
            EventKind::Autosaved { .. } => "autosaved",
            EventKind::LinkStatusChanged(_) => "link_status_changed",
            EventKind::Notice(_) => "notice",
        }
    }
}
