//! # sl_core - SheetLink Core Primitives
//!
//! 核心原语层，定义运营数据集、列角色发现、引擎事件、配置与全局错误处理机制。
//! 此 crate 是整个项目的基础依赖，不做任何 I/O (配置文件读取除外)。

pub mod columns;
pub mod config;
pub mod dataset;
pub mod error;
pub mod event;
pub mod views;

pub use columns::{ColumnMap, ColumnRole};
pub use config::EngineConfig;
pub use dataset::{CellValue, Dataset, Patch, Record};
pub use error::{Result, SheetLinkError, Tier};
pub use event::{Event, EventKind, LinkStatus, Notice, ReplaceOrigin};
pub use views::DerivedViews;
