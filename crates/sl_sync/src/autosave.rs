//! 自动保存调度
//!
//! 多个彼此独立的生命周期信号都会触发一次 "尽力而为" 的双层写入。只要脏标志置位就保存；
//! 一次快照覆盖自上次保存以来的全部修改，所以多个触发自然合并。两层都尝试过之后才清除脏标志，
//! 不论单层成败，避免单层故障导致无休止的重复保存。

use std::sync::Arc;

use sl_core::{EventKind, Notice, Tier};
use sl_durable::{PersistenceSnapshot, SnapshotTier};

use crate::bus::EventBus;
use crate::store::StateStore;

/// 触发来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosaveTrigger {
    /// 低频周期定时器
    Periodic,
    /// 页面/窗口被隐藏
    Hidden,
    /// 失去焦点
    FocusLost,
    /// 即将离开 (关闭、退出信号)
    BeforeUnload,
    /// 用户手动保存
    Manual,
}

impl AutosaveTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutosaveTrigger::Periodic => "periodic",
            AutosaveTrigger::Hidden => "hidden",
            AutosaveTrigger::FocusLost => "focus_lost",
            AutosaveTrigger::BeforeUnload => "before_unload",
            AutosaveTrigger::Manual => "manual",
        }
    }
}

/// 单次保存报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutosaveReport {
    pub trigger: AutosaveTrigger,
    pub revision: u64,
    /// 各层结果
    pub tiers: Vec<(Tier, bool)>,
    /// 是否清除了脏标志 (保存期间又有新修改时不清除)
    pub cleared: bool,
}

impl AutosaveReport {
    pub fn tier_ok(&self, tier: Tier) -> bool {
        self.tiers.iter().any(|(t, ok)| *t == tier && *ok)
    }

    pub fn any_ok(&self) -> bool {
        self.tiers.iter().any(|(_, ok)| *ok)
    }
}

/// 自动保存调度器
pub struct AutosaveScheduler {
    store: Arc<StateStore>,
    tiers: Vec<Arc<dyn SnapshotTier>>,
    bus: EventBus,
}

impl AutosaveScheduler {
    /// `tiers` 按写入顺序排列 (快速层在前)
    pub fn new(store: Arc<StateStore>, tiers: Vec<Arc<dyn SnapshotTier>>, bus: EventBus) -> Self {
        Self { store, tiers, bus }
    }

    /// 处理一次触发；仓库不脏时返回 `None`
    pub async fn on_trigger(&self, trigger: AutosaveTrigger) -> Option<AutosaveReport> {
        if !self.store.is_dirty() {
            return None;
        }

        let (dataset, column_map, revision) = self.store.persist_view();
        let snapshot = PersistenceSnapshot::new(dataset, Some(column_map), revision);

        let mut results = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            let ok = match tier.save_snapshot(&snapshot).await {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(tier = %tier.tier(), error = %err, "tier save failed, continuing on remaining tiers");
                    false
                }
            };
            results.push((tier.tier(), ok));
        }

        let cleared = self.store.mark_clean(revision);
        let report = AutosaveReport { trigger, revision, tiers: results, cleared };

        if !report.any_ok() {
            self.bus.notify(
                Notice::StorageFailed { message: "local snapshot could not be saved to any tier".to_string() },
                revision,
            );
        }
        self.bus.publish(
            EventKind::Autosaved {
                fast_ok: report.tier_ok(Tier::Fast),
                durable_ok: report.tier_ok(Tier::Durable),
            },
            revision,
        );
        tracing::debug!(trigger = trigger.as_str(), revision, cleared, "autosave finished");
        Some(report)
    }
}
