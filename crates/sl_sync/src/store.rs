//! 状态仓库
//!
//! 规范的内存数据集、列映射、修订号与脏标志。所有修改都以一次整体赋值完成，
//! 外部永远看不到半应用的补丁。仓库是显式构造并注入各组件的上下文对象。

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{Local, NaiveDate};

use sl_core::{ColumnMap, Dataset, DerivedViews, EventKind, Patch, ReplaceOrigin, Result};

use crate::bus::EventBus;

#[derive(Debug, Default)]
struct StoreInner {
    dataset: Dataset,
    column_map: ColumnMap,
    revision: u64,
    dirty: bool,
}

/// `get_snapshot` 的返回值
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    pub dataset: Dataset,
    pub column_map: ColumnMap,
    pub views: DerivedViews,
    pub revision: u64,
    pub dirty: bool,
}

/// 状态仓库
#[derive(Debug)]
pub struct StateStore {
    inner: RwLock<StoreInner>,
    bus: EventBus,
    contract_horizon_days: u32,
}

impl StateStore {
    pub fn new(bus: EventBus, contract_horizon_days: u32) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            bus,
            contract_horizon_days,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// 当前数据集与派生视图 (以本地日期计算合同到期)
    pub fn get_snapshot(&self) -> StoreSnapshot {
        self.get_snapshot_at(Local::now().date_naive())
    }

    pub fn get_snapshot_at(&self, today: NaiveDate) -> StoreSnapshot {
        let inner = self.read();
        StoreSnapshot {
            views: DerivedViews::compute(&inner.dataset, &inner.column_map, today, self.contract_horizon_days),
            dataset: inner.dataset.clone(),
            column_map: inner.column_map.clone(),
            revision: inner.revision,
            dirty: inner.dirty,
        }
    }

    /// 持久化所需的最小视图
    pub fn persist_view(&self) -> (Dataset, ColumnMap, u64) {
        let inner = self.read();
        (inner.dataset.clone(), inner.column_map.clone(), inner.revision)
    }

    pub fn dataset(&self) -> Dataset {
        self.read().dataset.clone()
    }

    pub fn column_map(&self) -> ColumnMap {
        self.read().column_map.clone()
    }

    pub fn revision(&self) -> u64 {
        self.read().revision
    }

    pub fn is_dirty(&self) -> bool {
        self.read().dirty
    }

    pub fn len(&self) -> usize {
        self.read().dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().dataset.is_empty()
    }

    /// 应用补丁并置脏。非法补丁整体拒绝，仓库保持原样。
    pub fn apply_mutation(&self, patches: &[Patch]) -> Result<u64> {
        let revision = {
            let mut inner = self.write();
            let next = match inner.dataset.apply(patches) {
                Ok(next) => next,
                Err(err) => {
                    tracing::warn!(error = %err, "rejected malformed patch");
                    return Err(err);
                }
            };
            inner.dataset = next;
            inner.revision += 1;
            inner.dirty = true;
            inner.revision
        };
        self.bus.publish(EventKind::DatasetMutated, revision);
        Ok(revision)
    }

    /// 整体替换数据集与列映射。来自本地层的恢复不置脏 (数据已经持久化)。
    pub fn replace_all(&self, dataset: Dataset, column_map: ColumnMap, origin: ReplaceOrigin) -> u64 {
        let revision = {
            let mut inner = self.write();
            inner.dataset = dataset;
            inner.column_map = column_map;
            inner.revision += 1;
            inner.dirty = !matches!(origin, ReplaceOrigin::FastTier | ReplaceOrigin::DurableTier);
            inner.revision
        };
        tracing::debug!(?origin, revision, "dataset replaced");
        self.bus.publish(EventKind::DatasetReplaced { origin }, revision);
        revision
    }

    /// 清除脏标志，仅当期间没有新的修改时生效
    pub fn mark_clean(&self, revision: u64) -> bool {
        let mut inner = self.write();
        if inner.revision == revision {
            inner.dirty = false;
            true
        } else {
            false
        }
    }
}
