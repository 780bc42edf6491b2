//! 本地持久化层抽象

use async_trait::async_trait;

use sl_core::{Result, Tier};

use crate::snapshot::PersistenceSnapshot;

/// 能保存完整快照的本地层
#[async_trait]
pub trait SnapshotTier: Send + Sync {
    /// 层标识
    fn tier(&self) -> Tier;

    /// 保存快照 (覆盖旧快照)
    async fn save_snapshot(&self, snapshot: &PersistenceSnapshot) -> Result<()>;

    /// 读取快照，不存在时返回 `None`
    async fn load_snapshot(&self) -> Result<Option<PersistenceSnapshot>>;

    /// 删除快照
    async fn clear_snapshot(&self) -> Result<()>;
}
