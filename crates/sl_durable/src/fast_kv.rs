//! FastKV - 同步、容量受限的快速层
//!
//! 快照以单个 JSON 文件保存在目录中。写入先落临时文件再原子替换。
//! 目录不可用时该层进入禁用状态，所有操作返回错误但不会让引擎停止。

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use sl_core::{Result, SheetLinkError, Tier};

use crate::snapshot::PersistenceSnapshot;
use crate::tier::SnapshotTier;

const SNAPSHOT_FILE: &str = "snapshot.json";

/// FastKV 存储
#[derive(Debug)]
pub struct FastKv {
    /// 存储目录
    dir: PathBuf,
    /// 容量上限 (字节)
    quota_bytes: usize,
    /// 是否可用
    enabled: bool,
}

impl FastKv {
    /// 打开存储目录；创建失败时返回禁用状态的实例
    pub fn open(dir: impl Into<PathBuf>, quota_bytes: usize) -> Self {
        let dir = dir.into();
        let enabled = match fs::create_dir_all(&dir) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(dir = %dir.display(), error = %err, "fast_kv disabled: directory unavailable");
                false
            }
        };
        Self { dir, quota_bytes, enabled }
    }

    /// 创建禁用状态的实例
    pub fn disabled() -> Self {
        Self { dir: PathBuf::new(), quota_bytes: 0, enabled: false }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.enabled {
            Ok(())
        } else {
            Err(SheetLinkError::Storage("fast_kv is disabled".to_string()))
        }
    }

    /// 同步保存
    pub fn save(&self, snapshot: &PersistenceSnapshot) -> Result<()> {
        self.ensure_enabled()?;
        let bytes = snapshot.encode()?;
        if bytes.len() > self.quota_bytes {
            return Err(SheetLinkError::StorageQuotaExceeded {
                tier: Tier::Fast,
                needed: bytes.len(),
                limit: self.quota_bytes,
            });
        }

        // 每次保存使用独立的临时文件，并发保存只会互相覆盖完整快照
        let tmp = self.dir.join(format!("{SNAPSHOT_FILE}.{}.tmp", Uuid::new_v4().simple()));
        if let Err(err) = fs::write(&tmp, &bytes).and_then(|()| fs::rename(&tmp, self.snapshot_path())) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        tracing::debug!(bytes = bytes.len(), revision = snapshot.revision, "fast_kv snapshot saved");
        Ok(())
    }

    /// 同步读取
    pub fn load(&self) -> Result<Option<PersistenceSnapshot>> {
        self.ensure_enabled()?;
        match fs::read(self.snapshot_path()) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => PersistenceSnapshot::decode(&bytes).map(Some),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// 同步删除
    pub fn clear(&self) -> Result<()> {
        self.ensure_enabled()?;
        match fs::remove_file(self.snapshot_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl SnapshotTier for FastKv {
    fn tier(&self) -> Tier {
        Tier::Fast
    }

    async fn save_snapshot(&self, snapshot: &PersistenceSnapshot) -> Result<()> {
        self.save(snapshot)
    }

    async fn load_snapshot(&self) -> Result<Option<PersistenceSnapshot>> {
        self.load()
    }

    async fn clear_snapshot(&self) -> Result<()> {
        self.clear()
    }
}
