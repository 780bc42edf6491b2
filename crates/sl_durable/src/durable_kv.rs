//! DurableKV - 异步、大容量的 SQLite 持久层
//!
//! 主存储层，同时是唯一能保存外部文件能力令牌的地方。

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use sl_core::{Result, SheetLinkError, Tier};

use crate::snapshot::PersistenceSnapshot;
use crate::tier::SnapshotTier;

/// 能力令牌的固定槽位
pub const HANDLE_SLOT: &str = "sheetlink.file_handle";

/// 快照槽位
pub const SNAPSHOT_SLOT: &str = "sheetlink.snapshot";

/// SQLITE_FULL
const SQLITE_FULL: &str = "13";

/// DurableKV 存储
#[derive(Debug, Clone)]
pub struct DurableKv {
    pool: SqlitePool,
}

impl DurableKv {
    /// 连接数据库并建表
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db_err)?
            .create_if_missing(true);

        // 单连接: 内存库在连接之间不共享，且写入本身就是串行的
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(db_err)?;

        tracing::debug!(url, "durable_kv connected");
        Ok(Self { pool })
    }

    /// 内存数据库 (测试与无盘运行)
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// 写入键值
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|err| {
            let full = matches!(&err, sqlx::Error::Database(db) if db.code().as_deref() == Some(SQLITE_FULL));
            if full {
                SheetLinkError::StorageQuotaExceeded { tier: Tier::Durable, needed: value.len(), limit: 0 }
            } else {
                db_err(err)
            }
        })?;
        Ok(())
    }

    /// 读取键值
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| r.try_get::<Vec<u8>, _>("value").map_err(db_err)).transpose()
    }

    /// 删除键
    pub async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// 关闭连接池；之后的所有操作都会失败
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SnapshotTier for DurableKv {
    fn tier(&self) -> Tier {
        Tier::Durable
    }

    async fn save_snapshot(&self, snapshot: &PersistenceSnapshot) -> Result<()> {
        let bytes = snapshot.encode()?;
        self.put(SNAPSHOT_SLOT, &bytes).await?;
        tracing::debug!(bytes = bytes.len(), revision = snapshot.revision, "durable_kv snapshot saved");
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<PersistenceSnapshot>> {
        match self.get(SNAPSHOT_SLOT).await? {
            Some(bytes) if !bytes.is_empty() => PersistenceSnapshot::decode(&bytes).map(Some),
            _ => Ok(None),
        }
    }

    async fn clear_snapshot(&self) -> Result<()> {
        self.delete(SNAPSHOT_SLOT).await
    }
}

fn db_err(err: sqlx::Error) -> SheetLinkError {
    SheetLinkError::Storage(format!("durable_kv: {err}"))
}
