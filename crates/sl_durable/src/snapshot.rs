//! 持久化快照
//!
//! 快照携带 schema 版本。旧版无版本快照 (裸记录数组) 在加载时迁移到当前版本；
//! 版本高于当前构建的快照直接拒绝，不做猜测性解释。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sl_core::{CellValue, ColumnMap, Dataset, Record, Result, SheetLinkError};

/// 当前快照 schema 版本
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// 持久化快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceSnapshot {
    /// 快照 ID
    pub id: Uuid,
    /// schema 版本
    pub schema_version: u32,
    /// 保存时间
    pub saved_at: DateTime<Utc>,
    /// 保存时状态仓库的修订号
    pub revision: u64,
    /// 数据集
    pub dataset: Dataset,
    /// 列映射 (旧版快照没有)
    pub column_map: Option<ColumnMap>,
}

impl PersistenceSnapshot {
    /// 创建新快照
    pub fn new(dataset: Dataset, column_map: Option<ColumnMap>, revision: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at: Utc::now(),
            revision,
            dataset,
            column_map,
        }
    }

    /// 序列化
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// 反序列化，必要时迁移旧格式
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        if let serde_json::Value::Array(rows) = &value {
            return Ok(Self::migrate_legacy(rows));
        }

        match value.get("schema_version").and_then(|v| v.as_u64()) {
            Some(v) if v > u64::from(SNAPSHOT_SCHEMA_VERSION) => Err(SheetLinkError::Storage(format!(
                "snapshot schema version {v} is newer than supported version {SNAPSHOT_SCHEMA_VERSION}"
            ))),
            Some(_) => Ok(serde_json::from_value(value)?),
            None => match value.get("records").or_else(|| value.get("data")) {
                Some(serde_json::Value::Array(rows)) => Ok(Self::migrate_legacy(rows)),
                _ => Err(SheetLinkError::Storage("unrecognised snapshot shape".to_string())),
            },
        }
    }

    /// 旧版快照: 记录直接以 JSON 对象数组保存，没有版本号和列映射
    fn migrate_legacy(rows: &[serde_json::Value]) -> Self {
        let records: Vec<Record> = rows
            .iter()
            .filter_map(|row| row.as_object())
            .map(|obj| {
                obj.iter()
                    .map(|(k, v)| (k.clone(), CellValue::from_json(v)))
                    .filter(|(_, v)| !v.is_empty())
                    .collect()
            })
            .collect();
        tracing::info!(records = records.len(), "migrated legacy unversioned snapshot");

        let dataset = Dataset::new(Vec::new(), records);
        let column_map = ColumnMap::discover(dataset.columns());
        Self::new(dataset, Some(column_map), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_array_is_migrated() {
        let legacy = br#"[{"SERVICIO":"S-01","TITULAR":"Ana","HORAS":4},{"SERVICIO":"S-02","SUPLENTE":null}]"#;
        let snap = PersistenceSnapshot::decode(legacy).unwrap();
        assert_eq!(snap.schema_version, SNAPSHOT_SCHEMA_VERSION);
        assert_eq!(snap.dataset.len(), 2);
        assert_eq!(snap.dataset.get(0, "HORAS"), Some(&CellValue::Number(4.0)));
        assert_eq!(snap.dataset.get(1, "SUPLENTE"), None);
        assert!(snap.column_map.is_some());
    }

    #[test]
    fn test_future_version_rejected() {
        let future = br#"{"schema_version": 99, "dataset": {}}"#;
        assert!(matches!(PersistenceSnapshot::decode(future), Err(SheetLinkError::Storage(_))));
    }

    #[test]
    fn test_current_version_decodes() {
        let snap = PersistenceSnapshot::new(Dataset::empty(), None, 7);
        let decoded = PersistenceSnapshot::decode(&snap.encode().unwrap()).unwrap();
        assert_eq!(decoded, snap);
    }
}
