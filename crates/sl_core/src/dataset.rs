//! 运营数据集定义
//!
//! 数据集是有序的记录序列，每条记录是列名到标量值的映射。列集合不在编译期固定，
//! 导入时由表头决定。

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SheetLinkError};

/// 单元格标量值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDateTime),
}

impl CellValue {
    /// 从文本构造，空白文本视为空值
    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.trim().is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value)
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// 用于展示与模糊比较的文本形式
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            CellValue::Number(n) => n.to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Date(d) if d.time() == chrono::NaiveTime::MIN => d.date().to_string(),
            CellValue::Date(d) => d.to_string(),
        }
    }

    /// 尝试解释为日期 (日期单元格或 `YYYY-MM-DD` / `DD/MM/YYYY` 文本)
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            CellValue::Date(d) => Some(d.date()),
            CellValue::Text(s) => {
                let s = s.trim();
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .or_else(|_| NaiveDate::parse_from_str(s, "%d/%m/%Y"))
                    .ok()
            }
            _ => None,
        }
    }

    /// 从旧版快照中的原始 JSON 标量转换
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CellValue::Empty,
            serde_json::Value::Bool(b) => CellValue::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map(CellValue::Number).unwrap_or_default(),
            serde_json::Value::String(s) => CellValue::text(s.clone()),
            other => CellValue::Text(other.to_string()),
        }
    }
}

/// 一条记录: 列名 -> 值
pub type Record = BTreeMap<String, CellValue>;

/// 有序数据集
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dataset {
    /// 列顺序 (写回工作簿时保持)
    columns: Vec<String>,
    /// 记录序列
    records: Vec<Record>,
}

impl Dataset {
    /// 创建数据集；记录中出现但不在列清单里的列会按出现顺序追加
    pub fn new(columns: Vec<String>, records: Vec<Record>) -> Self {
        let mut dataset = Self { columns, records: Vec::new() };
        for record in &records {
            dataset.register_columns(record);
        }
        dataset.records = records;
        dataset
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&CellValue> {
        self.records.get(row).and_then(|r| r.get(column))
    }

    /// 应用一批补丁，返回新的数据集。任一补丁非法时整体拒绝，原数据集不受影响。
    pub fn apply(&self, patches: &[Patch]) -> Result<Dataset> {
        if patches.is_empty() {
            return Err(SheetLinkError::InvalidPatch("empty patch batch".to_string()));
        }

        let mut next = self.clone();
        for (idx, patch) in patches.iter().enumerate() {
            next.apply_one(patch)
                .map_err(|reason| SheetLinkError::InvalidPatch(format!("patch #{idx}: {reason}")))?;
        }
        Ok(next)
    }

    fn apply_one(&mut self, patch: &Patch) -> std::result::Result<(), String> {
        match patch {
            Patch::Set { row, column, value } => {
                let column = column.trim();
                if column.is_empty() {
                    return Err("column name is empty".to_string());
                }
                let len = self.records.len();
                let record = self
                    .records
                    .get_mut(*row)
                    .ok_or_else(|| format!("row {row} out of range (len {len})"))?;
                record.insert(column.to_string(), value.clone());
                if !self.columns.iter().any(|c| c == column) {
                    self.columns.push(column.to_string());
                }
            }
            Patch::Insert { at, record } => {
                if record.keys().any(|k| k.trim().is_empty()) {
                    return Err("record contains an empty column name".to_string());
                }
                let at = at.unwrap_or(self.records.len());
                if at > self.records.len() {
                    return Err(format!("insert position {at} out of range (len {})", self.records.len()));
                }
                self.register_columns(record);
                self.records.insert(at, record.clone());
            }
            Patch::Remove { row } => {
                if *row >= self.records.len() {
                    return Err(format!("row {row} out of range (len {})", self.records.len()));
                }
                self.records.remove(*row);
            }
        }
        Ok(())
    }

    fn register_columns(&mut self, record: &Record) {
        for key in record.keys() {
            if !self.columns.iter().any(|c| c == key) {
                self.columns.push(key.clone());
            }
        }
    }
}

/// 对数据集的一次原子修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Patch {
    /// 设置某行某列的值
    Set { row: usize, column: String, value: CellValue },
    /// 插入记录 (`at` 为空时追加到末尾)
    Insert { at: Option<usize>, record: Record },
    /// 删除记录
    Remove { row: usize },
}

impl Patch {
    pub fn set(row: usize, column: impl Into<String>, value: CellValue) -> Self {
        Patch::Set { row, column: column.into(), value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        let mut a = Record::new();
        a.insert("SERVICIO".into(), CellValue::text("Limpieza"));
        a.insert("TITULAR".into(), CellValue::text("Ana"));
        let mut b = Record::new();
        b.insert("SERVICIO".into(), CellValue::text("Cocina"));
        b.insert("TITULAR".into(), CellValue::text("Luis"));
        Dataset::new(vec!["SERVICIO".into(), "TITULAR".into()], vec![a, b])
    }

    #[test]
    fn test_apply_set_creates_new_column() {
        let ds = sample();
        let next = ds.apply(&[Patch::set(1, "SUPLENTE", CellValue::text("Marta"))]).unwrap();
        assert_eq!(next.columns(), &["SERVICIO", "TITULAR", "SUPLENTE"]);
        assert_eq!(next.get(1, "SUPLENTE"), Some(&CellValue::text("Marta")));
        // 原数据集不变
        assert_eq!(ds.get(1, "SUPLENTE"), None);
    }

    #[test]
    fn test_invalid_batch_is_rejected_whole() {
        let ds = sample();
        let err = ds
            .apply(&[
                Patch::set(0, "TITULAR", CellValue::text("Eva")),
                Patch::Remove { row: 7 },
            ])
            .unwrap_err();
        assert!(matches!(err, SheetLinkError::InvalidPatch(_)));
        assert_eq!(ds.get(0, "TITULAR"), Some(&CellValue::text("Ana")));
    }

    #[test]
    fn test_empty_column_rejected() {
        let ds = sample();
        assert!(ds.apply(&[Patch::set(0, "  ", CellValue::Bool(true))]).is_err());
        assert!(ds.apply(&[]).is_err());
    }

    #[test]
    fn test_insert_and_remove() {
        let ds = sample();
        let mut rec = Record::new();
        rec.insert("SERVICIO".into(), CellValue::text("Lavandería"));
        let next = ds
            .apply(&[Patch::Insert { at: Some(0), record: rec }, Patch::Remove { row: 2 }])
            .unwrap();
        assert_eq!(next.len(), 2);
        assert_eq!(next.get(0, "SERVICIO"), Some(&CellValue::text("Lavandería")));
        assert_eq!(next.get(1, "SERVICIO"), Some(&CellValue::text("Limpieza")));
    }

    #[test]
    fn test_cell_value_text_and_date() {
        assert_eq!(CellValue::Number(42.0).as_text(), "42");
        assert_eq!(CellValue::text("   "), CellValue::Empty);
        assert_eq!(
            CellValue::text("31/12/2026").as_date(),
            NaiveDate::from_ymd_opt(2026, 12, 31)
        );
        assert_eq!(CellValue::from_json(&serde_json::json!(null)), CellValue::Empty);
        assert_eq!(CellValue::from_json(&serde_json::json!(3)), CellValue::Number(3.0));
    }
}
