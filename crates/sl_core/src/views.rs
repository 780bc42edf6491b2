//! 派生视图
//!
//! 通过已发现的列映射从数据集计算出的只读子集合，供渲染层与各类启发式引擎消费。

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::columns::{normalize_header, ColumnMap, ColumnRole};
use crate::dataset::Dataset;

const COVERED: &str = "CUBIERTO";
const ACTIVE_HEALTH: [&str; 2] = ["ACTIVO", "ALTA"];

/// 派生视图 (记录下标)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DerivedViews {
    /// 覆盖状态不是 "CUBIERTO" 的服务
    pub uncovered: Vec<usize>,
    /// 在岗员工处于缺勤状态
    pub on_leave: Vec<usize>,
    /// 合同将在观察窗口内到期
    pub contracts_ending: Vec<usize>,
}

impl DerivedViews {
    pub fn compute(dataset: &Dataset, map: &ColumnMap, today: NaiveDate, horizon_days: u32) -> Self {
        let service = map.column(ColumnRole::Service);
        let coverage = map.column(ColumnRole::Coverage);
        let health = map.column(ColumnRole::Health);
        let contract_end = map.column(ColumnRole::ContractEnd);
        let horizon_end = today + Duration::days(i64::from(horizon_days));

        let mut views = DerivedViews::default();
        for (idx, record) in dataset.records().iter().enumerate() {
            // 没有服务标识的行视为空行
            if record.get(service).map(|v| v.is_empty()).unwrap_or(true) {
                continue;
            }

            let status = record.get(coverage).map(|v| normalize_header(&v.as_text())).unwrap_or_default();
            if status != COVERED {
                views.uncovered.push(idx);
            }

            let health_status = record.get(health).map(|v| normalize_header(&v.as_text())).unwrap_or_default();
            if !health_status.is_empty() && !ACTIVE_HEALTH.contains(&health_status.as_str()) {
                views.on_leave.push(idx);
            }

            if let Some(end) = record.get(contract_end).and_then(|v| v.as_date()) {
                if end >= today && end <= horizon_end {
                    views.contracts_ending.push(idx);
                }
            }
        }
        views
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{CellValue, Record};

    fn row(service: &str, estado: &str, salud: &str, fin: &str) -> Record {
        let mut r = Record::new();
        r.insert("SERVICIO".into(), CellValue::text(service));
        r.insert("ESTADO".into(), CellValue::text(estado));
        r.insert("SITUACION".into(), CellValue::text(salud));
        r.insert("FIN CONTRATO".into(), CellValue::text(fin));
        r
    }

    #[test]
    fn test_views_through_column_map() {
        let ds = Dataset::new(
            vec![],
            vec![
                row("S1", "cubierto", "Activo", "2026-12-31"),
                row("S2", "Pendiente", "Baja médica", "2026-10-20"),
                row("", "Pendiente", "", ""),
                row("S4", "", "", "01/11/2026"),
            ],
        );
        let map = ColumnMap::discover(ds.columns());
        let today = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let views = DerivedViews::compute(&ds, &map, today, 30);

        assert_eq!(views.uncovered, vec![1, 3]);
        assert_eq!(views.on_leave, vec![1]);
        assert_eq!(views.contracts_ending, vec![1, 3]);
    }
}
