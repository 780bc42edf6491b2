//! 工作簿解码

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::NaiveDateTime;

use sl_core::{CellValue, ColumnMap, Dataset, Record, Result, SheetLinkError};

/// 解码结果
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedWorkbook {
    /// 实际读取的工作表
    pub sheet: String,
    /// 数据集
    pub dataset: Dataset,
    /// 本次导入发现的列映射
    pub column_map: ColumnMap,
}

/// 解码工作簿字节。优先读取名为 `preferred_sheet` 的工作表 (大小写不敏感)，不存在时读取第一个。
pub fn decode(bytes: &[u8], preferred_sheet: &str) -> Result<DecodedWorkbook> {
    if bytes.is_empty() {
        return Err(SheetLinkError::Parse("file is empty".to_string()));
    }

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| SheetLinkError::Parse(format!("not a readable workbook: {e}")))?;

    let names = workbook.sheet_names();
    let sheet = names
        .iter()
        .find(|n| n.trim().eq_ignore_ascii_case(preferred_sheet.trim()))
        .or_else(|| names.first())
        .cloned()
        .ok_or_else(|| SheetLinkError::Parse("workbook has no sheets".to_string()))?;

    if !sheet.trim().eq_ignore_ascii_case(preferred_sheet.trim()) {
        tracing::debug!(preferred = preferred_sheet, using = %sheet, "preferred sheet missing, falling back to first sheet");
    }

    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| SheetLinkError::Parse(format!("cannot read sheet '{sheet}': {e}")))?;

    let mut rows = range.rows().skip_while(|row| row.iter().all(is_blank));
    let header_row = rows
        .next()
        .ok_or_else(|| SheetLinkError::Parse(format!("sheet '{sheet}' has no header row")))?;
    let headers = header_names(header_row);

    let mut records = Vec::new();
    for row in rows {
        if row.iter().all(is_blank) {
            continue;
        }
        let mut record = Record::new();
        for (header, cell) in headers.iter().zip(row.iter()) {
            let value = to_cell_value(cell);
            if !value.is_empty() {
                record.insert(header.clone(), value);
            }
        }
        records.push(record);
    }

    let column_map = ColumnMap::discover(&headers);
    Ok(DecodedWorkbook {
        sheet,
        dataset: Dataset::new(headers, records),
        column_map,
    })
}

fn is_blank(cell: &Data) -> bool {
    match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// 表头: 空表头命名为 `COLUMNA_n`，重复表头追加序号
fn header_names(row: &[Data]) -> Vec<String> {
    let mut headers: Vec<String> = Vec::with_capacity(row.len());
    for (idx, cell) in row.iter().enumerate() {
        let raw = to_cell_value(cell).as_text().trim().to_string();
        let base = if raw.is_empty() { format!("COLUMNA_{}", idx + 1) } else { raw };
        let mut name = base.clone();
        let mut n = 2;
        while headers.contains(&name) {
            name = format!("{base}_{n}");
            n += 1;
        }
        headers.push(name);
    }
    headers
}

fn to_cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::text(s.clone()),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(CellValue::Date)
            .unwrap_or_else(|| CellValue::Number(dt.as_f64())),
        Data::DateTimeIso(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
            .map(CellValue::Date)
            .unwrap_or_else(|_| CellValue::text(s.clone())),
        Data::DurationIso(s) => CellValue::text(s.clone()),
        Data::Error(e) => CellValue::Text(e.to_string()),
    }
}
