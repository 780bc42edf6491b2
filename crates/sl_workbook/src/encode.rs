//! 工作簿编码
//!
//! 写回时只生成一个工作表，原文件中的其他工作表会被丢弃。

use chrono::NaiveTime;
use rust_xlsxwriter::{Format, Workbook};

use sl_core::{CellValue, Dataset, Result, SheetLinkError};

const MAX_COLUMNS: usize = 16_384;

/// 把数据集编码为 xlsx 字节
pub fn encode(dataset: &Dataset, sheet_name: &str) -> Result<Vec<u8>> {
    if dataset.columns().len() > MAX_COLUMNS {
        return Err(SheetLinkError::Workbook(format!(
            "{} columns exceed the sheet limit of {MAX_COLUMNS}",
            dataset.columns().len()
        )));
    }

    let header_format = Format::new().set_bold();
    let date_format = Format::new().set_num_format("yyyy-mm-dd");
    let datetime_format = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet
        .set_name(sheet_name)
        .map_err(|e| SheetLinkError::Workbook(format!("invalid sheet name '{sheet_name}': {e}")))?;

    for (col, header) in dataset.columns().iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, header, &header_format)
            .map_err(xlsx_err)?;
    }

    for (idx, record) in dataset.records().iter().enumerate() {
        let row = u32::try_from(idx + 1)
            .map_err(|_| SheetLinkError::Workbook("too many rows".to_string()))?;
        for (col, header) in dataset.columns().iter().enumerate() {
            let col = col as u16;
            match record.get(header) {
                None | Some(CellValue::Empty) => {}
                Some(CellValue::Text(s)) => {
                    worksheet.write_string(row, col, s).map_err(xlsx_err)?;
                }
                Some(CellValue::Number(n)) => {
                    worksheet.write_number(row, col, *n).map_err(xlsx_err)?;
                }
                Some(CellValue::Bool(b)) => {
                    worksheet.write_boolean(row, col, *b).map_err(xlsx_err)?;
                }
                Some(CellValue::Date(d)) => {
                    let format = if d.time() == NaiveTime::MIN { &date_format } else { &datetime_format };
                    worksheet
                        .write_datetime_with_format(row, col, d, format)
                        .map_err(xlsx_err)?;
                }
            }
        }
    }

    workbook.save_to_buffer().map_err(xlsx_err)
}

fn xlsx_err(err: rust_xlsxwriter::XlsxError) -> SheetLinkError {
    SheetLinkError::Workbook(err.to_string())
}
