use chrono::NaiveDate;
use rust_xlsxwriter::Workbook;
use sl_core::{CellValue, ColumnRole, Dataset, Record, SheetLinkError};
use sl_workbook::{decode, encode};

fn three_services() -> Dataset {
    let rows = [
        ("S-01", "CUBIERTO", "Ana", 2.0),
        ("S-02", "PENDIENTE", "Luis", 3.5),
        ("S-03", "CUBIERTO", "Marta", 1.0),
    ];
    let records = rows
        .iter()
        .map(|(svc, estado, titular, horas)| {
            let mut r = Record::new();
            r.insert("SERVICIO".into(), CellValue::text(*svc));
            r.insert("ESTADO".into(), CellValue::text(*estado));
            r.insert("TITULAR".into(), CellValue::text(*titular));
            r.insert("HORAS".into(), CellValue::Number(*horas));
            r
        })
        .collect();
    Dataset::new(
        vec!["SERVICIO".into(), "ESTADO".into(), "TITULAR".into(), "HORAS".into()],
        records,
    )
}

#[test]
fn test_encoded_dataset_decodes_back() {
    let mut ds = three_services();
    let end = NaiveDate::from_ymd_opt(2026, 11, 30).unwrap().and_hms_opt(0, 0, 0).unwrap();
    ds = ds
        .apply(&[
            sl_core::Patch::set(0, "ACTIVO", CellValue::Bool(true)),
            sl_core::Patch::set(1, "FIN CONTRATO", CellValue::Date(end)),
        ])
        .unwrap();

    let bytes = encode(&ds, "Datos").unwrap();
    let decoded = decode(&bytes, "Datos").unwrap();

    assert_eq!(decoded.sheet, "Datos");
    assert_eq!(decoded.dataset, ds);
    assert_eq!(decoded.column_map.column(ColumnRole::Incumbent), "TITULAR");
    assert!(decoded.column_map.is_fallback(ColumnRole::Substitute));
}

#[test]
fn test_decoding_same_bytes_twice_is_identical() {
    let bytes = encode(&three_services(), "Datos").unwrap();
    let first = decode(&bytes, "Datos").unwrap();
    let second = decode(&bytes, "Datos").unwrap();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_vec(&first.dataset).unwrap(),
        serde_json::to_vec(&second.dataset).unwrap()
    );
}

#[test]
fn test_preferred_sheet_and_fallback() {
    let mut workbook = Workbook::new();
    let notes = workbook.add_worksheet();
    notes.set_name("Notas").unwrap();
    notes.write_string(0, 0, "NOTA").unwrap();
    notes.write_string(1, 0, "ignorar").unwrap();
    let data = workbook.add_worksheet();
    data.set_name("datos").unwrap();
    data.write_string(0, 0, "SERVICIO").unwrap();
    data.write_string(1, 0, "S-77").unwrap();
    let bytes = workbook.save_to_buffer().unwrap();

    let preferred = decode(&bytes, "Datos").unwrap();
    assert_eq!(preferred.sheet, "datos");
    assert_eq!(preferred.dataset.get(0, "SERVICIO"), Some(&CellValue::text("S-77")));

    let fallback = decode(&bytes, "Coberturas").unwrap();
    assert_eq!(fallback.sheet, "Notas");
    assert_eq!(fallback.dataset.columns(), &["NOTA"]);
}

#[test]
fn test_encode_writes_single_sheet() {
    let bytes = encode(&three_services(), "Datos").unwrap();
    let decoded = decode(&bytes, "missing").unwrap();
    // 只有一个工作表，回退也落在它上面
    assert_eq!(decoded.sheet, "Datos");
}

#[test]
fn test_empty_and_garbage_are_parse_errors() {
    assert!(matches!(decode(&[], "Datos"), Err(SheetLinkError::Parse(_))));
    assert!(matches!(decode(b"not a workbook at all", "Datos"), Err(SheetLinkError::Parse(_))));
}

#[test]
fn test_blank_and_duplicate_headers() {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "TITULAR").unwrap();
    sheet.write_string(0, 2, "TITULAR").unwrap();
    sheet.write_string(1, 0, "Ana").unwrap();
    sheet.write_string(1, 1, "x").unwrap();
    sheet.write_string(1, 2, "Eva").unwrap();
    let bytes = workbook.save_to_buffer().unwrap();

    let decoded = decode(&bytes, "Datos").unwrap();
    assert_eq!(decoded.dataset.columns(), &["TITULAR", "COLUMNA_2", "TITULAR_2"]);
    assert_eq!(decoded.dataset.get(0, "TITULAR_2"), Some(&CellValue::text("Eva")));
}
