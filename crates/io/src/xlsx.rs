// Excel workbook import/export
//
// Import reads the first worksheet of an OLE (.xls) or zipped (.xlsx)
// workbook through calamine, detecting the container from the bytes rather
// than the file extension. Export writes a single typed worksheet with
// rust_xlsxwriter.

use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_auto_from_rs, Data, Reader, Sheets};
use chrono::NaiveDate;
use reportflow_engine::value::{date_from_serial, parse_date};
use reportflow_engine::{ColumnType, Table, Value};
use rust_xlsxwriter::{Format, Workbook as XlsxWorkbook};

/// Sheet name for normalized exports.
pub const SHEET_NAME: &str = "Datos";

/// Excel's date epoch for serial day numbers.
fn excel_epoch() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1899, 12, 30)
}

/// Read the first worksheet as a grid of cells.
pub fn read_grid(bytes: Vec<u8>) -> Result<Vec<Vec<Value>>, String> {
    let mut workbook: Sheets<_> = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| format!("Failed to open Excel file: {}", e))?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let Some(first) = sheet_names.first() else {
        return Err("Excel file contains no sheets".to_string());
    };

    let range = workbook
        .worksheet_range(first)
        .map_err(|e| format!("Failed to read sheet '{}': {}", first, e))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_value).collect())
        .collect())
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Empty,
        Data::String(s) => Value::from_input(s),
        Data::Float(n) => Value::Number(*n),
        Data::Int(n) => Value::Number(*n as f64),
        Data::Bool(b) => Value::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Data::Error(e) => Value::Text(e.to_string()),
        Data::DateTime(dt) => {
            // Time-only cells (serial < 1) stay numeric; date coercion
            // decides what to do with them.
            let serial = dt.as_f64();
            match date_from_serial(serial) {
                Some(d) => Value::Date(d),
                None => Value::Number(serial),
            }
        }
        Data::DateTimeIso(s) => match parse_date(s) {
            Some(d) => Value::Date(d),
            None => Value::from_input(s),
        },
        Data::DurationIso(s) => Value::from_input(s),
    }
}

/// Write `table` as a single-sheet workbook: a bold header row, numbers as
/// numbers and dates as date-formatted serials.
pub fn export(table: &Table, path: &Path) -> Result<(), String> {
    let mut xlsx_workbook = XlsxWorkbook::new();
    let worksheet = xlsx_workbook
        .add_worksheet()
        .set_name(SHEET_NAME)
        .map_err(|e| format!("Failed to create sheet '{}': {}", SHEET_NAME, e))?;

    let header_format = Format::new().set_bold();
    let date_format = Format::new().set_num_format("dd.mm.yyyy");
    let epoch = excel_epoch().ok_or("invalid Excel epoch")?;

    for (col, name) in table.columns().iter().enumerate() {
        let col16 = u16::try_from(col).map_err(|_| "too many columns for XLSX".to_string())?;
        worksheet
            .write_string_with_format(0, col16, name, &header_format)
            .map_err(|e| format!("Failed to write header '{}': {}", name, e))?;
    }

    let types: Vec<ColumnType> = (0..table.column_count()).map(|c| table.column_type(c)).collect();

    for (row_idx, row) in table.rows().iter().enumerate() {
        let row32 = u32::try_from(row_idx + 1).map_err(|_| "too many rows for XLSX".to_string())?;
        for (col, value) in row.iter().enumerate() {
            let col16 = col as u16;
            let written = match (value, types[col]) {
                (Value::Empty, _) => continue,
                (Value::Number(n), ColumnType::Number) => worksheet.write_number(row32, col16, *n),
                (Value::Date(d), ColumnType::Date) => {
                    let serial = (*d - epoch).num_days() as f64;
                    worksheet.write_number_with_format(row32, col16, serial, &date_format)
                }
                (other, _) => worksheet.write_string(row32, col16, other.render()),
            };
            written.map_err(|e| format!("Failed to write cell ({}, {}): {}", row_idx + 1, col, e))?;
        }
    }

    xlsx_workbook
        .save(path)
        .map_err(|e| format!("Failed to save XLSX file: {}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::with_rows(
            vec!["Entrega".into(), "Cajas".into(), "Fecha".into()],
            vec![
                vec![
                    Value::Text("8001".into()),
                    Value::Number(12.5),
                    Value::Date(NaiveDate::from_ymd_opt(2025, 9, 27).unwrap()),
                ],
                vec![Value::Text("8002".into()), Value::Empty, Value::Empty],
            ],
        )
        .unwrap()
    }

    #[test]
    fn export_then_read_first_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xlsx");
        export(&sample(), &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let grid = read_grid(bytes).unwrap();
        assert_eq!(grid.len(), 3);
        assert_eq!(grid[0][0], Value::Text("Entrega".into()));
        assert_eq!(grid[1][0], Value::Text("8001".into()));
        assert_eq!(grid[1][1], Value::Number(12.5));
        assert_eq!(grid[1][2], Value::Date(NaiveDate::from_ymd_opt(2025, 9, 27).unwrap()));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(read_grid(b"not a workbook".to_vec()).is_err());
    }
}
