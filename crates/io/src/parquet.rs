// Parquet export/import via polars
//
// Column types map one to one: text → String, number → Float64,
// date → Date (days since 1970-01-01). Empty cells are nulls.

use std::fs::File;
use std::path::Path;

use chrono::NaiveDate;
use polars::prelude::*;
use reportflow_engine::{ColumnType, Table, Value};

fn unix_epoch() -> NaiveDate {
    NaiveDate::default()
}

pub fn export(table: &Table, path: &Path) -> Result<(), String> {
    let mut df = to_frame(table).map_err(|e| format!("Failed to build frame: {}", e))?;
    let mut file = File::create(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    ParquetWriter::new(&mut file)
        .finish(&mut df)
        .map_err(|e| format!("Failed to write parquet {}: {}", path.display(), e))?;
    Ok(())
}

pub fn import(path: &Path) -> Result<Table, String> {
    let file = File::open(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| format!("Failed to read parquet {}: {}", path.display(), e))?;
    from_frame(&df).map_err(|e| format!("Failed to decode parquet {}: {}", path.display(), e))
}

fn to_frame(table: &Table) -> PolarsResult<DataFrame> {
    let mut columns = Vec::with_capacity(table.column_count());
    for (idx, (name, ty)) in table.schema().into_iter().enumerate() {
        let column = match ty {
            ColumnType::Number => {
                let values: Vec<Option<f64>> = table.column_values(idx).map(Value::as_number).collect();
                Column::new(name.into(), values)
            }
            ColumnType::Date => {
                let epoch = unix_epoch();
                let values: Vec<Option<i32>> = table
                    .column_values(idx)
                    .map(|v| v.as_date().map(|d| (d - epoch).num_days() as i32))
                    .collect();
                Column::new(name.into(), values).cast(&DataType::Date)?
            }
            ColumnType::Text => {
                let values: Vec<Option<String>> = table
                    .column_values(idx)
                    .map(|v| (!v.is_empty()).then(|| v.render()))
                    .collect();
                Column::new(name.into(), values)
            }
        };
        columns.push(column);
    }
    DataFrame::new(columns)
}

fn from_frame(df: &DataFrame) -> PolarsResult<Table> {
    let height = df.height();
    let mut names = Vec::with_capacity(df.width());
    let mut decoded: Vec<Vec<Value>> = Vec::with_capacity(df.width());

    for column in df.get_columns() {
        names.push(column.name().to_string());
        let series = column.as_materialized_series();
        let values: Vec<Value> = match series.dtype() {
            DataType::Date => {
                let epoch = unix_epoch();
                series
                    .cast(&DataType::Int32)?
                    .i32()?
                    .into_iter()
                    .map(|d| match d {
                        Some(days) => epoch
                            .checked_add_signed(chrono::TimeDelta::days(days as i64))
                            .map(Value::Date)
                            .unwrap_or(Value::Empty),
                        None => Value::Empty,
                    })
                    .collect()
            }
            dt if dt.is_primitive_numeric() => series
                .cast(&DataType::Float64)?
                .f64()?
                .into_iter()
                .map(|n| n.map(Value::Number).unwrap_or(Value::Empty))
                .collect(),
            _ => series
                .cast(&DataType::String)?
                .str()?
                .into_iter()
                .map(|s| s.map(Value::from_input).unwrap_or(Value::Empty))
                .collect(),
        };
        decoded.push(values);
    }

    let mut rows: Vec<Vec<Value>> = (0..height).map(|_| Vec::with_capacity(names.len())).collect();
    for column in decoded {
        for (row, value) in rows.iter_mut().zip(column) {
            row.push(value);
        }
    }
    Table::with_rows(names, rows).map_err(|e| PolarsError::ComputeError(e.to_string().into()))
}
