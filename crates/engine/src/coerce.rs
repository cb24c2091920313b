use std::collections::BTreeSet;

use crate::rules::DatasetRules;
use crate::table::Table;
use crate::value::{date_from_serial, parse_date, parse_number, DecimalStyle, Value};

/// Coerce every column of `table` to the type the dataset declares.
///
/// Declared date and numeric columns are parsed; unparseable cells become
/// empty and are reported once per column. All other columns become text,
/// so a code column read as a number from a workbook and the same column
/// read from a markup export end up identical.
pub fn coerce_table(table: &mut Table, rules: &DatasetRules) -> Vec<String> {
    let mut warnings = Vec::new();
    let dates: BTreeSet<&str> = rules.date_columns.iter().map(String::as_str).collect();
    let numbers: BTreeSet<&str> = rules.numeric_columns.iter().map(String::as_str).collect();

    for name in dates.iter().chain(numbers.iter()) {
        if table.column_index(name).is_none() {
            warnings.push(format!("declared column '{name}' not found in extract"));
        }
    }

    let columns: Vec<String> = table.columns().to_vec();
    for (idx, name) in columns.iter().enumerate() {
        let mut failed = 0usize;
        let mut first_bad: Option<String> = None;
        let mut note = |raw: String| {
            failed += 1;
            if first_bad.is_none() {
                first_bad = Some(raw);
            }
        };

        if dates.contains(name.as_str()) {
            table.for_each_in_column(idx, |cell| {
                if let Some(raw) = coerce_date(cell) {
                    note(raw);
                }
            });
            if failed > 0 {
                warnings.push(format!(
                    "column '{name}': {failed} value(s) not a date, first '{}'",
                    first_bad.unwrap_or_default()
                ));
            }
        } else if numbers.contains(name.as_str()) {
            let style = rules.decimal;
            table.for_each_in_column(idx, |cell| {
                if let Some(raw) = coerce_number(cell, style) {
                    note(raw);
                }
            });
            if failed > 0 {
                warnings.push(format!(
                    "column '{name}': {failed} value(s) not a number, first '{}'",
                    first_bad.unwrap_or_default()
                ));
            }
        } else {
            table.for_each_in_column(idx, coerce_text);
        }
    }

    warnings
}

/// Returns the raw text of a cell that could not be coerced.
fn coerce_date(cell: &mut Value) -> Option<String> {
    let parsed = match cell {
        Value::Empty | Value::Date(_) => return None,
        Value::Text(s) => parse_date(s),
        Value::Number(n) => date_from_serial(*n),
    };
    match parsed {
        Some(d) => {
            *cell = Value::Date(d);
            None
        }
        None => {
            let raw = cell.render();
            *cell = Value::Empty;
            (!raw.trim().is_empty()).then_some(raw)
        }
    }
}

fn coerce_number(cell: &mut Value, style: DecimalStyle) -> Option<String> {
    let parsed = match cell {
        Value::Empty => return None,
        Value::Number(n) if n.is_nan() => {
            *cell = Value::Empty;
            return None;
        }
        Value::Number(_) => return None,
        Value::Text(s) => parse_number(s, style),
        Value::Date(_) => None,
    };
    match parsed {
        Some(n) => {
            *cell = Value::Number(n);
            None
        }
        None => {
            let raw = cell.render();
            *cell = Value::Empty;
            (!raw.trim().is_empty()).then_some(raw)
        }
    }
}

fn coerce_text(cell: &mut Value) {
    match cell {
        Value::Number(_) | Value::Date(_) => *cell = Value::from_input(&cell.render()),
        Value::Text(s) if s.trim().is_empty() => *cell = Value::Empty,
        _ => {}
    }
}
