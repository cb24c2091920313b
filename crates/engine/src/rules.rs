//! Per-dataset row rules.
//!
//! Rules are declared in configuration and applied in a fixed order:
//! keep columns, filter, fill, remap, year, aggregate, rename, primary-key
//! dedup, first-occurrence flags, calendar columns.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use tracing::debug;

use crate::error::TableError;
use crate::table::Table;
use crate::value::{DecimalStyle, Value};

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetRules {
    #[serde(default)]
    pub date_columns: Vec<String>,
    #[serde(default)]
    pub numeric_columns: Vec<String>,
    #[serde(default)]
    pub decimal: DecimalStyle,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub keep_columns: Vec<String>,
    #[serde(default)]
    pub filter: Vec<RowFilter>,
    #[serde(default)]
    pub fill: BTreeMap<String, String>,
    #[serde(default)]
    pub remap: Vec<RemapRule>,
    #[serde(default)]
    pub year: Option<YearFilter>,
    #[serde(default)]
    pub aggregate: Option<AggregateRule>,
    #[serde(default)]
    pub rename: BTreeMap<String, String>,
    #[serde(default)]
    pub first_occurrence: Vec<FirstOccurrence>,
    /// Date column to derive calendar columns from.
    #[serde(default)]
    pub calendar: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RowFilter {
    pub column: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemapRule {
    pub column: String,
    pub table: BTreeMap<String, String>,
    /// Replacement for unknown, missing and not-available values.
    #[serde(default = "default_remap_fallback")]
    pub default: String,
    #[serde(default = "default_missing_markers")]
    pub missing_markers: Vec<String>,
}

fn default_remap_fallback() -> String {
    "OTROS".to_string()
}

fn default_missing_markers() -> Vec<String> {
    vec!["#N/A".to_string(), "N/A".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YearFilter {
    pub column: String,
    pub year: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateRule {
    pub group_by: Vec<String>,
    /// Columns to sum. Empty means every numeric column outside the key.
    #[serde(default)]
    pub sum: Vec<String>,
    /// Optional name for a row-count column.
    #[serde(default)]
    pub count_column: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FirstOccurrence {
    /// Name of the flag column to add.
    pub column: String,
    /// Column whose first occurrence gets 1.
    pub key: String,
}

pub const CALENDAR_COLUMNS: [&str; 5] = ["Año", "Mes", "Día", "Día_Semana", "Semana"];

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

impl DatasetRules {
    /// Apply all row rules. Soft problems are returned as warnings; a rule
    /// that references a column the table lacks is an error only when the
    /// rule cannot be meaningfully skipped (aggregate keys, flag keys).
    pub fn apply(&self, table: Table) -> Result<(Table, Vec<String>), TableError> {
        let mut warnings = Vec::new();
        let mut table = table;

        if !self.keep_columns.is_empty() {
            for name in &self.keep_columns {
                if table.column_index(name).is_none() {
                    warnings.push(format!("keep_columns: '{name}' not in extract"));
                }
            }
            table = table.project(&self.keep_columns);
        }

        for f in &self.filter {
            let before = table.row_count();
            apply_filter(&mut table, f, &mut warnings);
            debug!(column = %f.column, removed = before - table.row_count(), "filter applied");
        }

        for (column, value) in &self.fill {
            match table.column_index(column) {
                Some(idx) => table.for_each_in_column(idx, |cell| {
                    if cell.is_empty() {
                        *cell = Value::Text(value.clone());
                    }
                }),
                None => warnings.push(format!("fill: '{column}' not in extract")),
            }
        }

        for rule in &self.remap {
            match table.column_index(&rule.column) {
                Some(idx) => table.for_each_in_column(idx, |cell| remap_cell(cell, rule)),
                None => warnings.push(format!("remap: '{}' not in extract", rule.column)),
            }
        }

        if let Some(y) = &self.year {
            match table.column_index(&y.column) {
                Some(idx) => table.retain_rows(|row| {
                    row[idx].as_date().is_some_and(|d| d.year() == y.year)
                }),
                None => warnings.push(format!("year: '{}' not in extract", y.column)),
            }
        }

        if let Some(agg) = &self.aggregate {
            table = aggregate(&table, agg)?;
        }

        for (from, to) in &self.rename {
            if !table.rename_column(from, to)? {
                warnings.push(format!("rename: '{from}' not in table"));
            }
        }

        if !self.primary_key.is_empty() {
            let removed = dedup_by_key(&mut table, &self.primary_key)?;
            if removed > 0 {
                warnings.push(format!("{removed} duplicate row(s) dropped by primary key"));
            }
        }

        for flag in &self.first_occurrence {
            add_first_occurrence_flag(&mut table, &flag.key, &flag.column)?;
        }

        if let Some(column) = &self.calendar {
            match table.column_index(column) {
                Some(idx) => add_calendar_columns(&mut table, idx)?,
                None => warnings.push(format!("calendar: '{column}' not in table")),
            }
        }

        Ok((table, warnings))
    }
}

fn apply_filter(table: &mut Table, filter: &RowFilter, warnings: &mut Vec<String>) {
    let Some(idx) = table.column_index(&filter.column) else {
        warnings.push(format!("filter: '{}' not in extract", filter.column));
        return;
    };
    let allowed: HashSet<&str> = filter.values.iter().map(|v| v.trim()).collect();
    table.retain_rows(|row| allowed.contains(row[idx].key().as_str()));
}

fn remap_cell(cell: &mut Value, rule: &RemapRule) {
    let key = cell.key();
    let mapped = if cell.is_empty() || rule.missing_markers.iter().any(|m| m == &key) {
        &rule.default
    } else {
        rule.table.get(&key).unwrap_or(&rule.default)
    };
    *cell = Value::Text(mapped.clone());
}

/// Group rows by `rule.group_by`, summing numeric columns.
///
/// Output rows follow the first appearance of each group; output columns are the key columns,
/// then the summed columns, then the optional count column.
pub fn aggregate(table: &Table, rule: &AggregateRule) -> Result<Table, TableError> {
    let key_idx: Vec<usize> = rule
        .group_by
        .iter()
        .map(|c| table.require_column(c))
        .collect::<Result<_, _>>()?;

    let sum_names: Vec<String> = if rule.sum.is_empty() {
        table
            .schema()
            .into_iter()
            .enumerate()
            .filter(|(i, (_, ty))| {
                !key_idx.contains(i) && *ty == crate::value::ColumnType::Number
            })
            .map(|(_, (name, _))| name)
            .collect()
    } else {
        rule.sum.clone()
    };
    let sum_idx: Vec<usize> = sum_names
        .iter()
        .map(|c| table.require_column(c))
        .collect::<Result<_, _>>()?;

    // Groups in first-seen order; `slots` maps a key to its position.
    let mut groups: Vec<(Vec<Value>, Vec<f64>, usize)> = Vec::new();
    let mut slots: HashMap<Vec<String>, usize> = HashMap::new();
    for row in table.rows() {
        let key: Vec<String> = key_idx.iter().map(|i| row[*i].key()).collect();
        let slot = *slots.entry(key).or_insert_with(|| {
            let first = key_idx.iter().map(|i| row[*i].clone()).collect();
            groups.push((first, vec![0.0; sum_idx.len()], 0));
            groups.len() - 1
        });
        let entry = &mut groups[slot];
        for (slot, i) in entry.1.iter_mut().zip(&sum_idx) {
            *slot += row[*i].as_number().unwrap_or(0.0);
        }
        entry.2 += 1;
    }

    let mut columns = rule.group_by.clone();
    columns.extend(sum_names);
    if let Some(count) = &rule.count_column {
        columns.push(count.clone());
    }

    let mut out = Table::new(columns)?;
    for (key_values, sums, count) in groups {
        let mut row = key_values;
        row.extend(sums.into_iter().map(Value::Number));
        if rule.count_column.is_some() {
            row.push(Value::Number(count as f64));
        }
        out.push_row(row)?;
    }
    Ok(out)
}

/// Drop rows whose key repeats an earlier row. Returns how many were dropped.
pub fn dedup_by_key(table: &mut Table, key: &[String]) -> Result<usize, TableError> {
    let idx: Vec<usize> = key
        .iter()
        .map(|c| table.require_column(c))
        .collect::<Result<_, _>>()?;
    let before = table.row_count();
    let mut seen: HashSet<Vec<String>> = HashSet::new();
    table.retain_rows(|row| seen.insert(idx.iter().map(|i| row[*i].key()).collect()));
    Ok(before - table.row_count())
}

/// Add `flag` = 1 on the first row carrying each value of `key`, 0 after.
pub fn add_first_occurrence_flag(table: &mut Table, key: &str, flag: &str) -> Result<(), TableError> {
    let idx = table.require_column(key)?;
    let mut seen: HashSet<String> = HashSet::new();
    let values = table
        .column_values(idx)
        .map(|v| Value::Number(if seen.insert(v.key()) { 1.0 } else { 0.0 }))
        .collect();
    table.add_column(flag, values)
}

fn add_calendar_columns(table: &mut Table, idx: usize) -> Result<(), TableError> {
    let dates: Vec<Option<NaiveDate>> = table.column_values(idx).map(Value::as_date).collect();
    let derive = |f: &dyn Fn(NaiveDate) -> Value| -> Vec<Value> {
        dates.iter().map(|d| d.map(f).unwrap_or(Value::Empty)).collect()
    };
    let year = derive(&|d| Value::Number(d.year() as f64));
    let month = derive(&|d| Value::Number(d.month() as f64));
    let day = derive(&|d| Value::Number(d.day() as f64));
    let weekday = derive(&|d| Value::Text(weekday_name(d).to_string()));
    let week = derive(&|d| Value::Number(d.iso_week().week() as f64));

    for (name, values) in CALENDAR_COLUMNS.iter().zip([year, month, day, weekday, week]) {
        table.add_column(name, values)?;
    }
    Ok(())
}

fn weekday_name(d: NaiveDate) -> &'static str {
    use chrono::Weekday::*;
    match d.weekday() {
        Mon => "Monday",
        Tue => "Tuesday",
        Wed => "Wednesday",
        Thu => "Thursday",
        Fri => "Friday",
        Sat => "Saturday",
        Sun => "Sunday",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
