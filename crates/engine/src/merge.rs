use std::collections::HashSet;

use chrono::{Datelike, NaiveDate};

use crate::error::TableError;
use crate::table::Table;

/// Append `new` to `archive`.
///
/// The column name sets must match exactly; order may differ, and new rows
/// are projected onto the archive's column order. Archive rows come first.
pub fn append(dataset: &str, archive: &Table, new: &Table) -> Result<Table, TableError> {
    check_schema(dataset, archive, new)?;
    let projected = new.project(archive.columns());
    let mut rows: Vec<_> = archive.rows().to_vec();
    rows.extend(projected.into_rows());
    Table::with_rows(archive.columns().to_vec(), rows)
}

/// Like [`append`], but first drops archive rows whose `date_column` value
/// appears in the new table, so re-running a day replaces it.
pub fn replace_dates(
    dataset: &str,
    archive: &Table,
    new: &Table,
    date_column: &str,
) -> Result<Table, TableError> {
    check_schema(dataset, archive, new)?;
    let a_idx = archive.require_column(date_column)?;
    let n_idx = new.require_column(date_column)?;
    let incoming: HashSet<String> = new.column_values(n_idx).map(|v| v.key()).collect();

    let mut kept = archive.clone();
    kept.retain_rows(|row| !incoming.contains(&row[a_idx].key()));
    append(dataset, &kept, new)
}

/// Rows whose `date_column` falls in the same month as `reference`.
pub fn month_slice(table: &Table, date_column: &str, reference: NaiveDate) -> Result<Table, TableError> {
    let idx = table.require_column(date_column)?;
    let mut slice = table.clone();
    slice.retain_rows(|row| {
        row[idx]
            .as_date()
            .is_some_and(|d| d.year() == reference.year() && d.month() == reference.month())
    });
    Ok(slice)
}

fn check_schema(dataset: &str, archive: &Table, new: &Table) -> Result<(), TableError> {
    let a: HashSet<&String> = archive.columns().iter().collect();
    let n: HashSet<&String> = new.columns().iter().collect();
    if a == n {
        return Ok(());
    }
    let mut archive_only: Vec<String> = a.difference(&n).map(|s| s.to_string()).collect();
    let mut new_only: Vec<String> = n.difference(&a).map(|s| s.to_string()).collect();
    archive_only.sort();
    new_only.sort();
    Err(TableError::SchemaMismatch {
        dataset: dataset.to_string(),
        archive_only,
        new_only,
    })
}
