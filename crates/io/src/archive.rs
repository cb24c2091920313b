//! Year-to-date archives.
//!
//! An archive is a parquet file holding every row consolidated so far for
//! one dataset. Writes go to a `.part` sibling and are renamed into place,
//! so a crash never leaves a half-written archive behind.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::info;

use reportflow_engine::{merge, Table};

use crate::error::IoError;
use crate::parquet;

/// Consolidation settings for one dataset.
#[derive(Debug, Clone, Default)]
pub struct ConsolidateOptions {
    /// Drop archive rows on dates the new table carries before appending.
    pub replace_existing_dates: Option<String>,
    /// Write a current-month sibling filtered on this date column.
    pub current_month: Option<CurrentMonth>,
}

#[derive(Debug, Clone)]
pub struct CurrentMonth {
    pub date_column: String,
    pub reference: NaiveDate,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ConsolidateOutcome {
    pub archive_path: PathBuf,
    /// True when no archive existed and the new table became it.
    pub created: bool,
    pub rows: usize,
    pub current_month_path: Option<PathBuf>,
}

/// Merge `new_table` into the archive at `archive_path`.
///
/// On a schema mismatch the archive is left untouched.
pub fn consolidate(
    dataset_id: &str,
    new_table: &Table,
    archive_path: &Path,
    options: &ConsolidateOptions,
) -> Result<ConsolidateOutcome, IoError> {
    let (combined, created) = if archive_path.exists() {
        let archive = parquet::import(archive_path).map_err(|e| IoError::unreadable(archive_path, e))?;
        let combined = match &options.replace_existing_dates {
            Some(column) => merge::replace_dates(dataset_id, &archive, new_table, column)?,
            None => merge::append(dataset_id, &archive, new_table)?,
        };
        (combined, false)
    } else {
        (new_table.clone(), true)
    };

    write_atomic(archive_path, |tmp| parquet::export(&combined, tmp))?;
    info!(
        dataset = dataset_id,
        path = %archive_path.display(),
        rows = combined.row_count(),
        created,
        "archive written"
    );

    let current_month_path = match &options.current_month {
        Some(cm) => {
            let slice = merge::month_slice(&combined, &cm.date_column, cm.reference)?;
            write_atomic(&cm.path, |tmp| parquet::export(&slice, tmp))?;
            info!(dataset = dataset_id, path = %cm.path.display(), rows = slice.row_count(), "current-month slice written");
            Some(cm.path.clone())
        }
        None => None,
    };

    Ok(ConsolidateOutcome {
        archive_path: archive_path.to_path_buf(),
        created,
        rows: combined.row_count(),
        current_month_path,
    })
}

/// Write through `write` to `<path>.part`, then rename over `path`.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<(), IoError>
where
    F: FnOnce(&Path) -> Result<(), String>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| IoError::file(parent, e))?;
    }
    let part_path = part_path(path);
    if let Err(e) = write(&part_path) {
        let _ = fs::remove_file(&part_path);
        return Err(IoError::write(path, e));
    }
    fs::rename(&part_path, path).map_err(|e| {
        let _ = fs::remove_file(&part_path);
        IoError::file(path, e)
    })
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}
