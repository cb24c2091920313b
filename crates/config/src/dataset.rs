// Dataset rules and consolidation, plus the joined final table

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use reportflow_engine::DatasetRules;

/// Suffix of the current-month slice written next to an archive.
pub const CURRENT_MONTH_SUFFIX: &str = "_mes_actual";

/// Suffix of the default archive file name.
pub const ARCHIVE_SUFFIX: &str = "_acumulado";

/// One `[[datasets]]` table. Row rules sit at the top level of the table
/// next to the consolidation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    pub id: String,
    #[serde(flatten)]
    pub rules: DatasetRules,
    /// Append each normalized extract to the year-to-date archive.
    #[serde(default)]
    pub consolidate: bool,
    /// Archive path. Defaults to `<output.dir>/<id>_acumulado.parquet`.
    #[serde(default)]
    pub archive: Option<PathBuf>,
    /// Also write `<id>_mes_actual.parquet` next to the archive.
    #[serde(default)]
    pub current_month: bool,
    /// Date column the current-month slice filters on.
    #[serde(default)]
    pub month_column: Option<String>,
    /// Date column whose days are replaced, not duplicated, on re-runs.
    #[serde(default)]
    pub replace_existing_dates: Option<String>,
    /// Keys nothing above claims. `AppConfig::validate` rejects them.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, toml::Value>,
}

impl DatasetConfig {
    pub fn archive_path(&self, output_dir: &Path) -> PathBuf {
        self.archive
            .clone()
            .unwrap_or_else(|| output_dir.join(format!("{}{ARCHIVE_SUFFIX}.parquet", self.id)))
    }

    pub fn current_month_path(&self, output_dir: &Path) -> PathBuf {
        let archive = self.archive_path(output_dir);
        let dir = archive.parent().map(Path::to_path_buf).unwrap_or_default();
        dir.join(format!("{}{CURRENT_MONTH_SUFFIX}.parquet", self.id))
    }
}

/// `[final_table]`: archives left-joined onto a base archive.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FinalTableConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Output file stem; `.parquet` and `.csv` are written.
    pub name: String,
    /// Dataset whose archive is the left side of the first join.
    pub base: String,
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
    /// Output column order. Empty keeps every column.
    #[serde(default)]
    pub columns: Vec<String>,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinSpec {
    pub dataset: String,
    pub left_keys: Vec<String>,
    /// Defaults to `left_keys`.
    #[serde(default)]
    pub right_keys: Vec<String>,
}

impl JoinSpec {
    pub fn right_keys(&self) -> &[String] {
        if self.right_keys.is_empty() {
            &self.left_keys
        } else {
            &self.right_keys
        }
    }
}
