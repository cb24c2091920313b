// Metadata sidecar written next to normalized artifacts.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use reportflow_engine::Table;

use crate::sniff::PayloadKind;

pub const RECOMMENDED_FORMAT: &str = "parquet";

#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub source_path: PathBuf,
    pub source_bytes: u64,
    pub payload: PayloadKind,
    pub dataset: String,
    pub rows: usize,
    pub columns: usize,
    pub column_types: Map<String, JsonValue>,
    pub empty_counts: Map<String, JsonValue>,
    pub effective_date: String,
    /// First 16 hex chars of the BLAKE3 hash of the CSV artifact.
    pub csv_checksum: String,
    pub warnings: Vec<String>,
    pub processed_at: String,
    pub recommended_format: String,
}

impl Metadata {
    #[allow(clippy::too_many_arguments)]
    pub fn describe(
        table: &Table,
        source_path: &Path,
        source_bytes: u64,
        payload: PayloadKind,
        dataset: &str,
        effective_date: &str,
        csv_bytes: &[u8],
        warnings: Vec<String>,
    ) -> Self {
        let column_types = table
            .schema()
            .into_iter()
            .map(|(name, ty)| (name, JsonValue::from(ty.as_str())))
            .collect();
        let empty_counts = table
            .empty_counts()
            .into_iter()
            .map(|(name, n)| (name, JsonValue::from(n)))
            .collect();

        Self {
            source_path: source_path.to_path_buf(),
            source_bytes,
            payload,
            dataset: dataset.to_string(),
            rows: table.row_count(),
            columns: table.column_count(),
            column_types,
            empty_counts,
            effective_date: effective_date.to_string(),
            csv_checksum: checksum(csv_bytes),
            warnings,
            processed_at: chrono::Utc::now().to_rfc3339(),
            recommended_format: RECOMMENDED_FORMAT.to_string(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, json + "\n").map_err(|e| format!("{}: {}", path.display(), e))
    }

    pub fn read(path: &Path) -> Result<JsonValue, String> {
        let content = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        serde_json::from_str(&content).map_err(|e| format!("{}: {}", path.display(), e))
    }
}

/// Sixteen-hex-character change-detection checksum.
pub fn checksum(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex()[..16].to_string()
}
