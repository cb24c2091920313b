// Report recipes: one `[[recipes]]` table per ERP report

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Export encoding code the ERP offers by default.
pub const DEFAULT_ENCODING: &str = "0000";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recipe {
    pub id: String,
    /// Transaction code typed into the command field.
    pub tcode: String,
    /// Navigation tree node key to double-click after opening the transaction.
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub variant: Option<VariantStep>,
    /// Selection-screen field receiving the effective date (`FECHA-LOW` or a
    /// full control id).
    #[serde(default)]
    pub date_field: Option<String>,
    /// Directory the ERP exports into. Defaults to `output.dir`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    pub filename: String,
    /// Dataset whose rules apply. Defaults to the recipe id.
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_encoding() -> String {
    DEFAULT_ENCODING.to_string()
}

/// Variant selection: open the variants list and double-click `row`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantStep {
    pub row: usize,
    /// Text for the "created by" filter; empty lists everyone's variants.
    #[serde(default)]
    pub created_by: String,
}

impl Recipe {
    pub fn dataset_id(&self) -> &str {
        self.dataset.as_deref().unwrap_or(&self.id)
    }

    /// File stem shared by the raw extract and its artifacts.
    pub fn base_name(&self) -> &str {
        Path::new(&self.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.filename)
    }

    pub fn export_dir<'a>(&'a self, output_dir: &'a Path) -> &'a Path {
        self.dir.as_deref().unwrap_or(output_dir)
    }

    pub fn raw_path(&self, output_dir: &Path) -> PathBuf {
        self.export_dir(output_dir).join(&self.filename)
    }
}
