// Application configuration
// Loaded from ./reportflow.toml or ~/.config/reportflow/config.toml

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::dataset::{DatasetConfig, FinalTableConfig};
use crate::error::ConfigError;
use crate::recipe::Recipe;

/// Environment variable that overrides `ftp.pass`.
pub const FTP_PASS_ENV: &str = "REPORTFLOW_FTP_PASS";

/// Config file looked for in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "reportflow.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub erp: ErpConfig,
    #[serde(default)]
    pub ftp: FtpConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub recipes: Vec<Recipe>,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
    #[serde(default)]
    pub final_table: Option<FinalTableConfig>,
}

/// ERP client session and GUI pacing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ErpConfig {
    pub connection_index: usize,
    pub session_index: usize,
    /// Pause after each GUI interaction.
    pub settle_ms: u64,
    /// How long `find` polls for a control.
    pub find_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// How long a control method call (running a report, exporting) may take.
    pub call_timeout_ms: u64,
    /// Scripting bridge helper: program followed by its arguments.
    pub bridge: Vec<String>,
}

impl Default for ErpConfig {
    fn default() -> Self {
        Self {
            connection_index: 0,
            session_index: 0,
            settle_ms: 2000,
            find_timeout_ms: 12_000,
            poll_interval_ms: 250,
            call_timeout_ms: 300_000,
            bridge: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub remote_dir: String,
    /// Case-insensitive file pattern, e.g. `*.DNL`.
    pub glob: String,
    /// Directory scanned for uploads. Defaults to `output.dir`.
    pub local_dir: Option<PathBuf>,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: 21,
            user: String::new(),
            pass: String::new(),
            remote_dir: String::new(),
            glob: "*".to_string(),
            local_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// JSON log files. Defaults to `<dir>/logs`.
    pub log_dir: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { dir: PathBuf::from("output"), log_dir: None }
    }
}

impl AppConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load, validate and resolve a config file.
    ///
    /// `path` of `None` searches [`default_paths`]. Relative paths inside the
    /// file resolve against the file's directory.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let searched = default_paths();
                searched
                    .iter()
                    .find(|p| p.is_file())
                    .cloned()
                    .ok_or(ConfigError::NotFound { searched })?
            }
        };
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read { path: path.clone(), source })?;
        let mut config = Self::from_toml(&content)?;
        let base = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        config.resolve_paths(base);
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.erp.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("erp.poll_interval_ms must be greater than 0"));
        }
        if self.erp.find_timeout_ms < self.erp.poll_interval_ms {
            return Err(ConfigError::invalid(format!(
                "erp.find_timeout_ms ({}) is shorter than erp.poll_interval_ms ({})",
                self.erp.find_timeout_ms, self.erp.poll_interval_ms
            )));
        }

        if self.erp.call_timeout_ms < self.erp.find_timeout_ms {
            return Err(ConfigError::invalid(format!(
                "erp.call_timeout_ms ({}) is shorter than erp.find_timeout_ms ({})",
                self.erp.call_timeout_ms, self.erp.find_timeout_ms
            )));
        }

        let mut recipe_ids = HashSet::new();
        for r in &self.recipes {
            if r.id.trim().is_empty() {
                return Err(ConfigError::invalid("recipe with empty id"));
            }
            if !recipe_ids.insert(r.id.as_str()) {
                return Err(ConfigError::invalid(format!("duplicate recipe id '{}'", r.id)));
            }
            if r.tcode.trim().is_empty() {
                return Err(ConfigError::invalid(format!("recipe '{}': tcode is empty", r.id)));
            }
            if r.filename.trim().is_empty() {
                return Err(ConfigError::invalid(format!("recipe '{}': filename is empty", r.id)));
            }
            if let Some(ds) = &r.dataset {
                if self.dataset(ds).is_none() {
                    return Err(ConfigError::invalid(format!(
                        "recipe '{}' references unknown dataset '{ds}'",
                        r.id
                    )));
                }
            }
        }

        let mut dataset_ids = HashSet::new();
        for d in &self.datasets {
            if !dataset_ids.insert(d.id.as_str()) {
                return Err(ConfigError::invalid(format!("duplicate dataset id '{}'", d.id)));
            }
            if !d.unknown.is_empty() {
                let keys: Vec<&str> = d.unknown.keys().map(String::as_str).collect();
                return Err(ConfigError::invalid(format!(
                    "dataset '{}': unknown key(s) {}",
                    d.id,
                    keys.join(", ")
                )));
            }
            if d.current_month && d.month_column.is_none() {
                return Err(ConfigError::invalid(format!(
                    "dataset '{}': current_month needs month_column",
                    d.id
                )));
            }
            if (d.current_month || d.replace_existing_dates.is_some()) && !d.consolidate {
                return Err(ConfigError::invalid(format!(
                    "dataset '{}': current_month and replace_existing_dates need consolidate = true",
                    d.id
                )));
            }
            if let Some(agg) = &d.rules.aggregate {
                if agg.group_by.is_empty() {
                    return Err(ConfigError::invalid(format!("dataset '{}': aggregate.group_by is empty", d.id)));
                }
            }
        }

        if let Some(ft) = &self.final_table {
            self.validate_final_table(ft)?;
        }

        if self.ftp.enabled {
            if self.ftp.host.trim().is_empty() {
                return Err(ConfigError::invalid("ftp.enabled but ftp.host is empty"));
            }
            if self.ftp.glob.trim().is_empty() {
                return Err(ConfigError::invalid("ftp.glob is empty"));
            }
        }

        Ok(())
    }

    fn validate_final_table(&self, ft: &FinalTableConfig) -> Result<(), ConfigError> {
        if ft.name.trim().is_empty() {
            return Err(ConfigError::invalid("final_table.name is empty"));
        }
        let sources = std::iter::once(ft.base.as_str()).chain(ft.joins.iter().map(|j| j.dataset.as_str()));
        for id in sources {
            match self.dataset(id) {
                Some(d) if d.consolidate => {}
                Some(_) => {
                    return Err(ConfigError::invalid(format!(
                        "final_table: dataset '{id}' does not consolidate, so it has no archive"
                    )))
                }
                None => return Err(ConfigError::invalid(format!("final_table: unknown dataset '{id}'"))),
            }
        }
        for j in &ft.joins {
            if j.left_keys.is_empty() {
                return Err(ConfigError::invalid(format!("final_table: join on '{}' has no keys", j.dataset)));
            }
            if j.left_keys.len() != j.right_keys().len() {
                return Err(ConfigError::invalid(format!(
                    "final_table: join on '{}' has {} left key(s) but {} right key(s)",
                    j.dataset,
                    j.left_keys.len(),
                    j.right_keys().len()
                )));
            }
        }
        Ok(())
    }

    /// Make every relative path absolute against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.output.dir);
        if let Some(p) = self.output.log_dir.as_mut() {
            join(p);
        }
        if let Some(p) = self.ftp.local_dir.as_mut() {
            join(p);
        }
        for r in &mut self.recipes {
            if let Some(p) = r.dir.as_mut() {
                join(p);
            }
        }
        for d in &mut self.datasets {
            if let Some(p) = d.archive.as_mut() {
                join(p);
            }
        }
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(pass) = lookup(FTP_PASS_ENV) {
            self.ftp.pass = pass;
        }
    }

    /// Replace `output.dir`; recipe export dirs that defaulted to it follow.
    pub fn override_output_dir(&mut self, dir: PathBuf) {
        self.output.dir = dir;
    }

    pub fn dataset(&self, id: &str) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| d.id == id)
    }

    pub fn recipe(&self, id: &str) -> Option<&Recipe> {
        self.recipes.iter().find(|r| r.id == id)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.output.log_dir.clone().unwrap_or_else(|| self.output.dir.join("logs"))
    }

    pub fn ftp_local_dir(&self) -> &Path {
        self.ftp.local_dir.as_deref().unwrap_or(&self.output.dir)
    }
}

/// Config locations searched when no `--config` is given, in order.
pub fn default_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("reportflow").join("config.toml"));
    }
    paths
}
