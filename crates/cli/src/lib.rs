// reportflow CLI library: orchestrator, publisher and shared CLI plumbing.
// The `reportflow` binary in main.rs is a thin clap front end over these.

pub mod exit_codes;
pub mod logging;
pub mod pipeline;
pub mod publish;

use chrono::NaiveDate;

use reportflow_config::ConfigError;
use reportflow_driver::DriverError;
use reportflow_engine::date_policy::{effective_day, format_date, parse_effective_date};

use exit_codes::{driver_exit_code, EXIT_CONFIG, EXIT_FAILURES};

/// A command failure: exit code, one-line message, optional hint.
#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self { code: EXIT_CONFIG, message: msg.into(), hint: None }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self { code: EXIT_FAILURES, message: msg.into(), hint: None }
    }

    pub fn driver(err: &DriverError) -> Self {
        let hint = err
            .is_session_error()
            .then(|| "is the ERP client running and logged in, with scripting enabled?".to_string());
        Self { code: driver_exit_code(err), message: err.to_string(), hint }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        let hint = match &err {
            ConfigError::NotFound { .. } => Some("pass --config PATH or create ./reportflow.toml".to_string()),
            ConfigError::Parse(_) => Some("check the TOML syntax and key names".to_string()),
            _ => None,
        };
        Self { code: EXIT_CONFIG, message: err.to_string(), hint }
    }
}

/// `--today` parser (`YYYY-MM-DD`).
pub fn parse_today(input: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").map_err(|_| format!("invalid date '{input}', expected YYYY-MM-DD"))
}

/// The date sent to the ERP and its calendar day.
///
/// An explicit `--date` wins. Otherwise the Monday rule applies to `today`
/// (the local date when not injected).
pub fn resolve_effective_date(date: Option<&str>, today: Option<NaiveDate>) -> Result<(String, NaiveDate), CliError> {
    let day = match date {
        Some(text) => parse_effective_date(text)
            .map_err(|e| CliError::config(e.to_string()).with_hint("use --date DD.MM.YYYY, e.g. --date 27.09.2025"))?,
        None => effective_day(today.unwrap_or_else(|| chrono::Local::now().date_naive())),
    };
    Ok((format_date(day), day))
}
