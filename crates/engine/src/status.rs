use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Terminal status of one recipe run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Ok,
    FailConnect,
    FailNavigate,
    FailExport,
    FailVerify,
    FailTransform,
    Skipped,
    Unexpected,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::FailConnect => "FAIL_CONNECT",
            Self::FailNavigate => "FAIL_NAVIGATE",
            Self::FailExport => "FAIL_EXPORT",
            Self::FailVerify => "FAIL_VERIFY",
            Self::FailTransform => "FAIL_TRANSFORM",
            Self::Skipped => "SKIPPED",
            Self::Unexpected => "UNEXPECTED",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Ok | Self::Skipped)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of a recipe, from runner start to the last stage reached.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub recipe: String,
    pub effective_date: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<PathBuf>,
}

impl RunRecord {
    pub fn start(recipe: &str, effective_date: &str) -> Self {
        let now = Utc::now();
        Self {
            recipe: recipe.to_string(),
            effective_date: effective_date.to_string(),
            started_at: now,
            finished_at: now,
            status: RunStatus::Ok,
            message: None,
            raw_file: None,
            artifacts: Vec::new(),
        }
    }

    pub fn finish(&mut self, status: RunStatus, message: Option<String>) {
        self.status = status;
        self.message = message;
        self.finished_at = Utc::now();
    }

    pub fn skipped(recipe: &str, effective_date: &str, reason: &str) -> Self {
        let mut record = Self::start(recipe, effective_date);
        record.finish(RunStatus::Skipped, Some(reason.to_string()));
        record
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names() {
        let json = serde_json::to_string(&RunStatus::FailConnect).unwrap();
        assert_eq!(json, "\"FAIL_CONNECT\"");
        assert_eq!(RunStatus::Ok.to_string(), "OK");
    }

    #[test]
    fn failure_classification() {
        assert!(!RunStatus::Ok.is_failure());
        assert!(!RunStatus::Skipped.is_failure());
        assert!(RunStatus::FailVerify.is_failure());
        assert!(RunStatus::Unexpected.is_failure());
    }

    #[test]
    fn skipped_record() {
        let r = RunRecord::skipped("zhbo", "27.09.2025", "session lost");
        assert_eq!(r.status, RunStatus::Skipped);
        assert_eq!(r.message.as_deref(), Some("session lost"));
        assert!(r.elapsed_ms() >= 0);
    }
}
