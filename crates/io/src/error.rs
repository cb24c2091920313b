use std::path::PathBuf;

use reportflow_engine::TableError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    /// Payload is not a workbook, a markup table or delimited text, or it
    /// holds no header row.
    #[error("unreadable payload {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },
    #[error("{}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },
    #[error(transparent)]
    Table(#[from] TableError),
}

impl IoError {
    pub fn file(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::File { path: path.to_path_buf(), source }
    }

    pub fn write(path: &std::path::Path, reason: impl std::fmt::Display) -> Self {
        Self::Write { path: path.to_path_buf(), reason: reason.to_string() }
    }

    pub fn unreadable(path: &std::path::Path, reason: impl std::fmt::Display) -> Self {
        Self::Unreadable { path: path.to_path_buf(), reason: reason.to_string() }
    }
}
