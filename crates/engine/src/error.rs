use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    /// Archive and new extract disagree on their column sets.
    #[error("schema mismatch for dataset '{dataset}': only in archive {archive_only:?}, only in new table {new_only:?}")]
    SchemaMismatch {
        dataset: String,
        archive_only: Vec<String>,
        new_only: Vec<String>,
    },
    #[error("missing column '{0}'")]
    MissingColumn(String),
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),
    #[error("row has {got} cells, expected {expected}")]
    RowWidth { expected: usize, got: usize },
    #[error("join keys differ in length: {left} left, {right} right")]
    KeyArity { left: usize, right: usize },
    #[error("invalid date '{0}', expected DD.MM.YYYY")]
    InvalidDate(String),
}
