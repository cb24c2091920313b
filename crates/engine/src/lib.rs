//! `reportflow-engine` - tables and the transformations applied to them.
//!
//! Pure crate: no file or network IO. Readers and writers live in
//! `reportflow-io`; this crate owns the cell model, the business-date rule,
//! per-dataset row rules, archive merging and joins.

pub mod coerce;
pub mod date_policy;
pub mod error;
pub mod join;
pub mod merge;
pub mod rules;
pub mod status;
pub mod table;
pub mod value;

pub use date_policy::{effective_date, effective_day};
pub use error::TableError;
pub use join::{join_left, reorder};
pub use rules::DatasetRules;
pub use status::{RunRecord, RunStatus};
pub use table::Table;
pub use value::{ColumnType, DecimalStyle, Value};
