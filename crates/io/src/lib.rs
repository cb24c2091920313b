// File I/O: raw ERP extracts in, normalized artifacts and archives out

pub mod archive;
pub mod csv;
pub mod error;
pub mod markup;
pub mod normalize;
pub mod parquet;
pub mod sidecar;
pub mod sniff;
pub mod text;
pub mod xlsx;

pub use archive::{consolidate, write_atomic, ConsolidateOptions, ConsolidateOutcome, CurrentMonth};
pub use error::IoError;
pub use normalize::{normalize, read_extract, Artifacts, NormalizeOutput, NormalizeRequest};
pub use sidecar::Metadata;
pub use sniff::PayloadKind;
