// Configuration loading

pub mod dataset;
pub mod error;
pub mod recipe;
pub mod settings;

pub use dataset::{DatasetConfig, FinalTableConfig, JoinSpec};
pub use error::ConfigError;
pub use recipe::{Recipe, VariantStep};
pub use settings::{AppConfig, ErpConfig, FtpConfig, OutputConfig};
