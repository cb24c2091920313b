//! Drives the ERP desktop client through its scripting bridge.
//!
//! [`bridge`] speaks the JSON-lines protocol to the helper process,
//! [`gui`] turns control paths into screen operations, and [`runner`]
//! strings those into one report export.

pub mod bridge;
pub mod error;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod gui;
pub mod runner;

pub use bridge::{BridgeTimeouts, JsonlBridge, ProcessBridge, ScriptingBridge};
pub use error::DriverError;
pub use gui::{DriverSettings, GuiDriver};
pub use runner::{Runner, SessionTarget};
