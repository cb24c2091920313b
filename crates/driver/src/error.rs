use thiserror::Error;

/// Errors raised while driving the ERP client.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Client not running, or scripting disabled.
    #[error("no ERP session: {0}")]
    NoSession(String),
    /// Connection or session index does not exist.
    #[error("no such ERP connection: {0}")]
    NoConnection(String),
    /// The bridge helper could not be started or went away.
    #[error("scripting bridge unavailable: {0}")]
    BridgeGone(String),
    #[error("control not found after {waited_ms} ms: {control_id}")]
    ControlNotFound { control_id: String, waited_ms: u64 },
    #[error("control {control_id} rejected the request: {message}")]
    Failed { control_id: String, message: String },
    #[error("bridge protocol error: {0}")]
    Protocol(String),
}

impl DriverError {
    /// True when the session itself is unusable, so later recipes would fail too.
    pub fn is_session_error(&self) -> bool {
        matches!(self, Self::NoSession(_) | Self::NoConnection(_) | Self::BridgeGone(_))
    }
}
