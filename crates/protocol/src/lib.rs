//! ERP Scripting Bridge Protocol - v1 Wire Format
//!
//! The ERP client exposes its controls through a scripting interface that
//! only a helper process on the client machine can reach. `reportflow`
//! spawns that helper and talks to it over stdin/stdout with JSONL
//! (newline-delimited JSON): one request line, one response line.
//!
//! # Protocol Version
//!
//! This is **protocol v1**. Changes to the wire format require:
//! 1. Version bump in PROTOCOL_VERSION
//! 2. Updated golden lines in the tests below
//! 3. A matching helper release
//!
//! # Usage
//!
//! ```ignore
//! use reportflow_protocol::{ClientMessage, ServerMessage, ControlMessage};
//!
//! let msg = ClientMessage::Exists(ControlMessage { id: "3".into(), control_id: "wnd[0]".into() });
//! let line = serde_json::to_string(&msg)?;
//!
//! let response: ServerMessage = serde_json::from_str(&reply)?;
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current protocol version. Increment for breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

// =============================================================================
// Client → Helper Messages
// =============================================================================

/// Requests sent from `reportflow` to the bridge helper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello(HelloMessage),
    Attach(AttachMessage),
    Exists(ControlMessage),
    GetProperty(GetPropertyMessage),
    SetProperty(SetPropertyMessage),
    Call(CallMessage),
    Children(ControlMessage),
    Release(ReleaseMessage),
}

impl ClientMessage {
    pub fn id(&self) -> &str {
        match self {
            Self::Hello(m) => &m.id,
            Self::Attach(m) => &m.id,
            Self::Exists(m) | Self::Children(m) => &m.id,
            Self::GetProperty(m) => &m.id,
            Self::SetProperty(m) => &m.id,
            Self::Call(m) => &m.id,
            Self::Release(m) => &m.id,
        }
    }
}

/// Handshake. The helper answers with its own protocol version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloMessage {
    pub id: String,
    pub client: String,
    pub version: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
}

fn default_protocol_version() -> u32 {
    1
}

/// Bind the helper to one session of one connection of the running client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachMessage {
    pub id: String,
    pub connection_index: usize,
    pub session_index: usize,
}

/// A request addressing a single control by its path id (`wnd[0]/tbar[0]/okcd`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub id: String,
    pub control_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPropertyMessage {
    pub id: String,
    pub control_id: String,
    pub property: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPropertyMessage {
    pub id: String,
    pub control_id: String,
    pub property: String,
    pub value: Value,
}

/// Invoke a method on a control (`press`, `sendVKey`, `doubleClickNode`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMessage {
    pub id: String,
    pub control_id: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
}

/// Drop the session binding. The helper stays up for the next attach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseMessage {
    pub id: String,
}

// =============================================================================
// Helper → Client Messages
// =============================================================================

/// Responses from the bridge helper. Every response echoes the request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome(WelcomeMessage),
    Result(ResultMessage),
    Children(ChildrenMessage),
    Error(ErrorMessage),
}

impl ServerMessage {
    pub fn id(&self) -> &str {
        match self {
            Self::Welcome(m) => &m.id,
            Self::Result(m) => &m.id,
            Self::Children(m) => &m.id,
            Self::Error(m) => &m.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomeMessage {
    pub id: String,
    pub protocol_version: u32,
    /// Helper name and version, for logs.
    pub helper: String,
}

/// Outcome of attach, exists, get/set property, call and release.
/// `value` is `null` for operations without a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub id: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildrenMessage {
    pub id: String,
    pub children: Vec<ControlInfo>,
}

/// A control as listed by `children`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlInfo {
    pub id: String,
    /// Scripting type name, e.g. `GuiTree`, `GuiButton`.
    #[serde(rename = "type")]
    pub kind: String,
    /// True when the control can have children of its own.
    #[serde(default)]
    pub container: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub id: String,
    pub code: ErrorCode,
    pub message: String,
}

/// Failure classes the helper reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Client not running, or scripting disabled on client or server.
    NoSession,
    /// Connection or session index does not exist.
    NoConnection,
    /// No control with the given id.
    NotFound,
    /// The control rejected the property or method.
    Failed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSession => "no_session",
            Self::NoConnection => "no_connection",
            Self::NotFound => "not_found",
            Self::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn golden_client_lines() {
        let cases = [
            (
                ClientMessage::Hello(HelloMessage {
                    id: "1".into(),
                    client: "reportflow".into(),
                    version: "0.3.0".into(),
                    protocol_version: 1,
                }),
                r#"{"type":"hello","id":"1","client":"reportflow","version":"0.3.0","protocol_version":1}"#,
            ),
            (
                ClientMessage::Attach(AttachMessage { id: "2".into(), connection_index: 0, session_index: 0 }),
                r#"{"type":"attach","id":"2","connection_index":0,"session_index":0}"#,
            ),
            (
                ClientMessage::SetProperty(SetPropertyMessage {
                    id: "3".into(),
                    control_id: "wnd[0]/tbar[0]/okcd".into(),
                    property: "text".into(),
                    value: json!("ZHBO"),
                }),
                r#"{"type":"set_property","id":"3","control_id":"wnd[0]/tbar[0]/okcd","property":"text","value":"ZHBO"}"#,
            ),
            (
                ClientMessage::Call(CallMessage {
                    id: "4".into(),
                    control_id: "wnd[0]".into(),
                    method: "sendVKey".into(),
                    args: vec![json!(0)],
                }),
                r#"{"type":"call","id":"4","control_id":"wnd[0]","method":"sendVKey","args":[0]}"#,
            ),
            (
                ClientMessage::Call(CallMessage {
                    id: "5".into(),
                    control_id: "wnd[0]".into(),
                    method: "maximize".into(),
                    args: vec![],
                }),
                r#"{"type":"call","id":"5","control_id":"wnd[0]","method":"maximize"}"#,
            ),
        ];
        for (msg, line) in cases {
            assert_eq!(serde_json::to_string(&msg).unwrap(), line);
            let back: ClientMessage = serde_json::from_str(line).unwrap();
            assert_eq!(back, msg);
        }
    }

    #[test]
    fn golden_server_lines() {
        let err: ServerMessage =
            serde_json::from_str(r#"{"type":"error","id":"7","code":"no_session","message":"scripting disabled"}"#)
                .unwrap();
        assert_eq!(err.id(), "7");
        match err {
            ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::NoSession),
            other => panic!("expected error, got {other:?}"),
        }

        let children: ServerMessage = serde_json::from_str(
            r#"{"type":"children","id":"8","children":[{"id":"wnd[0]/usr","type":"GuiUserArea","container":true}]}"#,
        )
        .unwrap();
        match children {
            ServerMessage::Children(c) => {
                assert_eq!(c.children[0].kind, "GuiUserArea");
                assert!(c.children[0].container);
            }
            other => panic!("expected children, got {other:?}"),
        }

        // `value` may be omitted for void results
        let void: ServerMessage = serde_json::from_str(r#"{"type":"result","id":"9"}"#).unwrap();
        assert_eq!(void, ServerMessage::Result(ResultMessage { id: "9".into(), value: Value::Null }));
    }

    #[test]
    fn hello_defaults_protocol_version() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"hello","id":"1","client":"x","version":"0"}"#).unwrap();
        match msg {
            ClientMessage::Hello(h) => assert_eq!(h.protocol_version, PROTOCOL_VERSION),
            other => panic!("expected hello, got {other:?}"),
        }
    }

    #[test]
    fn error_code_names_match_wire() {
        for code in [ErrorCode::NoSession, ErrorCode::NoConnection, ErrorCode::NotFound, ErrorCode::Failed] {
            assert_eq!(serde_json::to_value(code).unwrap(), json!(code.as_str()));
        }
    }
}
