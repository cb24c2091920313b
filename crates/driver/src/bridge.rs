//! The scripting-bridge seam.
//!
//! [`ScriptingBridge`] is the minimal set of primitives the ERP client's
//! scripting interface offers. [`JsonlBridge`] speaks the helper protocol
//! over any reader/writer pair; [`ProcessBridge`] spawns the helper and
//! wires its stdin/stdout to a `JsonlBridge`.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use reportflow_config::ErpConfig;
use reportflow_protocol::{
    AttachMessage, CallMessage, ClientMessage, ControlInfo, ControlMessage, ErrorCode, ErrorMessage,
    GetPropertyMessage, HelloMessage, ReleaseMessage, ServerMessage, SetPropertyMessage, PROTOCOL_VERSION,
};

use crate::error::DriverError;

pub trait ScriptingBridge {
    fn attach(&mut self, connection_index: usize, session_index: usize) -> Result<(), DriverError>;
    fn exists(&mut self, control_id: &str) -> Result<bool, DriverError>;
    fn get_property(&mut self, control_id: &str, property: &str) -> Result<Value, DriverError>;
    fn set_property(&mut self, control_id: &str, property: &str, value: Value) -> Result<(), DriverError>;
    fn call(&mut self, control_id: &str, method: &str, args: Vec<Value>) -> Result<Value, DriverError>;
    fn children(&mut self, control_id: &str) -> Result<Vec<ControlInfo>, DriverError>;
    fn release(&mut self) -> Result<(), DriverError>;
}

// ============================================================================
// JSONL transport
// ============================================================================

/// How long the bridge waits for each response.
#[derive(Debug, Clone, Copy)]
pub struct BridgeTimeouts {
    /// Lookups and property writes (`exists`, `get_property`, `children`, ...).
    pub query: Duration,
    /// Control method calls, which may run a report or an export.
    pub call: Duration,
}

impl Default for BridgeTimeouts {
    fn default() -> Self {
        Self { query: Duration::from_secs(30), call: Duration::from_secs(300) }
    }
}

impl From<&ErpConfig> for BridgeTimeouts {
    fn from(erp: &ErpConfig) -> Self {
        Self {
            query: Duration::from_millis(erp.find_timeout_ms),
            call: Duration::from_millis(erp.call_timeout_ms),
        }
    }
}

/// The helper may take a while to start the scripting engine.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum response line (10MB); control dumps of large screens stay well below.
const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

type Line = Result<String, DriverError>;

/// Bridge client over a line-oriented reader/writer pair.
///
/// Responses are read on a dedicated thread so every request can wait with
/// a deadline. Once a deadline passes the bridge is dead: a late answer
/// would pair with the wrong request.
pub struct JsonlBridge<W> {
    lines: Receiver<Line>,
    writer: W,
    next_id: u64,
    helper: String,
    timeouts: BridgeTimeouts,
    stalled: Option<String>,
}

impl<W: Write> JsonlBridge<W> {
    /// Wrap a transport with default timeouts and perform the hello handshake.
    pub fn connect<R>(reader: R, writer: W) -> Result<Self, DriverError>
    where
        R: BufRead + Send + 'static,
    {
        Self::connect_with(reader, writer, BridgeTimeouts::default())
    }

    pub fn connect_with<R>(reader: R, writer: W, timeouts: BridgeTimeouts) -> Result<Self, DriverError>
    where
        R: BufRead + Send + 'static,
    {
        let lines = spawn_reader(reader)?;
        let mut bridge = Self { lines, writer, next_id: 1, helper: String::new(), timeouts, stalled: None };
        let hello = ClientMessage::Hello(HelloMessage {
            id: bridge.next_request_id(),
            client: "reportflow".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: PROTOCOL_VERSION,
        });
        let wait = HANDSHAKE_TIMEOUT.max(timeouts.query);
        match bridge.request(&hello, "", wait)? {
            ServerMessage::Welcome(w) if w.protocol_version == PROTOCOL_VERSION => {
                debug!(helper = %w.helper, "bridge handshake complete");
                bridge.helper = w.helper;
                Ok(bridge)
            }
            ServerMessage::Welcome(w) => Err(DriverError::Protocol(format!(
                "helper speaks protocol v{}, expected v{PROTOCOL_VERSION}",
                w.protocol_version
            ))),
            other => Err(unexpected("hello", &other)),
        }
    }

    pub fn helper(&self) -> &str {
        &self.helper
    }

    fn next_request_id(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;
        id.to_string()
    }

    /// Send one request and wait up to `timeout` for its response. Error
    /// responses become `DriverError`s attributed to `control_id`.
    fn request(&mut self, msg: &ClientMessage, control_id: &str, timeout: Duration) -> Result<ServerMessage, DriverError> {
        if let Some(reason) = &self.stalled {
            return Err(DriverError::BridgeGone(reason.clone()));
        }
        self.send(msg)?;
        let response = self.receive(msg.id(), timeout)?;
        if response.id() != msg.id() {
            return Err(DriverError::Protocol(format!(
                "response id {} does not match request id {}",
                response.id(),
                msg.id()
            )));
        }
        match response {
            ServerMessage::Error(err) => Err(map_error(err, control_id)),
            other => Ok(other),
        }
    }

    fn request_value(&mut self, msg: ClientMessage, control_id: &str, op: &str) -> Result<Value, DriverError> {
        let timeout = match &msg {
            ClientMessage::Call(_) => self.timeouts.call,
            _ => self.timeouts.query,
        };
        match self.request(&msg, control_id, timeout)? {
            ServerMessage::Result(r) => Ok(r.value),
            other => Err(unexpected(op, &other)),
        }
    }

    fn send(&mut self, msg: &ClientMessage) -> Result<(), DriverError> {
        let json = serde_json::to_string(msg).map_err(|e| DriverError::Protocol(e.to_string()))?;
        writeln!(self.writer, "{}", json).map_err(|e| DriverError::BridgeGone(e.to_string()))?;
        self.writer.flush().map_err(|e| DriverError::BridgeGone(e.to_string()))?;
        Ok(())
    }

    fn receive(&mut self, request_id: &str, timeout: Duration) -> Result<ServerMessage, DriverError> {
        let line = match self.lines.recv_timeout(timeout) {
            Ok(line) => line?,
            Err(RecvTimeoutError::Timeout) => {
                let reason = format!("no response to request {request_id} within {} ms", timeout.as_millis());
                warn!(request_id, timeout_ms = timeout.as_millis() as u64, "bridge helper stalled");
                self.stalled = Some(reason.clone());
                return Err(DriverError::BridgeGone(reason));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(DriverError::BridgeGone("helper closed its output".to_string()))
            }
        };
        serde_json::from_str(&line).map_err(|e| DriverError::Protocol(format!("Invalid JSON: {}", e)))
    }
}

/// Forward response lines to a channel until the helper closes its output
/// or sends something unreadable.
fn spawn_reader<R>(mut reader: R) -> Result<Receiver<Line>, DriverError>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("bridge-reader".to_string())
        .spawn(move || loop {
            let line = read_line_bounded(&mut reader);
            let last = line.is_err();
            if tx.send(line).is_err() || last {
                break;
            }
        })
        .map_err(|e| DriverError::BridgeGone(format!("cannot start reader thread: {e}")))?;
    Ok(rx)
}

/// Read a line with bounded size to prevent memory exhaustion.
fn read_line_bounded<R: BufRead>(reader: &mut R) -> Line {
    let mut buf = Vec::with_capacity(4096);
    loop {
        let available = match reader.fill_buf() {
            Ok(chunk) => chunk,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(DriverError::BridgeGone(e.to_string())),
        };
        if available.is_empty() {
            return Err(if buf.is_empty() {
                DriverError::BridgeGone("helper closed its output".to_string())
            } else {
                DriverError::Protocol("helper closed output mid-frame (no newline)".to_string())
            });
        }

        let (taken, done) = match available.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                buf.extend_from_slice(&available[..pos]);
                (pos + 1, true)
            }
            None => {
                buf.extend_from_slice(available);
                (available.len(), false)
            }
        };
        reader.consume(taken);

        if buf.len() > MAX_LINE_BYTES {
            return Err(DriverError::Protocol(format!("message exceeds {}MB limit", MAX_LINE_BYTES / (1024 * 1024))));
        }
        if done {
            break;
        }
    }
    String::from_utf8(buf).map_err(|e| DriverError::Protocol(format!("Invalid UTF-8: {}", e)))
}

fn map_error(err: ErrorMessage, control_id: &str) -> DriverError {
    match err.code {
        ErrorCode::NoSession => DriverError::NoSession(err.message),
        ErrorCode::NoConnection => DriverError::NoConnection(err.message),
        ErrorCode::NotFound => DriverError::ControlNotFound { control_id: control_id.to_string(), waited_ms: 0 },
        ErrorCode::Failed => DriverError::Failed { control_id: control_id.to_string(), message: err.message },
    }
}

fn unexpected(op: &str, got: &ServerMessage) -> DriverError {
    DriverError::Protocol(format!("unexpected response to {op}: {got:?}"))
}

impl<W: Write> ScriptingBridge for JsonlBridge<W> {
    fn attach(&mut self, connection_index: usize, session_index: usize) -> Result<(), DriverError> {
        let msg = ClientMessage::Attach(AttachMessage { id: self.next_request_id(), connection_index, session_index });
        self.request_value(msg, "", "attach").map(|_| ())
    }

    fn exists(&mut self, control_id: &str) -> Result<bool, DriverError> {
        let msg = ClientMessage::Exists(ControlMessage { id: self.next_request_id(), control_id: control_id.to_string() });
        let value = self.request_value(msg, control_id, "exists")?;
        Ok(value.as_bool().unwrap_or(false))
    }

    fn get_property(&mut self, control_id: &str, property: &str) -> Result<Value, DriverError> {
        let msg = ClientMessage::GetProperty(GetPropertyMessage {
            id: self.next_request_id(),
            control_id: control_id.to_string(),
            property: property.to_string(),
        });
        self.request_value(msg, control_id, "get_property")
    }

    fn set_property(&mut self, control_id: &str, property: &str, value: Value) -> Result<(), DriverError> {
        let msg = ClientMessage::SetProperty(SetPropertyMessage {
            id: self.next_request_id(),
            control_id: control_id.to_string(),
            property: property.to_string(),
            value,
        });
        self.request_value(msg, control_id, "set_property").map(|_| ())
    }

    fn call(&mut self, control_id: &str, method: &str, args: Vec<Value>) -> Result<Value, DriverError> {
        let msg = ClientMessage::Call(CallMessage {
            id: self.next_request_id(),
            control_id: control_id.to_string(),
            method: method.to_string(),
            args,
        });
        self.request_value(msg, control_id, "call")
    }

    fn children(&mut self, control_id: &str) -> Result<Vec<ControlInfo>, DriverError> {
        let msg = ClientMessage::Children(ControlMessage { id: self.next_request_id(), control_id: control_id.to_string() });
        match self.request(&msg, control_id, self.timeouts.query)? {
            ServerMessage::Children(c) => Ok(c.children),
            other => Err(unexpected("children", &other)),
        }
    }

    fn release(&mut self) -> Result<(), DriverError> {
        let msg = ClientMessage::Release(ReleaseMessage { id: self.next_request_id() });
        self.request_value(msg, "", "release").map(|_| ())
    }
}

// ============================================================================
// Helper process
// ============================================================================

/// The bridge helper running as a child process.
pub struct ProcessBridge {
    child: Child,
    inner: JsonlBridge<BufWriter<ChildStdin>>,
}

impl ProcessBridge {
    /// Spawn `command[0]` with the remaining elements as arguments.
    pub fn spawn(command: &[String], timeouts: BridgeTimeouts) -> Result<Self, DriverError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| DriverError::BridgeGone("erp.bridge is not configured".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| DriverError::BridgeGone(format!("cannot start {program}: {e}")))?;

        let stdin = child.stdin.take().ok_or_else(|| DriverError::BridgeGone("helper stdin unavailable".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| DriverError::BridgeGone("helper stdout unavailable".into()))?;

        match JsonlBridge::connect_with(BufReader::new(stdout), BufWriter::new(stdin), timeouts) {
            Ok(inner) => Ok(Self { child, inner }),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    /// Name and version the helper reported in its welcome.
    pub fn helper(&self) -> &str {
        self.inner.helper()
    }
}

impl Drop for ProcessBridge {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill() {
                warn!(error = %e, "failed to stop bridge helper");
            }
        }
        let _ = self.child.wait();
    }
}

impl ScriptingBridge for ProcessBridge {
    fn attach(&mut self, connection_index: usize, session_index: usize) -> Result<(), DriverError> {
        self.inner.attach(connection_index, session_index)
    }
    fn exists(&mut self, control_id: &str) -> Result<bool, DriverError> {
        self.inner.exists(control_id)
    }
    fn get_property(&mut self, control_id: &str, property: &str) -> Result<Value, DriverError> {
        self.inner.get_property(control_id, property)
    }
    fn set_property(&mut self, control_id: &str, property: &str, value: Value) -> Result<(), DriverError> {
        self.inner.set_property(control_id, property, value)
    }
    fn call(&mut self, control_id: &str, method: &str, args: Vec<Value>) -> Result<Value, DriverError> {
        self.inner.call(control_id, method, args)
    }
    fn children(&mut self, control_id: &str) -> Result<Vec<ControlInfo>, DriverError> {
        self.inner.children(control_id)
    }
    fn release(&mut self) -> Result<(), DriverError> {
        self.inner.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn bridge_with(responses: &str) -> JsonlBridge<Vec<u8>> {
        let mut lines = String::from(
            "{\"type\":\"welcome\",\"id\":\"1\",\"protocol_version\":1,\"helper\":\"fake-helper 1.0\"}\n",
        );
        lines.push_str(responses);
        JsonlBridge::connect(Cursor::new(lines.into_bytes()), Vec::new()).unwrap()
    }

    fn sent_lines(bridge: &JsonlBridge<Vec<u8>>) -> Vec<String> {
        String::from_utf8(bridge.writer.clone()).unwrap().lines().map(String::from).collect()
    }

    #[test]
    fn handshake_then_requests_in_order() {
        let mut bridge = bridge_with(
            "{\"type\":\"result\",\"id\":\"2\",\"value\":null}\n\
             {\"type\":\"result\",\"id\":\"3\",\"value\":true}\n",
        );
        assert_eq!(bridge.helper(), "fake-helper 1.0");
        bridge.attach(0, 0).unwrap();
        assert!(bridge.exists("wnd[0]").unwrap());

        let sent = sent_lines(&bridge);
        assert_eq!(sent.len(), 3);
        assert!(sent[0].starts_with("{\"type\":\"hello\""));
        assert_eq!(sent[1], "{\"type\":\"attach\",\"id\":\"2\",\"connection_index\":0,\"session_index\":0}");
        assert_eq!(sent[2], "{\"type\":\"exists\",\"id\":\"3\",\"control_id\":\"wnd[0]\"}");
    }

    #[test]
    fn error_codes_map_to_driver_errors() {
        let mut bridge = bridge_with(
            "{\"type\":\"error\",\"id\":\"2\",\"code\":\"no_session\",\"message\":\"scripting disabled\"}\n\
             {\"type\":\"error\",\"id\":\"3\",\"code\":\"not_found\",\"message\":\"\"}\n",
        );
        let err = bridge.attach(0, 0).unwrap_err();
        assert!(matches!(err, DriverError::NoSession(ref m) if m == "scripting disabled"));
        assert!(err.is_session_error());

        let err = bridge.call("wnd[0]/tbar[1]/btn[8]", "press", vec![]).unwrap_err();
        match err {
            DriverError::ControlNotFound { control_id, .. } => assert_eq!(control_id, "wnd[0]/tbar[1]/btn[8]"),
            other => panic!("expected ControlNotFound, got {other:?}"),
        }
    }

    #[test]
    fn closed_output_is_bridge_gone() {
        let mut bridge = bridge_with("");
        let err = bridge.exists("wnd[0]").unwrap_err();
        assert!(matches!(err, DriverError::BridgeGone(_)));
        assert!(err.is_session_error());
    }

    #[test]
    fn mid_frame_close_is_protocol_error() {
        let mut bridge = bridge_with("{\"type\":\"result\"");
        let err = bridge.exists("wnd[0]").unwrap_err();
        assert!(matches!(err, DriverError::Protocol(ref m) if m.contains("mid-frame")));
    }

    #[test]
    fn mismatched_response_id_rejected() {
        let mut bridge = bridge_with("{\"type\":\"result\",\"id\":\"99\",\"value\":true}\n");
        assert!(matches!(bridge.exists("wnd[0]"), Err(DriverError::Protocol(_))));
    }

    #[test]
    fn protocol_version_mismatch_rejected() {
        let lines = "{\"type\":\"welcome\",\"id\":\"1\",\"protocol_version\":2,\"helper\":\"x\"}\n";
        let result = JsonlBridge::connect(Cursor::new(lines.as_bytes().to_vec()), Vec::new());
        assert!(matches!(result, Err(DriverError::Protocol(ref m)) if m.contains("v2")));
    }

    #[test]
    fn spawn_without_command_fails() {
        assert!(matches!(
            ProcessBridge::spawn(&[], BridgeTimeouts::default()),
            Err(DriverError::BridgeGone(_))
        ));
    }

    /// Reader that hands out queued chunks and blocks while the queue is
    /// empty, like a helper that stopped answering.
    struct Stalling(mpsc::Receiver<Vec<u8>>);

    impl std::io::Read for Stalling {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.recv() {
                Ok(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    Ok(n)
                }
                Err(_) => Ok(0),
            }
        }
    }

    fn stalled_bridge(query: Duration) -> (JsonlBridge<Vec<u8>>, mpsc::Sender<Vec<u8>>) {
        let (tx, rx) = mpsc::channel();
        tx.send(b"{\"type\":\"welcome\",\"id\":\"1\",\"protocol_version\":1,\"helper\":\"h\"}\n".to_vec())
            .unwrap();
        let timeouts = BridgeTimeouts { query, call: query * 2 };
        let bridge = JsonlBridge::connect_with(BufReader::new(Stalling(rx)), Vec::new(), timeouts).unwrap();
        (bridge, tx)
    }

    #[test]
    fn silent_helper_times_out_and_stays_dead() {
        let (mut bridge, _keep_open) = stalled_bridge(Duration::from_millis(40));

        let started = std::time::Instant::now();
        let err = bridge.exists("wnd[0]").unwrap_err();
        assert!(matches!(err, DriverError::BridgeGone(ref m) if m.contains("within 40 ms")), "{err:?}");
        assert!(err.is_session_error());
        assert!(started.elapsed() < Duration::from_secs(5));

        // Later requests fail at once, without waiting or writing.
        let before = sent_lines(&bridge).len();
        let started = std::time::Instant::now();
        assert!(matches!(bridge.release(), Err(DriverError::BridgeGone(_))));
        assert!(started.elapsed() < Duration::from_millis(40));
        assert_eq!(sent_lines(&bridge).len(), before);
    }

    #[test]
    fn find_over_a_silent_helper_is_bounded() {
        use crate::gui::{DriverSettings, GuiDriver};

        let (bridge, _keep_open) = stalled_bridge(Duration::from_millis(40));
        let mut driver = GuiDriver::new(
            bridge,
            DriverSettings {
                settle: Duration::ZERO,
                find_timeout: Duration::from_millis(40),
                poll_interval: Duration::from_millis(5),
            },
        );
        let err = driver.find("wnd[0]", Duration::from_millis(40)).unwrap_err();
        assert!(matches!(err, DriverError::BridgeGone(_)));
    }

    #[test]
    fn timeouts_follow_erp_config() {
        let erp = ErpConfig { find_timeout_ms: 12_000, call_timeout_ms: 600_000, ..ErpConfig::default() };
        let t = BridgeTimeouts::from(&erp);
        assert_eq!(t.query, Duration::from_secs(12));
        assert_eq!(t.call, Duration::from_secs(600));
    }
}
