//! In-memory scripting bridge for tests.
//!
//! Controls are addressed by their full path id; a control's children are
//! the registered ids one path segment below it. Pressing the export
//! dialog's replace button writes the configured payload to the path and
//! file name typed into the dialog, like the real client does.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde_json::Value;

use reportflow_protocol::ControlInfo;

use crate::bridge::ScriptingBridge;
use crate::error::DriverError;

#[derive(Debug, Clone)]
struct FakeControl {
    kind: String,
    props: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
pub struct FakeBridge {
    controls: BTreeMap<String, FakeControl>,
    /// Controls that show up after this many `exists` checks.
    pending: BTreeMap<String, usize>,
    calls: Vec<(String, String)>,
    failing: HashSet<(String, String)>,
    export_payload: Option<Vec<u8>>,
    lose_session_at: Option<usize>,
    attaches: usize,
    releases: usize,
}

impl FakeBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Main window with command field, user area and toolbar buttons.
    pub fn with_main_screen() -> Self {
        let mut b = Self::new();
        b.add_control("wnd[0]", "GuiMainWindow");
        b.add_control("wnd[0]/usr", "GuiUserArea");
        b.add_control("wnd[0]/tbar[0]/okcd", "GuiOkCodeField");
        b.add_control("wnd[0]/tbar[1]/btn[8]", "GuiButton");
        b
    }

    /// Every control a full report run touches, with `date_field` on the
    /// selection screen and a variants grid in the popup.
    pub fn with_report_flow(date_field: &str) -> Self {
        let mut b = Self::with_main_screen();
        b.add_control("wnd[0]/usr/cntlIMAGE_CONTAINER/shellcont/shell/shellcont[0]/shell", "GuiShell");
        b.add_control("wnd[0]/tbar[1]/btn[17]", "GuiButton");
        b.add_control("wnd[1]/usr/txtENAME-LOW", "GuiTextField");
        b.add_control("wnd[1]/tbar[0]/btn[8]", "GuiButton");
        b.add_control("wnd[1]/usr/cntlALV_CONTAINER_1/shellcont/shell", "GuiShell");
        b.add_control(&format!("wnd[0]/usr/ctxt{date_field}"), "GuiCTextField");
        b.add_control("wnd[0]/mbar/menu[0]/menu[3]/menu[2]", "GuiMenu");
        b.add_control(
            "wnd[1]/usr/subSUBSCREEN_STEPLOOP:SAPLSPO5:0150/sub:SAPLSPO5:0150/radSPOPLI-SELFLAG[1,0]",
            "GuiRadioButton",
        );
        b.add_control("wnd[1]/tbar[0]/btn[0]", "GuiButton");
        b.add_control("wnd[1]/usr/ctxtDY_PATH", "GuiCTextField");
        b.add_control("wnd[1]/usr/ctxtDY_FILENAME", "GuiCTextField");
        b.add_control("wnd[1]/usr/ctxtDY_FILE_ENCODING", "GuiCTextField");
        b.add_control("wnd[1]/tbar[0]/btn[11]", "GuiButton");
        b
    }

    pub fn add_control(&mut self, id: &str, kind: &str) {
        self.controls.insert(id.to_string(), FakeControl { kind: kind.to_string(), props: BTreeMap::new() });
    }

    pub fn remove_control(&mut self, id: &str) {
        self.controls.remove(id);
    }

    /// Make `id` exist only after `misses` unsuccessful `exists` calls.
    pub fn appear_after(&mut self, id: &str, misses: usize) {
        self.pending.insert(id.to_string(), misses);
    }

    /// Make `method` on `id` fail with a `Failed` error.
    pub fn fail_call(&mut self, id: &str, method: &str) {
        self.failing.insert((id.to_string(), method.to_string()));
    }

    /// Bytes written when the export dialog is confirmed.
    pub fn set_export_payload(&mut self, bytes: Vec<u8>) {
        self.export_payload = Some(bytes);
    }

    /// Attach number `n` (1-based) and every later attach fail with `NoSession`.
    pub fn lose_session_at(&mut self, n: usize) {
        self.lose_session_at = Some(n);
    }

    pub fn attaches(&self) -> usize {
        self.attaches
    }

    pub fn releases(&self) -> usize {
        self.releases
    }

    pub fn calls(&self) -> &[(String, String)] {
        &self.calls
    }

    pub fn was_called(&self, id: &str, method: &str) -> bool {
        self.calls.iter().any(|(c, m)| c == id && m == method)
    }

    pub fn property(&self, id: &str, property: &str) -> Option<Value> {
        self.controls.get(id).and_then(|c| c.props.get(property).cloned())
    }

    pub fn text(&self, id: &str) -> Option<String> {
        self.property(id, "text").and_then(|v| v.as_str().map(String::from))
    }

    fn control_mut(&mut self, id: &str) -> Result<&mut FakeControl, DriverError> {
        self.controls
            .get_mut(id)
            .ok_or_else(|| DriverError::ControlNotFound { control_id: id.to_string(), waited_ms: 0 })
    }

    fn write_export(&self) -> Result<(), DriverError> {
        let Some(payload) = &self.export_payload else {
            return Ok(());
        };
        let dir = self.text("wnd[1]/usr/ctxtDY_PATH").unwrap_or_default();
        let name = self.text("wnd[1]/usr/ctxtDY_FILENAME").unwrap_or_default();
        let path = PathBuf::from(dir).join(name);
        std::fs::write(&path, payload).map_err(|e| DriverError::Failed {
            control_id: "wnd[1]/tbar[0]/btn[11]".to_string(),
            message: format!("{}: {e}", path.display()),
        })
    }
}

impl ScriptingBridge for FakeBridge {
    fn attach(&mut self, _connection_index: usize, _session_index: usize) -> Result<(), DriverError> {
        self.attaches += 1;
        match self.lose_session_at {
            Some(n) if self.attaches >= n => Err(DriverError::NoSession("ERP client not running".to_string())),
            _ => Ok(()),
        }
    }

    fn exists(&mut self, control_id: &str) -> Result<bool, DriverError> {
        if let Some(remaining) = self.pending.get_mut(control_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(false);
            }
            self.pending.remove(control_id);
            self.add_control(control_id, "GuiModalWindow");
        }
        Ok(self.controls.contains_key(control_id))
    }

    fn get_property(&mut self, control_id: &str, property: &str) -> Result<Value, DriverError> {
        let control = self.control_mut(control_id)?;
        if property == "Type" {
            return Ok(Value::String(control.kind.clone()));
        }
        Ok(control.props.get(property).cloned().unwrap_or(Value::Null))
    }

    fn set_property(&mut self, control_id: &str, property: &str, value: Value) -> Result<(), DriverError> {
        self.control_mut(control_id)?.props.insert(property.to_string(), value);
        Ok(())
    }

    fn call(&mut self, control_id: &str, method: &str, _args: Vec<Value>) -> Result<Value, DriverError> {
        self.control_mut(control_id)?;
        self.calls.push((control_id.to_string(), method.to_string()));
        if self.failing.contains(&(control_id.to_string(), method.to_string())) {
            return Err(DriverError::Failed {
                control_id: control_id.to_string(),
                message: format!("{method} failed"),
            });
        }
        if control_id == "wnd[1]/tbar[0]/btn[11]" && method == "press" {
            self.write_export()?;
        }
        Ok(Value::Null)
    }

    fn children(&mut self, control_id: &str) -> Result<Vec<ControlInfo>, DriverError> {
        if !self.controls.contains_key(control_id) {
            return Err(DriverError::ControlNotFound { control_id: control_id.to_string(), waited_ms: 0 });
        }
        let prefix = format!("{control_id}/");
        let children = self
            .controls
            .iter()
            .filter(|(id, _)| id.strip_prefix(&prefix).is_some_and(|rest| !rest.contains('/')))
            .map(|(id, c)| ControlInfo {
                id: id.clone(),
                kind: c.kind.clone(),
                container: self.controls.keys().any(|other| other.starts_with(&format!("{id}/"))),
            })
            .collect();
        Ok(children)
    }

    fn release(&mut self) -> Result<(), DriverError> {
        self.releases += 1;
        Ok(())
    }
}
