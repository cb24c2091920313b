//! Retry-aware operations over a [`ScriptingBridge`].
//!
//! Every interaction starts by polling for its control, and every public
//! operation ends with the configured settle pause so the client can redraw
//! before the next step.

use std::collections::VecDeque;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, warn};

use reportflow_config::ErpConfig;
use reportflow_protocol::ControlInfo;

use crate::bridge::ScriptingBridge;
use crate::error::DriverError;

pub const MAIN_WINDOW: &str = "wnd[0]";
pub const COMMAND_FIELD: &str = "wnd[0]/tbar[0]/okcd";
pub const EXECUTE_BUTTON: &str = "wnd[0]/tbar[1]/btn[8]";
pub const VARIANTS_BUTTON: &str = "wnd[0]/tbar[1]/btn[17]";
pub const VARIANT_USER_FILTER: &str = "wnd[1]/usr/txtENAME-LOW";
pub const VARIANT_SEARCH: &str = "wnd[1]/tbar[0]/btn[8]";

/// Navigation tree containers, tried in order before searching by type.
pub const TREE_CANDIDATES: [&str; 4] = [
    "wnd[0]/usr/cntlIMAGE_CONTAINER/shellcont/shell/shellcont[0]/shell",
    "wnd[0]/usr/cntlTREE_CONTAINER/shellcont/shell/shellcont[0]/shell",
    "wnd[0]/usr/shell/shellcont[0]/shell",
    "wnd[0]/usr/cntlGRID_CONTAINER/shellcont/shell/shellcont[0]/shell",
];

/// Selection grids (variant lists), tried in order.
pub const GRID_CANDIDATES: [&str; 3] = [
    "wnd[1]/usr/cntlALV_CONTAINER_1/shellcont/shell",
    "wnd[0]/usr/cntlALV_CONTAINER_1/shellcont/shell",
    "wnd[0]/usr/cntlGRID1/shellcont/shell",
];

const EXPORT_MENU: &str = "wnd[0]/mbar/menu[0]/menu[3]/menu[2]";
const SPREADSHEET_OPTION: &str =
    "wnd[1]/usr/subSUBSCREEN_STEPLOOP:SAPLSPO5:0150/sub:SAPLSPO5:0150/radSPOPLI-SELFLAG[1,0]";
const POPUP_CONTINUE: &str = "wnd[1]/tbar[0]/btn[0]";
const EXPORT_PATH: &str = "wnd[1]/usr/ctxtDY_PATH";
const EXPORT_FILENAME: &str = "wnd[1]/usr/ctxtDY_FILENAME";
const EXPORT_ENCODING: &str = "wnd[1]/usr/ctxtDY_FILE_ENCODING";
const EXPORT_REPLACE: &str = "wnd[1]/tbar[0]/btn[11]";

/// Upper bound on controls visited by a breadth-first walk.
const MAX_WALK: usize = 5000;

/// Rows above the target kept visible when scrolling a grid.
const GRID_SCROLL_MARGIN: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct DriverSettings {
    pub settle: Duration,
    pub find_timeout: Duration,
    pub poll_interval: Duration,
}

impl From<&ErpConfig> for DriverSettings {
    fn from(erp: &ErpConfig) -> Self {
        Self {
            settle: Duration::from_millis(erp.settle_ms),
            find_timeout: Duration::from_millis(erp.find_timeout_ms),
            poll_interval: Duration::from_millis(erp.poll_interval_ms),
        }
    }
}

pub struct GuiDriver<B> {
    bridge: B,
    settings: DriverSettings,
}

impl<B: ScriptingBridge> GuiDriver<B> {
    pub fn new(bridge: B, settings: DriverSettings) -> Self {
        Self { bridge, settings }
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn into_bridge(self) -> B {
        self.bridge
    }

    pub fn attach(&mut self, connection_index: usize, session_index: usize) -> Result<(), DriverError> {
        self.bridge.attach(connection_index, session_index)?;
        debug!(connection_index, session_index, "attached to ERP session");
        Ok(())
    }

    pub fn release(&mut self) -> Result<(), DriverError> {
        self.bridge.release()
    }

    /// Poll until `control_id` exists or `timeout` elapses.
    ///
    /// Session-level failures end the wait immediately; other bridge errors
    /// count as "not there yet".
    pub fn find(&mut self, control_id: &str, timeout: Duration) -> Result<(), DriverError> {
        let started = Instant::now();
        loop {
            match self.bridge.exists(control_id) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) if e.is_session_error() => return Err(e),
                Err(e) => debug!(control_id, error = %e, "exists failed while polling"),
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(DriverError::ControlNotFound {
                    control_id: control_id.to_string(),
                    waited_ms: waited.as_millis() as u64,
                });
            }
            thread::sleep(self.settings.poll_interval.min(timeout - waited));
        }
    }

    /// Non-throwing existence check.
    pub fn exists(&mut self, control_id: &str) -> bool {
        match self.bridge.exists(control_id) {
            Ok(found) => found,
            Err(e) => {
                debug!(control_id, error = %e, "exists check failed");
                false
            }
        }
    }

    fn find_default(&mut self, control_id: &str) -> Result<(), DriverError> {
        self.find(control_id, self.settings.find_timeout)
    }

    fn press(&mut self, control_id: &str) -> Result<(), DriverError> {
        self.find_default(control_id)?;
        self.bridge.call(control_id, "press", Vec::new()).map(|_| ())
    }

    fn select(&mut self, control_id: &str) -> Result<(), DriverError> {
        self.find_default(control_id)?;
        self.bridge.call(control_id, "select", Vec::new()).map(|_| ())
    }

    fn set_text(&mut self, control_id: &str, text: &str) -> Result<(), DriverError> {
        self.find_default(control_id)?;
        self.bridge.set_property(control_id, "text", json!(text))
    }

    fn send_enter(&mut self) -> Result<(), DriverError> {
        self.find_default(MAIN_WINDOW)?;
        self.bridge.call(MAIN_WINDOW, "sendVKey", vec![json!(0)]).map(|_| ())
    }

    /// Focus a text field and put the caret at `position`. Some fields
    /// reject one or both; that never blocks the flow.
    fn place_caret(&mut self, control_id: &str, position: usize) {
        if let Err(e) = self.bridge.call(control_id, "setFocus", Vec::new()) {
            debug!(control_id, error = %e, "setFocus rejected");
        }
        if let Err(e) = self.bridge.set_property(control_id, "caretPosition", json!(position)) {
            debug!(control_id, error = %e, "caretPosition rejected");
        }
    }

    /// Press a popup button when it is present. Returns whether it was pressed.
    fn press_if_exists(&mut self, control_id: &str) -> bool {
        if !self.exists(control_id) {
            return false;
        }
        match self.bridge.call(control_id, "press", Vec::new()) {
            Ok(_) => true,
            Err(e) => {
                debug!(control_id, error = %e, "optional press failed");
                false
            }
        }
    }

    fn settle(&self) {
        if !self.settings.settle.is_zero() {
            thread::sleep(self.settings.settle);
        }
    }

    /// Maximize the main window, type `tcode` into the command field and press Enter.
    pub fn send_transaction(&mut self, tcode: &str) -> Result<(), DriverError> {
        self.find_default(MAIN_WINDOW)?;
        if let Err(e) = self.bridge.call(MAIN_WINDOW, "maximize", Vec::new()) {
            debug!(error = %e, "maximize rejected");
        }
        self.set_text(COMMAND_FIELD, tcode)?;
        self.send_enter()?;
        debug!(tcode, "transaction sent");
        self.settle();
        Ok(())
    }

    /// Select and double-click `node_key` in the transaction's navigation
    /// tree. Returns `false` (with a warning) when the screen has no tree.
    pub fn select_tree_node(&mut self, node_key: &str) -> Result<bool, DriverError> {
        let Some(tree) = self.locate_tree()? else {
            warn!(node_key, "no navigation tree on screen; continuing without node selection");
            return Ok(false);
        };
        self.bridge.set_property(&tree, "selectedNode", json!(node_key))?;
        self.bridge.call(&tree, "doubleClickNode", vec![json!(node_key)])?;
        debug!(node_key, tree = %tree, "tree node opened");
        self.settle();
        Ok(true)
    }

    fn locate_tree(&mut self) -> Result<Option<String>, DriverError> {
        for candidate in TREE_CANDIDATES {
            if self.exists(candidate) {
                return Ok(Some(candidate.to_string()));
            }
        }
        self.find_default("wnd[0]/usr")?;
        self.find_by_type("wnd[0]/usr", "GuiTree")
    }

    /// Breadth-first search below `root` for the first control of `kind`.
    pub fn find_by_type(&mut self, root: &str, kind: &str) -> Result<Option<String>, DriverError> {
        Ok(self
            .walk(root)?
            .into_iter()
            .find(|c| c.kind == kind)
            .map(|c| c.id))
    }

    /// Open the variants list, clear the "created by" filter and search.
    pub fn open_variants(&mut self, created_by: &str) -> Result<(), DriverError> {
        if !self.press_if_exists(VARIANTS_BUTTON) {
            debug!("variants button absent; assuming the selection popup is already open");
        }
        self.set_text(VARIANT_USER_FILTER, created_by)?;
        self.place_caret(VARIANT_USER_FILTER, created_by.chars().count());
        self.press(VARIANT_SEARCH)?;
        self.settle();
        Ok(())
    }

    /// Double-click `row` of the active selection grid. Returns `false`
    /// (with a warning) when no known grid is on screen.
    pub fn select_row(&mut self, row: usize) -> Result<bool, DriverError> {
        let Some(grid) = GRID_CANDIDATES.into_iter().find(|g| self.exists(g)) else {
            warn!(row, "no selection grid on screen; row not selected");
            return Ok(false);
        };
        // Grids that report their size let an out-of-range row fail soft too.
        if let Some(rows) = self.grid_row_count(grid) {
            if row >= rows {
                warn!(row, rows, grid, "grid has fewer rows; row not selected");
                return Ok(false);
            }
        }
        if row > GRID_SCROLL_MARGIN {
            if let Err(e) = self.bridge.set_property(grid, "firstVisibleRow", json!(row - GRID_SCROLL_MARGIN)) {
                debug!(grid, error = %e, "scroll rejected");
            }
        }
        self.bridge.set_property(grid, "currentCellRow", json!(row))?;
        self.bridge.set_property(grid, "selectedRows", json!(row.to_string()))?;
        self.bridge.call(grid, "doubleClickCurrentCell", Vec::new())?;
        debug!(row, grid, "grid row selected");
        self.settle();
        Ok(true)
    }

    fn grid_row_count(&mut self, grid: &str) -> Option<usize> {
        match self.bridge.get_property(grid, "rowCount") {
            Ok(value) => value.as_u64().map(|n| n as usize),
            Err(e) => {
                debug!(grid, error = %e, "rowCount not readable");
                None
            }
        }
    }

    /// Fill a date field and confirm with Enter. `field` is either a bare
    /// field name (`FECHA-LOW`) or a full control id.
    pub fn set_date(&mut self, field: &str, date_text: &str) -> Result<(), DriverError> {
        let control_id = date_field_id(field);
        self.set_text(&control_id, date_text)?;
        self.place_caret(&control_id, date_text.chars().count());
        self.send_enter()?;
        debug!(field = %control_id, date = date_text, "date set");
        self.settle();
        Ok(())
    }

    /// Press the execute-report button.
    pub fn execute(&mut self) -> Result<(), DriverError> {
        self.press(EXECUTE_BUTTON)?;
        self.settle();
        Ok(())
    }

    /// Export the displayed list as a spreadsheet file into `dir/filename`.
    pub fn export_to_spreadsheet(&mut self, dir: &Path, filename: &str, encoding: &str) -> Result<(), DriverError> {
        self.select(EXPORT_MENU)?;
        self.select(SPREADSHEET_OPTION)?;
        self.press(POPUP_CONTINUE)?;
        self.settle();

        self.set_text(EXPORT_PATH, &dir.display().to_string())?;
        self.set_text(EXPORT_FILENAME, filename)?;
        self.set_text(EXPORT_ENCODING, encoding)?;
        self.place_caret(EXPORT_ENCODING, encoding.chars().count());
        self.press(EXPORT_REPLACE)?;
        self.settle();

        // Overwrite and confirmation popups
        for wnd in [2, 1] {
            self.press_if_exists(&format!("wnd[{wnd}]/tbar[0]/btn[0]"));
            self.press_if_exists(&format!("wnd[{wnd}]/tbar[0]/btn[11]"));
        }
        debug!(dir = %dir.display(), filename, encoding, "export requested");
        self.settle();
        Ok(())
    }

    /// Return to the start menu and close leftover popups.
    pub fn go_home(&mut self) -> Result<(), DriverError> {
        self.set_text(COMMAND_FIELD, "/n")?;
        self.send_enter()?;
        for wnd in [2, 1] {
            self.press_if_exists(&format!("wnd[{wnd}]/tbar[0]/btn[0]"));
            self.press_if_exists(&format!("wnd[{wnd}]/tbar[0]/btn[11]"));
            self.press_if_exists(&format!("wnd[{wnd}]/usr/btnSPOP-OPTION1"));
        }
        self.settle();
        Ok(())
    }

    /// Breadth-first listing of every control below `root`.
    pub fn dump_controls(&mut self, root: &str) -> Result<Vec<ControlInfo>, DriverError> {
        self.walk(root)
    }

    fn walk(&mut self, root: &str) -> Result<Vec<ControlInfo>, DriverError> {
        let mut out = Vec::new();
        let mut queue: VecDeque<String> = VecDeque::from([root.to_string()]);
        while let Some(id) = queue.pop_front() {
            let children = match self.bridge.children(&id) {
                Ok(c) => c,
                Err(e) if e.is_session_error() => return Err(e),
                Err(e) => {
                    debug!(control_id = %id, error = %e, "children not listable");
                    continue;
                }
            };
            for child in children {
                if child.container {
                    queue.push_back(child.id.clone());
                }
                out.push(child);
                if out.len() >= MAX_WALK {
                    warn!(root, "control walk truncated at {MAX_WALK} controls");
                    return Ok(out);
                }
            }
        }
        Ok(out)
    }
}

fn date_field_id(field: &str) -> String {
    if field.contains('/') {
        field.to_string()
    } else {
        format!("wnd[0]/usr/ctxt{field}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeBridge;

    fn driver(bridge: FakeBridge) -> GuiDriver<FakeBridge> {
        GuiDriver::new(
            bridge,
            DriverSettings {
                settle: Duration::ZERO,
                find_timeout: Duration::from_millis(30),
                poll_interval: Duration::from_millis(5),
            },
        )
    }

    #[test]
    fn send_transaction_sets_command_and_presses_enter() {
        let mut d = driver(FakeBridge::with_main_screen());
        d.send_transaction("ZHBO").unwrap();
        let b = d.bridge();
        assert_eq!(b.text(COMMAND_FIELD).as_deref(), Some("ZHBO"));
        assert!(b.was_called(MAIN_WINDOW, "maximize"));
        assert!(b.was_called(MAIN_WINDOW, "sendVKey"));
    }

    #[test]
    fn find_times_out_with_control_id() {
        let mut d = driver(FakeBridge::with_main_screen());
        let err = d.find("wnd[0]/usr/ctxtNOPE", Duration::from_millis(20)).unwrap_err();
        match err {
            DriverError::ControlNotFound { control_id, waited_ms } => {
                assert_eq!(control_id, "wnd[0]/usr/ctxtNOPE");
                assert!(waited_ms >= 20);
            }
            other => panic!("expected ControlNotFound, got {other:?}"),
        }
    }

    #[test]
    fn find_sees_control_that_appears_later() {
        let mut bridge = FakeBridge::with_main_screen();
        bridge.appear_after("wnd[1]", 3);
        let mut d = driver(bridge);
        d.find("wnd[1]", Duration::from_millis(500)).unwrap();
    }

    #[test]
    fn tree_candidate_preferred() {
        let mut bridge = FakeBridge::with_main_screen();
        bridge.add_control(TREE_CANDIDATES[1], "GuiShell");
        let mut d = driver(bridge);
        assert!(d.select_tree_node("F00120").unwrap());
        let b = d.bridge();
        assert_eq!(b.property(TREE_CANDIDATES[1], "selectedNode"), Some(json!("F00120")));
        assert!(b.was_called(TREE_CANDIDATES[1], "doubleClickNode"));
    }

    #[test]
    fn tree_found_by_type_when_no_candidate() {
        let mut bridge = FakeBridge::with_main_screen();
        bridge.add_control("wnd[0]/usr/cntlNAV", "GuiContainerShell");
        bridge.add_control("wnd[0]/usr/cntlNAV/shell", "GuiTree");
        let mut d = driver(bridge);
        assert!(d.select_tree_node("N1").unwrap());
        assert!(d.bridge().was_called("wnd[0]/usr/cntlNAV/shell", "doubleClickNode"));
    }

    #[test]
    fn missing_tree_is_soft() {
        let mut d = driver(FakeBridge::with_main_screen());
        assert!(!d.select_tree_node("N1").unwrap());
    }

    #[test]
    fn select_row_scrolls_and_double_clicks() {
        let mut bridge = FakeBridge::with_main_screen();
        bridge.add_control(GRID_CANDIDATES[1], "GuiShell");
        let mut d = driver(bridge);
        assert!(d.select_row(14).unwrap());
        let b = d.bridge();
        assert_eq!(b.property(GRID_CANDIDATES[1], "firstVisibleRow"), Some(json!(4)));
        assert_eq!(b.property(GRID_CANDIDATES[1], "currentCellRow"), Some(json!(14)));
        assert_eq!(b.property(GRID_CANDIDATES[1], "selectedRows"), Some(json!("14")));
        assert!(b.was_called(GRID_CANDIDATES[1], "doubleClickCurrentCell"));
    }

    #[test]
    fn select_row_without_grid_is_soft() {
        let mut d = driver(FakeBridge::with_main_screen());
        assert!(!d.select_row(3).unwrap());
    }

    #[test]
    fn select_row_past_the_end_is_soft() {
        let mut bridge = FakeBridge::with_main_screen();
        bridge.add_control(GRID_CANDIDATES[0], "GuiShell");
        bridge.set_property(GRID_CANDIDATES[0], "rowCount", json!(5)).unwrap();
        let mut d = driver(bridge);

        assert!(!d.select_row(11).unwrap());
        assert!(!d.bridge().was_called(GRID_CANDIDATES[0], "doubleClickCurrentCell"));
        assert!(d.select_row(4).unwrap());
    }

    #[test]
    fn set_date_accepts_bare_field_name() {
        let mut bridge = FakeBridge::with_main_screen();
        bridge.add_control("wnd[0]/usr/ctxtP_LFDAT-LOW", "GuiCTextField");
        let mut d = driver(bridge);
        d.set_date("P_LFDAT-LOW", "27.09.2025").unwrap();
        let b = d.bridge();
        assert_eq!(b.text("wnd[0]/usr/ctxtP_LFDAT-LOW").as_deref(), Some("27.09.2025"));
        assert_eq!(b.property("wnd[0]/usr/ctxtP_LFDAT-LOW", "caretPosition"), Some(json!(10)));
    }

    #[test]
    fn dump_lists_nested_controls() {
        let mut bridge = FakeBridge::with_main_screen();
        bridge.add_control("wnd[0]/usr/cntlNAV", "GuiContainerShell");
        bridge.add_control("wnd[0]/usr/cntlNAV/shell", "GuiTree");
        let mut d = driver(bridge);
        let controls = d.dump_controls("wnd[0]").unwrap();
        let ids: Vec<&str> = controls.iter().map(|c| c.id.as_str()).collect();
        assert!(ids.contains(&"wnd[0]/usr"));
        assert!(ids.contains(&"wnd[0]/usr/cntlNAV/shell"));
    }
}
