//! One recipe, end to end: navigate, export, verify.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn, Level};

use reportflow_config::Recipe;
use reportflow_engine::{RunRecord, RunStatus};

use crate::bridge::ScriptingBridge;
use crate::error::DriverError;
use crate::gui::GuiDriver;

/// Where the runner attaches.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionTarget {
    pub connection_index: usize,
    pub session_index: usize,
}

struct StepFailure {
    status: RunStatus,
    message: String,
}

impl StepFailure {
    /// Session errors are FAIL_CONNECT whatever step they hit.
    fn from_driver(error: DriverError, step_status: RunStatus, step: &str) -> Self {
        let status = if error.is_session_error() { RunStatus::FailConnect } else { step_status };
        Self { status, message: format!("{step}: {error}") }
    }
}

pub struct Runner<'d, B> {
    driver: &'d mut GuiDriver<B>,
    target: SessionTarget,
}

impl<'d, B: ScriptingBridge> Runner<'d, B> {
    pub fn new(driver: &'d mut GuiDriver<B>, target: SessionTarget) -> Self {
        Self { driver, target }
    }

    /// Run `recipe` and return its record. The raw file lands in the
    /// recipe's export directory, defaulting to `output_dir`.
    ///
    /// The runner never retries. It always tries to return the client to
    /// its start menu; a failure there is logged and does not change the
    /// status.
    pub fn run(&mut self, recipe: &Recipe, output_dir: &Path, effective_date: &str) -> RunRecord {
        let mut record = RunRecord::start(&recipe.id, effective_date);
        info!(recipe = %recipe.id, tcode = %recipe.tcode, effective_date, "recipe started");

        if let Err(e) = self.driver.attach(self.target.connection_index, self.target.session_index) {
            let failure = StepFailure::from_driver(e, RunStatus::FailConnect, "attach");
            record.finish(failure.status, Some(failure.message));
            log_finished(&record);
            return record;
        }

        let result = self.drive(recipe, output_dir, effective_date);

        if let Err(ref failure) = result {
            if failure.status != RunStatus::FailConnect && tracing::enabled!(Level::DEBUG) {
                self.log_control_dump(&recipe.id);
            }
        }
        if let Err(e) = self.driver.go_home() {
            warn!(recipe = %recipe.id, error = %e, "could not return to the start menu");
        }
        if let Err(e) = self.driver.release() {
            warn!(recipe = %recipe.id, error = %e, "could not release the session");
        }

        match result {
            Ok(path) => {
                record.raw_file = Some(path);
                record.finish(RunStatus::Ok, None);
            }
            Err(failure) => record.finish(failure.status, Some(failure.message)),
        }
        log_finished(&record);
        record
    }

    fn drive(&mut self, recipe: &Recipe, output_dir: &Path, effective_date: &str) -> Result<PathBuf, StepFailure> {
        let navigate = |e| StepFailure::from_driver(e, RunStatus::FailNavigate, "navigate");

        self.driver.send_transaction(&recipe.tcode).map_err(navigate)?;

        if let Some(node) = &recipe.node {
            self.driver.select_tree_node(node).map_err(navigate)?;
        }

        if let Some(variant) = &recipe.variant {
            self.driver.open_variants(&variant.created_by).map_err(navigate)?;
            self.driver.select_row(variant.row).map_err(navigate)?;
        }

        if let Some(field) = &recipe.date_field {
            self.driver.set_date(field, effective_date).map_err(navigate)?;
        }

        self.driver.execute().map_err(navigate)?;

        let dir = recipe.export_dir(output_dir).to_path_buf();
        let filename = prepare_target(&dir, &recipe.filename).map_err(|message| StepFailure {
            status: RunStatus::FailExport,
            message,
        })?;
        self.driver
            .export_to_spreadsheet(&dir, &filename, &recipe.encoding)
            .map_err(|e| StepFailure::from_driver(e, RunStatus::FailExport, "export"))?;

        let path = dir.join(&filename);
        verify_export(&path).map_err(|message| StepFailure { status: RunStatus::FailVerify, message })?;
        Ok(path)
    }

    fn log_control_dump(&mut self, recipe: &str) {
        match self.driver.dump_controls("wnd[0]") {
            Ok(controls) => {
                for c in controls {
                    debug!(recipe, control = %c.id, kind = %c.kind, "control");
                }
            }
            Err(e) => debug!(recipe, error = %e, "control dump failed"),
        }
    }
}

/// Make sure `dir` exists and no stale `filename` is in it. A file that
/// cannot be removed (held open by another program) is sidestepped with a
/// time-stamped name. Returns the file name to export to.
fn prepare_target(dir: &Path, filename: &str) -> Result<String, String> {
    fs::create_dir_all(dir).map_err(|e| format!("cannot create {}: {e}", dir.display()))?;
    let path = dir.join(filename);
    if !path.exists() {
        return Ok(filename.to_string());
    }
    match fs::remove_file(&path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed previous export");
            Ok(filename.to_string())
        }
        Err(e) => {
            let renamed = timestamped(filename);
            warn!(path = %path.display(), error = %e, fallback = %renamed, "previous export is locked");
            Ok(renamed)
        }
    }
}

fn timestamped(filename: &str) -> String {
    let stamp = chrono::Local::now().format("%H%M%S");
    let path = Path::new(filename);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(filename);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}_{stamp}.{ext}"),
        None => format!("{stem}_{stamp}"),
    }
}

fn verify_export(path: &Path) -> Result<(), String> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        Ok(_) => Err(format!("export is empty: {}", path.display())),
        Err(_) => Err(format!("export was not produced: {}", path.display())),
    }
}

fn log_finished(record: &RunRecord) {
    let message = record.message.as_deref().unwrap_or("");
    if record.status.is_ok() {
        info!(
            recipe = %record.recipe,
            status = %record.status,
            elapsed_ms = record.elapsed_ms(),
            path = %record.raw_file.as_deref().map(|p| p.display().to_string()).unwrap_or_default(),
            "recipe finished"
        );
    } else {
        error!(
            recipe = %record.recipe,
            status = %record.status,
            elapsed_ms = record.elapsed_ms(),
            message,
            "recipe failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::fake::FakeBridge;
    use crate::gui::{DriverSettings, COMMAND_FIELD};
    use reportflow_config::VariantStep;

    fn recipe() -> Recipe {
        Recipe {
            id: "plr".into(),
            tcode: "ZSD_REP_PLANEAMIENTO".into(),
            node: Some("F00120".into()),
            variant: Some(VariantStep { row: 11, created_by: String::new() }),
            date_field: Some("P_LFDAT-LOW".into()),
            dir: None,
            filename: "plr.xls".into(),
            dataset: None,
            encoding: "0000".into(),
        }
    }

    fn driver(bridge: FakeBridge) -> GuiDriver<FakeBridge> {
        GuiDriver::new(
            bridge,
            DriverSettings {
                settle: Duration::ZERO,
                find_timeout: Duration::from_millis(20),
                poll_interval: Duration::from_millis(5),
            },
        )
    }

    fn run(bridge: FakeBridge, out: &Path) -> (RunRecord, FakeBridge) {
        let mut d = driver(bridge);
        let record = Runner::new(&mut d, SessionTarget::default()).run(&recipe(), out, "27.09.2025");
        (record, d.into_bridge())
    }

    #[test]
    fn happy_path_exports_and_goes_home() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge = FakeBridge::with_report_flow("P_LFDAT-LOW");
        bridge.set_export_payload(b"<table><tr><td>A</td></tr></table>".to_vec());

        let (record, bridge) = run(bridge, dir.path());
        assert_eq!(record.status, RunStatus::Ok, "{:?}", record.message);
        assert_eq!(record.raw_file.as_deref(), Some(dir.path().join("plr.xls").as_path()));
        assert_eq!(bridge.text("wnd[0]/usr/ctxtP_LFDAT-LOW").as_deref(), Some("27.09.2025"));
        assert_eq!(
            bridge.property("wnd[1]/usr/cntlALV_CONTAINER_1/shellcont/shell", "currentCellRow"),
            Some(serde_json::json!(11))
        );
        assert_eq!(bridge.text("wnd[1]/usr/ctxtDY_FILE_ENCODING").as_deref(), Some("0000"));
        assert_eq!(bridge.text(COMMAND_FIELD).as_deref(), Some("/n"));
        assert_eq!(bridge.releases(), 1);
    }

    #[test]
    fn stale_export_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("plr.xls"), b"yesterday").unwrap();
        let mut bridge = FakeBridge::with_report_flow("P_LFDAT-LOW");
        bridge.set_export_payload(b"today".to_vec());

        let (record, _) = run(bridge, dir.path());
        assert_eq!(record.status, RunStatus::Ok);
        assert_eq!(fs::read(dir.path().join("plr.xls")).unwrap(), b"today");
    }

    #[test]
    fn missing_file_is_fail_verify_and_still_goes_home() {
        let dir = tempfile::tempdir().unwrap();
        let (record, bridge) = run(FakeBridge::with_report_flow("P_LFDAT-LOW"), dir.path());
        assert_eq!(record.status, RunStatus::FailVerify);
        assert!(record.message.unwrap().contains("plr.xls"));
        assert_eq!(bridge.text(COMMAND_FIELD).as_deref(), Some("/n"));
    }

    #[test]
    fn missing_date_field_is_fail_navigate() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge = FakeBridge::with_report_flow("P_LFDAT-LOW");
        bridge.remove_control("wnd[0]/usr/ctxtP_LFDAT-LOW");
        let (record, bridge) = run(bridge, dir.path());
        assert_eq!(record.status, RunStatus::FailNavigate);
        assert!(record.message.unwrap().contains("ctxtP_LFDAT-LOW"));
        assert!(!bridge.was_called("wnd[0]/tbar[1]/btn[8]", "press"));
    }

    #[test]
    fn export_menu_failure_is_fail_export() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge = FakeBridge::with_report_flow("P_LFDAT-LOW");
        bridge.fail_call("wnd[0]/mbar/menu[0]/menu[3]/menu[2]", "select");
        let (record, _) = run(bridge, dir.path());
        assert_eq!(record.status, RunStatus::FailExport);
    }

    #[test]
    fn lost_session_is_fail_connect() {
        let dir = tempfile::tempdir().unwrap();
        let mut bridge = FakeBridge::with_report_flow("P_LFDAT-LOW");
        bridge.lose_session_at(1);
        let (record, bridge) = run(bridge, dir.path());
        assert_eq!(record.status, RunStatus::FailConnect);
        assert!(bridge.calls().is_empty());
    }

    #[test]
    fn timestamped_keeps_extension() {
        let name = timestamped("plr.xls");
        assert!(name.starts_with("plr_") && name.ends_with(".xls"));
        assert_eq!(name.len(), "plr_000000.xls".len());
    }
}
