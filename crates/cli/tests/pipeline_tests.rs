// Orchestrator tests against the in-memory bridge and canned extracts.
//
// Run with: cargo test -p reportflow-cli --test pipeline_tests

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::Value as JsonValue;

use reportflow_cli::exit_codes::{EXIT_FAILURES, EXIT_SESSION, EXIT_SUCCESS};
use reportflow_cli::pipeline::{self, RunOptions, Session};
use reportflow_config::AppConfig;
use reportflow_driver::fake::FakeBridge;
use reportflow_driver::{DriverError, DriverSettings, GuiDriver, ScriptingBridge};
use reportflow_engine::RunStatus;
use reportflow_protocol::ControlInfo;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

const THREE_RECIPES: &str = r#"
[[recipes]]
id = "deliveries"
tcode = "ZSD_ENTREGAS"
date_field = "P_LFDAT-LOW"
filename = "deliveries.xls"

[[recipes]]
id = "returns"
tcode = "ZSD_NO_ENTREGAS"
date_field = "P_LFDAT-LOW"
filename = "returns.xls"

[[recipes]]
id = "plr"
tcode = "ZSD_REP_PLANEAMIENTO"
date_field = "P_LFDAT-LOW"
filename = "plr.xls"

[[datasets]]
id = "deliveries"
numeric_columns = ["Cajas Equiv."]
decimal = "comma"
consolidate = true

[final_table]
name = "final"
base = "deliveries"
columns = ["Entrega", "Cajas Equiv.", "Falta"]
"#;

fn config(toml: &str, out: &Path) -> AppConfig {
    let mut config = AppConfig::from_toml(toml).unwrap();
    config.override_output_dir(out.to_path_buf());
    config
}

fn options(dry_run: bool, only: &[&str]) -> RunOptions {
    RunOptions {
        effective_date: "27.09.2025".into(),
        effective_day: NaiveDate::from_ymd_opt(2025, 9, 27).unwrap(),
        only: only.iter().map(|s| s.to_string()).collect(),
        dry_run,
    }
}

fn quick<B: ScriptingBridge>(bridge: B) -> GuiDriver<B> {
    GuiDriver::new(
        bridge,
        DriverSettings {
            settle: Duration::ZERO,
            find_timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(5),
        },
    )
}

fn archive_rows(path: &Path) -> usize {
    reportflow_io::parquet::import(path).unwrap().row_count()
}

// ===========================================================================
// Live session
// ===========================================================================

#[test]
fn session_lost_at_second_recipe_aborts_the_rest() {
    let out = tempfile::tempdir().unwrap();
    let cfg = config(THREE_RECIPES, out.path());

    let mut bridge = FakeBridge::with_report_flow("P_LFDAT-LOW");
    bridge.set_export_payload(fs::read(fixture("report.xls")).unwrap());
    bridge.lose_session_at(2);

    let summary = pipeline::run(&cfg, &options(false, &[]), Session::Live(quick(bridge)));

    assert_eq!(summary.status_of("deliveries"), Some(RunStatus::Ok));
    assert_eq!(summary.status_of("returns"), Some(RunStatus::FailConnect));
    assert_eq!(summary.status_of("plr"), Some(RunStatus::Skipped));
    assert_eq!((summary.ok, summary.failed, summary.skipped), (1, 1, 1));
    assert!(summary.aborted);
    assert!(summary.final_table.is_none(), "final table must not be built after an abort");
    assert_eq!(summary.exit_code(), EXIT_SESSION);

    assert!(out.path().join("deliveries.xls").is_file());
    assert!(out.path().join("deliveries_PowerBI.csv").is_file());
    assert!(out.path().join("deliveries_acumulado.parquet").is_file());
}

#[test]
fn unavailable_bridge_fails_first_and_skips_the_rest() {
    let out = tempfile::tempdir().unwrap();
    let cfg = config(THREE_RECIPES, out.path());

    let summary = pipeline::run(
        &cfg,
        &options(false, &[]),
        Session::<FakeBridge>::Unavailable("erp.bridge is not configured".into()),
    );

    let statuses: Vec<_> = summary.recipes.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![RunStatus::FailConnect, RunStatus::Skipped, RunStatus::Skipped]);
    assert_eq!(summary.exit_code(), EXIT_SESSION);
}

/// A bridge whose every call blows up.
struct PanickingBridge;

impl ScriptingBridge for PanickingBridge {
    fn attach(&mut self, _: usize, _: usize) -> Result<(), DriverError> {
        panic!("bridge state corrupted")
    }
    fn exists(&mut self, _: &str) -> Result<bool, DriverError> {
        unreachable!()
    }
    fn get_property(&mut self, _: &str, _: &str) -> Result<JsonValue, DriverError> {
        unreachable!()
    }
    fn set_property(&mut self, _: &str, _: &str, _: JsonValue) -> Result<(), DriverError> {
        unreachable!()
    }
    fn call(&mut self, _: &str, _: &str, _: Vec<JsonValue>) -> Result<JsonValue, DriverError> {
        unreachable!()
    }
    fn children(&mut self, _: &str) -> Result<Vec<ControlInfo>, DriverError> {
        unreachable!()
    }
    fn release(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

#[test]
fn panic_inside_a_recipe_is_unexpected_and_the_run_continues() {
    let out = tempfile::tempdir().unwrap();
    let cfg = config(THREE_RECIPES, out.path());

    let summary = pipeline::run(&cfg, &options(false, &["deliveries", "plr"]), Session::Live(quick(PanickingBridge)));

    assert_eq!(summary.recipes.len(), 2);
    assert!(summary.recipes.iter().all(|r| r.status == RunStatus::Unexpected));
    assert!(summary.recipes[0].message.as_deref().unwrap().contains("bridge state corrupted"));
    assert!(!summary.aborted);
    assert_eq!(summary.exit_code(), EXIT_FAILURES);
}

// ===========================================================================
// Dry run
// ===========================================================================

#[test]
fn dry_run_consolidates_and_builds_the_final_table() {
    let out = tempfile::tempdir().unwrap();
    let cfg = config(THREE_RECIPES, out.path());
    fs::copy(fixture("report.xls"), out.path().join("deliveries.xls")).unwrap();

    let first = pipeline::run(&cfg, &options(true, &["deliveries"]), Session::<FakeBridge>::DryRun);
    assert_eq!(first.exit_code(), EXIT_SUCCESS, "{first:?}");
    let second = pipeline::run(&cfg, &options(true, &["deliveries"]), Session::<FakeBridge>::DryRun);
    assert_eq!(second.exit_code(), EXIT_SUCCESS);

    assert_eq!(archive_rows(&out.path().join("deliveries_acumulado.parquet")), 6);

    let final_table = second.final_table.unwrap();
    assert!(final_table.ok);
    let csv = fs::read_to_string(out.path().join("final.csv")).unwrap();
    assert_eq!(csv.lines().next().unwrap(), r#""Entrega","Cajas Equiv.""#);
    assert_eq!(csv.lines().count(), 7);
    assert!(out.path().join("final.parquet").is_file());
}

#[test]
fn schema_drift_fails_the_transform_and_keeps_the_archive() {
    let out = tempfile::tempdir().unwrap();
    let cfg = config(THREE_RECIPES, out.path());
    let raw = out.path().join("deliveries.xls");

    fs::copy(fixture("report.xls"), &raw).unwrap();
    pipeline::run(&cfg, &options(true, &["deliveries"]), Session::<FakeBridge>::DryRun);
    let archive = out.path().join("deliveries_acumulado.parquet");
    let before = fs::read(&archive).unwrap();

    // Same file name, different columns
    fs::copy(fixture("returns.txt"), &raw).unwrap();
    fs::copy(fixture("returns.txt"), out.path().join("returns.xls")).unwrap();
    let summary = pipeline::run(&cfg, &options(true, &["deliveries", "returns"]), Session::<FakeBridge>::DryRun);

    assert_eq!(summary.status_of("deliveries"), Some(RunStatus::FailTransform));
    assert!(summary.recipes[0].message.as_deref().unwrap().contains("schema mismatch"));
    assert_eq!(summary.status_of("returns"), Some(RunStatus::Ok));
    assert_eq!(summary.exit_code(), EXIT_FAILURES);
    assert_eq!(fs::read(&archive).unwrap(), before);
}

#[test]
fn dry_run_without_raw_file_fails_verify() {
    let out = tempfile::tempdir().unwrap();
    let cfg = config(THREE_RECIPES, out.path());
    fs::copy(fixture("report.xls"), out.path().join("plr.xls")).unwrap();

    let summary = pipeline::run(&cfg, &options(true, &["returns", "plr"]), Session::<FakeBridge>::DryRun);

    assert_eq!(summary.status_of("returns"), Some(RunStatus::FailVerify));
    assert_eq!(summary.status_of("plr"), Some(RunStatus::Ok));
    assert!(out.path().join("plr_PowerBI.parquet").is_file());
    assert_eq!(summary.exit_code(), EXIT_FAILURES);
}

#[test]
fn summary_serializes_wire_statuses() {
    let out = tempfile::tempdir().unwrap();
    let cfg = config(THREE_RECIPES, out.path());

    let summary = pipeline::run(&cfg, &options(true, &["plr"]), Session::<FakeBridge>::DryRun);
    let json = serde_json::to_value(&summary).unwrap();

    assert_eq!(json["effective_date"], "27.09.2025");
    assert_eq!(json["recipes"][0]["recipe"], "plr");
    assert_eq!(json["recipes"][0]["status"], "FAIL_VERIFY");
    assert_eq!(json["failed"], 1);
}
