//! The orchestrator: runner → normalizer → consolidator per recipe, then
//! the final table and the publisher.
//!
//! A recipe failure is recorded and the run moves on. FAIL_CONNECT is the
//! exception: the session is gone, so every later recipe is SKIPPED and the
//! final table is not rebuilt.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{error, info, warn};

use reportflow_config::{AppConfig, FinalTableConfig, Recipe};
use reportflow_driver::runner::{Runner, SessionTarget};
use reportflow_driver::{GuiDriver, ScriptingBridge};
use reportflow_engine::{join_left, reorder, DatasetRules, RunRecord, RunStatus, Table};
use reportflow_io::{consolidate, normalize, ConsolidateOptions, CurrentMonth, NormalizeRequest};

use crate::exit_codes::{EXIT_FAILURES, EXIT_SESSION, EXIT_SUCCESS};
use crate::publish::{self, PublishReport};

/// Where raw extracts come from.
pub enum Session<B> {
    /// Drive the ERP client.
    Live(GuiDriver<B>),
    /// Skip the ERP; use raw files already on disk.
    DryRun,
    /// The bridge could not be started; every recipe fails to connect.
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Effective date as sent to the ERP (`DD.MM.YYYY`).
    pub effective_date: String,
    pub effective_day: NaiveDate,
    /// Recipe ids to run; empty runs them all.
    pub only: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub effective_date: String,
    pub dry_run: bool,
    pub ok: usize,
    pub failed: usize,
    pub skipped: usize,
    pub aborted: bool,
    pub duration_ms: u64,
    pub recipes: Vec<RunRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_table: Option<StepOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<StepOutcome>,
}

impl RunSummary {
    pub fn exit_code(&self) -> u8 {
        if self.aborted {
            return EXIT_SESSION;
        }
        let step_failed = [&self.final_table, &self.publish]
            .into_iter()
            .flatten()
            .any(|s| !s.ok);
        if self.failed > 0 || step_failed {
            EXIT_FAILURES
        } else {
            EXIT_SUCCESS
        }
    }

    pub fn status_of(&self, recipe: &str) -> Option<RunStatus> {
        self.recipes.iter().find(|r| r.recipe == recipe).map(|r| r.status)
    }
}

/// Recipes selected by `only`, in declared order.
pub fn select_recipes<'a>(config: &'a AppConfig, only: &[String]) -> Vec<&'a Recipe> {
    config
        .recipes
        .iter()
        .filter(|r| only.is_empty() || only.iter().any(|id| id == &r.id))
        .collect()
}

pub fn run<B: ScriptingBridge>(config: &AppConfig, options: &RunOptions, mut session: Session<B>) -> RunSummary {
    let started = Instant::now();
    let recipes = select_recipes(config, &options.only);
    info!(
        recipes = recipes.len(),
        effective_date = %options.effective_date,
        dry_run = options.dry_run,
        "run started"
    );

    let mut records = Vec::with_capacity(recipes.len());
    let mut aborted = false;
    for recipe in recipes {
        if aborted {
            let record = RunRecord::skipped(&recipe.id, &options.effective_date, "session lost earlier in the run");
            warn!(recipe = %recipe.id, status = %record.status, "recipe skipped");
            records.push(record);
            continue;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_recipe(config, options, recipe, &mut session)));
        let record = outcome.unwrap_or_else(|payload| {
            let mut record = RunRecord::start(&recipe.id, &options.effective_date);
            record.finish(RunStatus::Unexpected, Some(panic_message(payload.as_ref())));
            error!(recipe = %recipe.id, status = %record.status, message = ?record.message, "recipe panicked");
            record
        });
        if record.status == RunStatus::FailConnect {
            error!(recipe = %recipe.id, "ERP session unavailable; aborting remaining recipes");
            aborted = true;
        }
        records.push(record);
    }

    let final_table = match &config.final_table {
        Some(ft) if ft.enabled && !aborted => Some(build_final_table(config, ft)),
        _ => None,
    };

    let publish = (config.ftp.enabled && !options.dry_run).then(|| {
        match publish::publish(&config.ftp, config.ftp_local_dir()) {
            Ok(report) => publish_outcome(report),
            Err(e) => {
                error!(error = %e, "publish failed; files stay for the next run");
                StepOutcome { ok: false, message: Some(e.to_string()), paths: Vec::new() }
            }
        }
    });

    let summary = RunSummary {
        effective_date: options.effective_date.clone(),
        dry_run: options.dry_run,
        ok: records.iter().filter(|r| r.status.is_ok()).count(),
        failed: records.iter().filter(|r| r.status.is_failure()).count(),
        skipped: records.iter().filter(|r| r.status == RunStatus::Skipped).count(),
        aborted,
        duration_ms: started.elapsed().as_millis() as u64,
        recipes: records,
        final_table,
        publish,
    };
    info!(
        ok = summary.ok,
        failed = summary.failed,
        skipped = summary.skipped,
        aborted = summary.aborted,
        duration_ms = summary.duration_ms,
        "run finished"
    );
    summary
}

fn run_recipe<B: ScriptingBridge>(
    config: &AppConfig,
    options: &RunOptions,
    recipe: &Recipe,
    session: &mut Session<B>,
) -> RunRecord {
    let output_dir = &config.output.dir;
    let mut record = match session {
        Session::Live(driver) => {
            let target = SessionTarget {
                connection_index: config.erp.connection_index,
                session_index: config.erp.session_index,
            };
            Runner::new(driver, target).run(recipe, output_dir, &options.effective_date)
        }
        Session::DryRun => existing_extract(recipe, output_dir, &options.effective_date),
        Session::Unavailable(reason) => {
            let mut record = RunRecord::start(&recipe.id, &options.effective_date);
            record.finish(RunStatus::FailConnect, Some(reason.clone()));
            error!(recipe = %recipe.id, status = %record.status, message = %reason, "recipe failed");
            record
        }
    };
    if !record.status.is_ok() {
        return record;
    }

    if let Err(message) = transform(config, options, recipe, &mut record) {
        error!(recipe = %recipe.id, status = %RunStatus::FailTransform, message = %message, "transform failed");
        record.finish(RunStatus::FailTransform, Some(message));
        return record;
    }
    record.finish(RunStatus::Ok, None);
    info!(
        recipe = %recipe.id,
        status = %record.status,
        artifacts = record.artifacts.len(),
        elapsed_ms = record.elapsed_ms(),
        "recipe completed"
    );
    record
}

/// Dry-run stand-in for the runner: the raw file must already be there.
fn existing_extract(recipe: &Recipe, output_dir: &Path, effective_date: &str) -> RunRecord {
    let mut record = RunRecord::start(&recipe.id, effective_date);
    let raw = recipe.raw_path(output_dir);
    if raw.is_file() {
        info!(recipe = %recipe.id, path = %raw.display(), "dry run: using existing extract");
        record.raw_file = Some(raw);
        record.finish(RunStatus::Ok, None);
    } else {
        let message = format!("dry run: raw extract not found: {}", raw.display());
        error!(recipe = %recipe.id, status = %RunStatus::FailVerify, message = %message, "recipe failed");
        record.finish(RunStatus::FailVerify, Some(message));
    }
    record
}

/// Normalize the raw file and, when the dataset asks for it, consolidate.
fn transform(config: &AppConfig, options: &RunOptions, recipe: &Recipe, record: &mut RunRecord) -> Result<(), String> {
    let raw_path = record.raw_file.clone().ok_or_else(|| "runner produced no file".to_string())?;
    let dataset_id = recipe.dataset_id();
    let dataset = config.dataset(dataset_id);
    let default_rules = DatasetRules::default();
    let rules = dataset.map(|d| &d.rules).unwrap_or(&default_rules);
    let out_dir = &config.output.dir;

    let output = normalize(&NormalizeRequest {
        raw_path: &raw_path,
        dataset: dataset_id,
        rules,
        out_dir,
        base_name: recipe.base_name(),
        effective_date: &options.effective_date,
    })
    .map_err(|e| e.to_string())?;
    record.artifacts.extend(output.artifacts.paths());

    let Some(dataset) = dataset.filter(|d| d.consolidate) else {
        return Ok(());
    };
    let consolidate_options = ConsolidateOptions {
        replace_existing_dates: dataset.replace_existing_dates.clone(),
        current_month: match (&dataset.month_column, dataset.current_month) {
            (Some(column), true) => Some(CurrentMonth {
                date_column: column.clone(),
                reference: options.effective_day,
                path: dataset.current_month_path(out_dir),
            }),
            _ => None,
        },
    };
    let outcome = consolidate(dataset_id, &output.table, &dataset.archive_path(out_dir), &consolidate_options)
        .map_err(|e| e.to_string())?;
    record.artifacts.push(outcome.archive_path);
    record.artifacts.extend(outcome.current_month_path);
    Ok(())
}

/// Join the consolidated archives and write `<name>.parquet` and `<name>.csv`.
pub fn build_final_table(config: &AppConfig, ft: &FinalTableConfig) -> StepOutcome {
    match write_final_table(config, ft) {
        Ok(paths) => {
            info!(name = %ft.name, "final table written");
            StepOutcome { ok: true, message: None, paths }
        }
        Err(message) => {
            error!(name = %ft.name, message = %message, "final table failed");
            StepOutcome { ok: false, message: Some(message), paths: Vec::new() }
        }
    }
}

fn write_final_table(config: &AppConfig, ft: &FinalTableConfig) -> Result<Vec<PathBuf>, String> {
    let out_dir = &config.output.dir;
    let load = |id: &str| -> Result<Table, String> {
        let dataset = config.dataset(id).ok_or_else(|| format!("unknown dataset '{id}'"))?;
        let path = dataset.archive_path(out_dir);
        if !path.is_file() {
            return Err(format!("archive for '{id}' not found: {}", path.display()));
        }
        reportflow_io::parquet::import(&path).map_err(|e| format!("{}: {e}", path.display()))
    };

    let mut table = load(&ft.base)?;
    for join in &ft.joins {
        let right = load(&join.dataset)?;
        table = join_left(&table, &right, &join.left_keys, join.right_keys()).map_err(|e| e.to_string())?;
    }
    if !ft.columns.is_empty() {
        let missing: Vec<&str> = ft
            .columns
            .iter()
            .filter(|c| table.column_index(c).is_none())
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            warn!(name = %ft.name, ?missing, "final table columns not produced by the joins");
        }
        table = reorder(&table, &ft.columns);
    }

    let parquet_path = out_dir.join(format!("{}.parquet", ft.name));
    let csv_path = out_dir.join(format!("{}.csv", ft.name));
    reportflow_io::write_atomic(&parquet_path, |tmp| reportflow_io::parquet::export(&table, tmp))
        .map_err(|e| e.to_string())?;
    reportflow_io::write_atomic(&csv_path, |tmp| reportflow_io::csv::export(&table, tmp).map(|_| ()))
        .map_err(|e| e.to_string())?;
    info!(rows = table.row_count(), columns = table.column_count(), "final table joined");
    Ok(vec![parquet_path, csv_path])
}

fn publish_outcome(report: PublishReport) -> StepOutcome {
    StepOutcome {
        ok: true,
        message: Some(format!("{} file(s), {} bytes", report.uploaded.len(), report.bytes)),
        paths: report.processed_dir.into_iter().collect(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}
