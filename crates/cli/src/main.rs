// reportflow CLI - daily ERP report export pipeline
// Exit codes: see exit_codes.rs

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use reportflow_cli::exit_codes::{EXIT_FAILURES, EXIT_SUCCESS};
use reportflow_cli::logging::{self, LogOptions};
use reportflow_cli::pipeline::{self, RunOptions, Session};
use reportflow_cli::{parse_today, publish, resolve_effective_date, CliError};
use reportflow_config::{AppConfig, ConfigError};
use reportflow_driver::{BridgeTimeouts, DriverSettings, GuiDriver, ProcessBridge};
use reportflow_engine::DatasetRules;
use reportflow_io::{normalize, NormalizeRequest};

#[derive(Parser)]
#[command(name = "reportflow")]
#[command(about = "Run ERP report exports, normalize them for BI, consolidate and publish")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Without a subcommand, `reportflow` runs the pipeline.
    #[command(flatten)]
    run: RunArgs,

    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log to stderr as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    /// Config file (default: ./reportflow.toml, then the user config dir)
    #[arg(long, env = "REPORTFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Run only these recipe ids (comma-separated or repeated)
    #[arg(long, value_delimiter = ',', value_name = "ID")]
    only: Vec<String>,

    /// Skip the ERP and FTP; normalize raw files already on disk
    #[arg(long)]
    dry_run: bool,

    /// Override output.dir
    #[arg(long)]
    output: Option<PathBuf>,

    /// Effective date sent to the ERP
    #[arg(long, value_name = "DD.MM.YYYY")]
    date: Option<String>,

    /// Pretend today is this day when computing the effective date
    #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_today)]
    today: Option<NaiveDate>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline (the default)
    #[command(after_help = "\
Examples:
  reportflow run --config reportflow.toml
  reportflow run --only returns,volume --date 27.09.2025
  reportflow run --dry-run --today 2025-09-29")]
    Run(RunArgs),

    /// Parse and validate a config file
    Validate {
        #[arg(long, env = "REPORTFLOW_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Normalize one raw extract into the BI artifacts
    #[command(after_help = "\
Examples:
  reportflow normalize output/no_entregas.xls --dataset returns
  reportflow normalize plr.xls --dataset plr --output out/ --date 27.09.2025")]
    Normalize {
        /// Raw extract (.xls/.xlsx/.txt as exported by the ERP)
        file: PathBuf,

        /// Dataset whose rules apply
        #[arg(long)]
        dataset: String,

        #[arg(long, env = "REPORTFLOW_CONFIG")]
        config: Option<PathBuf>,

        /// Output directory (default: next to FILE)
        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long, value_name = "DD.MM.YYYY")]
        date: Option<String>,

        #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_today)]
        today: Option<NaiveDate>,
    },

    /// Upload matching files to the FTP drop
    Publish {
        #[arg(long, env = "REPORTFLOW_CONFIG")]
        config: Option<PathBuf>,
    },

    /// List the controls on the ERP client's current screen
    DumpControls {
        #[arg(long, env = "REPORTFLOW_CONFIG")]
        config: Option<PathBuf>,

        /// Control to start from
        #[arg(long, default_value = "wnd[0]")]
        root: String,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\ntarget:  ", env!("TARGET"),
        "\nbridge protocol: 1",
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let log = LogOptions { level: cli.log_level.clone(), json: cli.log_json };

    let result = match cli.command {
        None => cmd_run(cli.run, &log),
        Some(Commands::Run(args)) => cmd_run(args, &log),
        Some(Commands::Validate { config }) => cmd_validate(config),
        Some(Commands::Normalize { file, dataset, config, output, date, today }) => {
            cmd_normalize(&file, &dataset, config, output, date, today, &log)
        }
        Some(Commands::Publish { config }) => cmd_publish(config, &log),
        Some(Commands::DumpControls { config, root }) => cmd_dump_controls(config, &root, &log),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(CliError { code, message, hint }) => {
            eprintln!("error: {}", message);
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<AppConfig, CliError> {
    Ok(AppConfig::load(path.as_deref())?)
}

fn print_json(value: &impl serde::Serialize) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| CliError::failure(e.to_string()))?;
    writeln!(io::stdout().lock(), "{}", json).map_err(|e| CliError::failure(e.to_string()))
}

// ============================================================================
// run
// ============================================================================

fn cmd_run(args: RunArgs, log: &LogOptions) -> Result<u8, CliError> {
    let mut config = load_config(args.config)?;
    if let Some(dir) = args.output {
        config.override_output_dir(dir);
    }
    for id in &args.only {
        if config.recipe(id).is_none() {
            return Err(CliError::config(format!("--only: unknown recipe '{id}'"))
                .with_hint("recipe ids are the `id` keys under [[recipes]]"));
        }
    }
    let (effective_date, effective_day) = resolve_effective_date(args.date.as_deref(), args.today)?;

    let _guard = logging::init(log, Some(&config.log_dir()));

    let options = RunOptions { effective_date, effective_day, only: args.only, dry_run: args.dry_run };
    let session = if args.dry_run {
        Session::DryRun
    } else {
        match open_driver(&config) {
            Ok(driver) => Session::Live(driver),
            Err(e) => Session::Unavailable(e.message),
        }
    };

    let summary = pipeline::run(&config, &options, session);
    print_json(&summary)?;
    Ok(summary.exit_code())
}

fn open_driver(config: &AppConfig) -> Result<GuiDriver<ProcessBridge>, CliError> {
    let bridge = ProcessBridge::spawn(&config.erp.bridge, BridgeTimeouts::from(&config.erp)).map_err(|e| CliError::driver(&e))?;
    info!(helper = %bridge.helper(), "scripting bridge connected");
    Ok(GuiDriver::new(bridge, DriverSettings::from(&config.erp)))
}

// ============================================================================
// validate
// ============================================================================

fn cmd_validate(config: Option<PathBuf>) -> Result<u8, CliError> {
    let config = load_config(config)?;
    let consolidated = config.datasets.iter().filter(|d| d.consolidate).count();
    println!(
        "config ok: {} recipe(s), {} dataset(s) ({} consolidated), final table {}, ftp {}",
        config.recipes.len(),
        config.datasets.len(),
        consolidated,
        match &config.final_table {
            Some(ft) if ft.enabled => "on",
            _ => "off",
        },
        if config.ftp.enabled { "on" } else { "off" },
    );
    Ok(EXIT_SUCCESS)
}

// ============================================================================
// normalize
// ============================================================================

fn cmd_normalize(
    file: &Path,
    dataset: &str,
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    date: Option<String>,
    today: Option<NaiveDate>,
    log: &LogOptions,
) -> Result<u8, CliError> {
    let _guard = logging::init(log, None);

    // An explicit --config must load; the default search may come up empty.
    let config = match config {
        Some(path) => Some(load_config(Some(path))?),
        None => match AppConfig::load(None) {
            Ok(c) => Some(c),
            Err(ConfigError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        },
    };
    let rules = match config.as_ref().and_then(|c| c.dataset(dataset)) {
        Some(d) => d.rules.clone(),
        None => {
            warn!(dataset, "no rules configured for dataset; normalizing without rules");
            DatasetRules::default()
        }
    };

    if !file.is_file() {
        return Err(CliError::config(format!("no such file: {}", file.display())));
    }
    let (effective_date, _) = resolve_effective_date(date.as_deref(), today)?;
    let out_dir = output.unwrap_or_else(|| {
        file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new(".")).to_path_buf()
    });
    let base_name = file.file_stem().and_then(|s| s.to_str()).unwrap_or(dataset);

    let output = normalize(&NormalizeRequest {
        raw_path: file,
        dataset,
        rules: &rules,
        out_dir: &out_dir,
        base_name,
        effective_date: &effective_date,
    })
    .map_err(|e| CliError::failure(e.to_string()))?;

    print_json(&serde_json::json!({
        "artifacts": output.artifacts.paths(),
        "metadata": output.metadata,
    }))?;
    Ok(EXIT_SUCCESS)
}

// ============================================================================
// publish
// ============================================================================

fn cmd_publish(config: Option<PathBuf>, log: &LogOptions) -> Result<u8, CliError> {
    let config = load_config(config)?;
    if config.ftp.host.trim().is_empty() {
        return Err(CliError::config("ftp.host is not set"));
    }
    if !config.ftp.enabled {
        warn!("ftp.enabled is false; publishing because it was asked for explicitly");
    }
    let _guard = logging::init(log, Some(&config.log_dir()));

    match publish::publish(&config.ftp, config.ftp_local_dir()) {
        Ok(report) => {
            print_json(&report)?;
            Ok(EXIT_SUCCESS)
        }
        Err(e) => Err(CliError { code: EXIT_FAILURES, message: e.to_string(), hint: None }
            .with_hint("nothing was moved; the files will be picked up by the next publish")),
    }
}

// ============================================================================
// dump-controls
// ============================================================================

fn cmd_dump_controls(config: Option<PathBuf>, root: &str, log: &LogOptions) -> Result<u8, CliError> {
    let config = load_config(config)?;
    let _guard = logging::init(log, None);

    let mut driver = open_driver(&config)?;
    driver
        .attach(config.erp.connection_index, config.erp.session_index)
        .map_err(|e| CliError::driver(&e))?;
    let controls = driver.dump_controls(root);
    if let Err(e) = driver.release() {
        warn!(error = %e, "could not release the session");
    }
    let controls = controls.map_err(|e| CliError::driver(&e))?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for c in &controls {
        let marker = if c.container { "/" } else { "" };
        writeln!(handle, "{}{}\t{}", c.id, marker, c.kind).map_err(|e| CliError::failure(e.to_string()))?;
    }
    Ok(EXIT_SUCCESS)
}
