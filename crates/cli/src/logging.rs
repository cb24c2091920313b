//! Tracing setup: human-readable (or JSON) events on stderr, plus a daily
//! JSON-lines file when a log directory is known.
//!
//! `RUST_LOG` wins over `--log-level`.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOG_FILE_PREFIX: &str = "reportflow.log";

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub level: String,
    pub json: bool,
}

/// Build the filter from `RUST_LOG`, falling back to `level`.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber. Keep the returned guard alive until exit
/// or buffered file lines are lost.
///
/// Installing twice is a no-op (tests run many commands in one process).
pub fn init(options: &LogOptions, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let stderr = if options.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_target(false).with_writer(std::io::stderr).boxed()
    };

    let (file, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter(&options.level))
        .with(stderr)
        .with(file)
        .try_init();
    if installed.is_err() {
        return None;
    }
    guard
}
