//! Tracing setup.
//!
//! The dashboard owns the terminal, so it always logs to a daily rolling
//! file. Headless runs follow `logging.output` and write to stderr when it
//! is `console`, keeping stdout clean for JSON.

use anyhow::{Context, Result};
use blockwatch_core::MonitorConfig;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "blockwatch.log";

/// The returned guard must live until exit or buffered lines are lost.
pub fn init_logging(config: &MonitorConfig, verbose: bool, headless: bool) -> Result<Option<WorkerGuard>> {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let json = config.logging.format == "json";

    if headless && config.logging.output == "console" {
        init_console_logging(filter, json);
        return Ok(None);
    }

    init_file_logging(filter, json, &config.paths.log_directory).map(Some)
}

fn init_console_logging(filter: EnvFilter, json: bool) {
    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_ansi(true)
                    .pretty(),
            )
            .init();
    }
}

fn init_file_logging(filter: EnvFilter, json: bool, log_dir: &Path) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(fmt::layer().json().with_writer(non_blocking).with_current_span(true))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
            .init();
    }

    Ok(guard)
}
