//! Logging setup: console plus an append-only log file.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Level from the `-v` / `-q` flags.
pub fn level_for(verbose: bool, quiet: bool) -> Level {
    if verbose {
        Level::DEBUG
    } else if quiet {
        Level::ERROR
    } else {
        Level::INFO
    }
}

/// Open the log file in append mode, creating it if needed.
pub fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {:?}", path))
}

/// Build the subscriber; `RUST_LOG` overrides `level` when set.
pub fn build_subscriber(level: Level, log_file: Option<File>) -> impl Subscriber + Send + Sync {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let console = fmt::layer().with_target(false);
    let file = log_file.map(|f| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(f))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
}

/// Install the global subscriber.
pub fn init(level: Level, log_file: Option<&Path>) -> Result<()> {
    let file = log_file.map(open_log_file).transpose()?;
    build_subscriber(level, file)
        .try_init()
        .context("Failed to install logger")?;
    Ok(())
}
