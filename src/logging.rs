//! Subscriber setup for `tracing` output on stderr and in an optional log file

use crate::config::{LogLevel, LoggingConfig};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Failed to create log directory {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Logging already initialized: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Filter from `RUST_LOG` when set, otherwise from `level`
pub fn build_filter(rust_log: Option<&str>, level: LogLevel) -> Result<EnvFilter, LoggingError> {
    match rust_log.filter(|directives| !directives.trim().is_empty()) {
        Some(directives) => Ok(EnvFilter::try_new(directives)?),
        None => Ok(EnvFilter::try_new(format!("askdb={level},warn"))?),
    }
}

fn split_log_path(path: &Path) -> (PathBuf, PathBuf) {
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("askdb.log"));
    (directory, file_name)
}

/// Install the global subscriber. The returned guard flushes the log file when dropped
/// and must be held for the life of the program.
pub fn init(
    config: &LoggingConfig,
    level_override: Option<LogLevel>,
) -> Result<Option<WorkerGuard>, LoggingError> {
    let level = level_override.unwrap_or(config.level);
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(rust_log.as_deref(), level)?;

    let console_layer = config.console_output.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    let (file_layer, guard) = if config.file_output {
        let (directory, file_name) = split_log_path(Path::new(&config.file_path));
        std::fs::create_dir_all(&directory).map_err(|source| LoggingError::Io {
            path: directory.clone(),
            source,
        })?;
        let appender = tracing_appender::rolling::never(&directory, &file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::debug!("Logging initialized at level {}", level);
    Ok(guard)
}
