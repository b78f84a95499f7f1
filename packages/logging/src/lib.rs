#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Logging setup for rowkit applications.
//!
//! Library crates only emit through the `log` facade. Binaries call [`init`] once to
//! install a `free_log_client` layer that filters, formats and optionally writes to a
//! log file.

use std::path::PathBuf;

use free_log_client::FreeLogLayer;
use rowkit_config::{LoggingConfig, make_logs_dir_path};
use thiserror::Error;

pub use free_log_client;
pub use log;

#[cfg(feature = "macros")]
mod macros;

#[cfg(debug_assertions)]
const DEFAULT_LOG_LEVEL: &str = "rowkit=trace";
#[cfg(not(debug_assertions))]
const DEFAULT_LOG_LEVEL: &str = "rowkit=info";

#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Logs(#[from] free_log_client::LogsInitError),
    #[error(transparent)]
    BuildLogsConfig(#[from] free_log_client::BuildLogsConfigError),
    #[error(transparent)]
    BuildFileWriterConfig(#[from] free_log_client::BuildFileWriterConfigError),
}

/// Installs the global logger.
///
/// The filter comes from `ROWKIT_LOG`, then `RUST_LOG`, then the configured level, then
/// a build-dependent default. A file writer is added when `filename` or a configured
/// file is given; relative paths land in the logs directory.
///
/// # Errors
///
/// * If the file writer can't be configured
/// * If the logger fails to initialize
pub fn init(
    filename: Option<&str>,
    config: Option<&LoggingConfig>,
) -> Result<FreeLogLayer, InitError> {
    let mut logs_config = free_log_client::LogsConfig::builder();

    let file = config
        .and_then(|x| x.file.as_deref())
        .or(filename);

    if let Some(file) = file {
        if let Some(path) = log_file_path(file) {
            logs_config = logs_config.with_file_writer(
                free_log_client::FileWriterConfig::builder()
                    .file_path(path)
                    .log_level(free_log_client::Level::Debug),
            )?;
        } else {
            log::warn!("Could not get config dir to put the logs into");
        }
    }

    let filter = env_filter(
        std::env::var("ROWKIT_LOG").ok(),
        std::env::var("RUST_LOG").ok(),
        config.and_then(|x| x.level.as_deref()),
    );

    let layer = free_log_client::init(logs_config.env_filter(filter.as_str()))?;

    Ok(layer)
}

fn log_file_path(file: &str) -> Option<PathBuf> {
    let path = PathBuf::from(file);

    if path.is_absolute() {
        Some(path)
    } else {
        make_logs_dir_path().map(|dir| dir.join(path))
    }
}

fn env_filter(rowkit_log: Option<String>, rust_log: Option<String>, level: Option<&str>) -> String {
    rowkit_log
        .filter(|x| !x.is_empty())
        .or_else(|| rust_log.filter(|x| !x.is_empty()))
        .or_else(|| level.map(level_directive))
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}

/// Maps a configured level name onto an `env_filter` directive for rowkit crates.
fn level_directive(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    let level = match level.as_str() {
        "warning" => "warn",
        "critical" | "fatal" => "error",
        other => other,
    };

    format!("rowkit={level}")
}
