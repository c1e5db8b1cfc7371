//! Logging setup
//!
//! Installs the global `tracing` subscriber: an env filter (falling back to
//! the configured level), a stdout formatter and an optional append-only log
//! file under the configuration directory.

use crate::config::Config;
use crate::error::{EmulatorError, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Resolve the log file location for `config`
pub fn log_file_path(config: &Config, config_dir: &Path) -> PathBuf {
    if config.debug.log_path.is_absolute() {
        config.debug.log_path.clone()
    } else {
        config_dir.join(&config.debug.log_path)
    }
}

/// Open `path` for appending, creating parent directories as needed
pub fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over `debug.log_level`.
pub fn init(config: &Config, config_dir: &Path) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.debug.log_level.as_filter()));

    let file_layer = if config.debug.log_to_file {
        let file = open_append(&log_file_path(config, config_dir))?;
        Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(file)),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|e| EmulatorError::Logging(e.to_string()))
}
