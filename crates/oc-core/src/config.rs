//! Configuration system for oxidized-cell emulator
//!
//! The live configuration is a TOML document. Boot applies override layers
//! on top of the global file with [`ConfigStore::merge_from`], so a layer
//! only needs to carry the keys it changes.

use crate::error::ConfigError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Placeholder substituted with the emulator root in device paths
pub const EMULATOR_DIR_TOKEN: &str = "$(EmulatorDir)";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub misc: MiscConfig,
    pub vfs: VfsConfig,
    pub gpu: GpuConfig,
    pub debug: DebugConfig,
}

/// Session behaviour settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MiscConfig {
    /// Always start after boot
    pub autostart: bool,
    /// Exit the host application when the guest process finishes
    pub autoexit: bool,
}

/// Virtual file system device settings
///
/// Device paths may contain [`EMULATOR_DIR_TOKEN`]. An empty `emulator_dir`
/// means the configuration directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VfsConfig {
    pub emulator_dir: String,
    pub dev_hdd0: String,
    pub dev_hdd1: String,
    pub dev_flash: String,
    pub dev_usb000: String,
    /// Not mounted when empty, unless a disc layout is detected
    pub dev_bdvd: String,
    /// Defaults to the executable directory when empty
    pub app_home: String,
    /// Enable /host_root/
    pub allow_host_root: bool,
}

/// GPU settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct GpuConfig {
    pub backend: GpuBackend,
}

/// GPU backend type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum GpuBackend {
    #[default]
    Vulkan,
    Null,
}

/// Debug settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    pub log_to_file: bool,
    /// Relative paths are resolved against the configuration directory
    pub log_path: PathBuf,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl Default for MiscConfig {
    fn default() -> Self {
        Self {
            autostart: true,
            autoexit: false,
        }
    }
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            emulator_dir: String::new(),
            dev_hdd0: format!("{EMULATOR_DIR_TOKEN}dev_hdd0/"),
            dev_hdd1: format!("{EMULATOR_DIR_TOKEN}dev_hdd1/"),
            dev_flash: format!("{EMULATOR_DIR_TOKEN}dev_flash/"),
            dev_usb000: format!("{EMULATOR_DIR_TOKEN}dev_usb000/"),
            dev_bdvd: String::new(),
            app_home: String::new(),
            allow_host_root: true,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            log_to_file: false,
            log_path: PathBuf::from("oxidized-cell.log"),
        }
    }
}

impl Config {
    /// Get the default configuration directory
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("oxidized-cell")
    }

    /// Get the path to the global configuration file inside `config_dir`
    pub fn config_path(config_dir: &Path) -> PathBuf {
        config_dir.join("config.toml")
    }
}

/// Thread-safe holder of the live configuration
///
/// Written only while a session boots; everything else takes snapshots.
#[derive(Debug, Default)]
pub struct ConfigStore {
    inner: RwLock<Config>,
}

impl ConfigStore {
    /// Create a store holding the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `config`
    pub fn with_config(config: Config) -> Self {
        Self {
            inner: RwLock::new(config),
        }
    }

    /// Clone of the live configuration
    pub fn snapshot(&self) -> Config {
        self.inner.read().clone()
    }

    /// Replace the live configuration with defaults
    pub fn reset_to_defaults(&self) {
        *self.inner.write() = Config::default();
    }

    /// Render the live configuration as TOML
    pub fn serialize(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&*self.inner.read())?)
    }

    /// Merge a TOML document over the live configuration
    ///
    /// Tables merge key by key and values in `text` win. On error the live
    /// configuration is left untouched.
    pub fn merge_from(&self, text: &str) -> Result<(), ConfigError> {
        let overlay: toml::Table = toml::from_str(text)?;

        let mut config = self.inner.write();
        let mut merged = toml::Value::try_from(&*config)?;
        if let toml::Value::Table(base) = &mut merged {
            merge_tables(base, overlay);
        }

        *config = merged.try_into()?;
        Ok(())
    }

    /// Merge the file at `path` if it exists; returns whether it was applied
    pub fn merge_file(&self, path: &Path) -> Result<bool, ConfigError> {
        if !path.is_file() {
            return Ok(false);
        }

        let text = std::fs::read_to_string(path)?;
        self.merge_from(&text)?;
        Ok(true)
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(inner)), toml::Value::Table(patch)) => {
                merge_tables(inner, patch);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
