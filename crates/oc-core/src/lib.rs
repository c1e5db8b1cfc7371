//! Core emulator logic for oxidized-cell PS3 emulator
//!
//! This crate provides the foundational types, error handling,
//! configuration, logging and guest thread registry shared by the
//! session controller.

pub mod config;
pub mod error;
pub mod logging;
pub mod registry;
pub mod thread;
pub mod time;

pub use config::{Config, ConfigStore, EMULATOR_DIR_TOKEN};
pub use error::{ConfigError, EmulatorError, LoaderError, Result};
pub use registry::{ThreadRegistry, WorkerRegistry};
pub use thread::{current_thread, CpuFlags, CpuThread, ThreadAction, ThreadKind};
pub use time::{Clock, ManualClock, SystemClock};
