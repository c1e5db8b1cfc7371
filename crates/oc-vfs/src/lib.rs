//! Virtual file system for oxidized-cell
//!
//! The mount table consulted by guest file I/O, device root resolution and
//! the metadata sidecar parser.

pub mod devices;
pub mod error;
pub mod formats;
pub mod metadata;
pub mod mount;

pub use devices::{emulator_dir, DeviceRoots};
pub use error::VfsError;
pub use formats::sfo::{ParamSfo, SfoParser, SfoValue};
pub use metadata::MetadataParser;
pub use mount::{devices as ps3_devices, substitute_emulator_dir, MountTable};
