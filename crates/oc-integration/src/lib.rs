//! Session controller for oxidized-cell PS3 emulator
//!
//! This crate ties configuration, the VFS and the executable loaders into
//! the emulator session: boot, run, pause, resume and stop.

pub mod autopause;
pub mod boot;
pub mod events;
pub mod fault;
pub mod host;
pub mod services;
pub mod session;
pub mod status;

pub use autopause::AutoPause;
pub use boot::BootError;
pub use events::{Event, SessionEvents};
pub use fault::report_guest_fault;
pub use host::{headless_services, HeadlessHost};
pub use services::{
    AddressSpace, ArchLoader, HostCallbacks, KernelObjects, MachineKind, RenderBackend,
    SessionServices,
};
pub use session::{Session, SessionInfo};
pub use status::Status;
