//! Collaborators the session drives but does not own
//!
//! Everything the session needs from the rest of the emulator is reached
//! through these traits, so a session can be assembled from real subsystems
//! or from test doubles.

use oc_core::config::GpuBackend;
use oc_core::{Clock, EmulatorError, ThreadRegistry};
use oc_loader::{Decryptor, ExecutableFormat, ExecutableImage};
use oc_vfs::MetadataParser;
use std::fmt;
use std::sync::Arc;

/// Guest machine family of the loaded executable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MachineKind {
    /// Nothing loaded
    #[default]
    None,
    /// PS3 (PPU/SPU)
    Ps3,
    /// PS Vita (ARMv7)
    Psv,
}

impl MachineKind {
    /// Machine family an executable format runs on
    pub fn of(format: ExecutableFormat) -> Self {
        match format {
            ExecutableFormat::PpuExec | ExecutableFormat::PpuPrx | ExecutableFormat::SpuExec => {
                MachineKind::Ps3
            }
            ExecutableFormat::ArmExec => MachineKind::Psv,
        }
    }
}

impl fmt::Display for MachineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MachineKind::None => "none",
            MachineKind::Ps3 => "ps3",
            MachineKind::Psv => "psv",
        };
        f.write_str(name)
    }
}

/// Guest virtual address space
pub trait AddressSpace: Send + Sync {
    /// Map the memory layout of `machine`
    fn init(&self, machine: MachineKind) -> Result<(), EmulatorError>;

    /// Drop every memory-mapped I/O mapping
    fn clear_io_map(&self);

    /// Unmap everything; calling it on a closed space does nothing
    fn close(&self);
}

/// Architecture loaders
///
/// Loading populates the worker pools through the thread registry.
pub trait ArchLoader: Send + Sync {
    /// Load an executable and create its initial worker(s)
    fn load_executable(&self, image: ExecutableImage) -> Result<(), EmulatorError>;

    /// Load a relocatable module into `namespace`, returning its handle
    fn load_shared_object(&self, image: ExecutableImage, namespace: &str) -> Result<u32, EmulatorError>;

    /// Release per-session state of the primary processor family
    fn finalize(&self);
}

/// Kernel object tables (mutexes, queues, memory containers, ...)
pub trait KernelObjects: Send + Sync {
    fn cleanup(&self);
}

/// Graphics renderer created for a running PPU executable
pub trait RenderBackend: Send {
    fn name(&self) -> &str;
}

/// Callbacks into the embedding application
pub trait HostCallbacks: Send + Sync {
    /// Leave the application
    fn exit(&self);

    /// Create a renderer of the configured `backend`, if the host has one
    fn render_backend(&self, backend: GpuBackend) -> Option<Box<dyn RenderBackend>>;

    /// Handle pending host events while the session is blocked
    fn process_events(&self);
}

/// Everything a [`Session`](crate::Session) is assembled from
#[derive(Clone)]
pub struct SessionServices {
    /// Worker identity/lookup service
    pub registry: Arc<dyn ThreadRegistry>,
    /// Guest memory
    pub address_space: Arc<dyn AddressSpace>,
    /// PPU/SPU/ARMv7 loaders
    pub loader: Arc<dyn ArchLoader>,
    /// Kernel object tables
    pub kernel: Arc<dyn KernelObjects>,
    /// SELF decryption
    pub decryptor: Arc<dyn Decryptor>,
    /// Title metadata parser
    pub metadata: Arc<dyn MetadataParser>,
    /// Embedding application
    pub host: Arc<dyn HostCallbacks>,
    /// Time source for pause accounting
    pub clock: Arc<dyn Clock>,
}
