//! Default collaborators for a headless session
//!
//! No guest code is executed: loaders create parked workers so the lifecycle
//! (run, pause, stop and drain) can be driven end to end.

use crate::services::{
    AddressSpace, ArchLoader, HostCallbacks, KernelObjects, MachineKind, RenderBackend,
    SessionServices,
};
use oc_core::config::GpuBackend;
use oc_core::{EmulatorError, SystemClock, ThreadKind, WorkerRegistry};
use oc_loader::{EmbeddedImageDecryptor, ExecutableFormat, ExecutableImage};
use oc_vfs::SfoParser;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Sleep between safe points of a parked worker
const PARKED_TICK: Duration = Duration::from_millis(5);

/// Tracks which machine layout is mapped
#[derive(Debug, Default)]
pub struct GuestAddressSpace {
    mapped: Mutex<MachineKind>,
    io_map: Mutex<BTreeMap<u32, u32>>,
}

impl GuestAddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mapped(&self) -> MachineKind {
        *self.mapped.lock()
    }

    /// Register an I/O mapping of `size` bytes at `addr`
    pub fn map_io(&self, addr: u32, size: u32) {
        self.io_map.lock().insert(addr, size);
    }

    pub fn io_mappings(&self) -> usize {
        self.io_map.lock().len()
    }
}

impl AddressSpace for GuestAddressSpace {
    fn init(&self, machine: MachineKind) -> Result<(), EmulatorError> {
        if machine == MachineKind::None {
            return Err(EmulatorError::Memory("no machine to map".to_string()));
        }

        let mut mapped = self.mapped.lock();
        if *mapped != MachineKind::None {
            return Err(EmulatorError::Memory(format!("{} memory already mapped", *mapped)));
        }

        *mapped = machine;
        tracing::debug!("Mapped {} memory layout", machine);
        Ok(())
    }

    fn clear_io_map(&self) {
        self.io_map.lock().clear();
    }

    fn close(&self) {
        let mut mapped = self.mapped.lock();
        if *mapped != MachineKind::None {
            tracing::debug!("Unmapped {} memory layout", *mapped);
            *mapped = MachineKind::None;
        }
    }
}

/// Loader that creates one parked worker per executable
pub struct ParkedLoader {
    registry: Arc<WorkerRegistry>,
    next_module: AtomicU32,
    modules: Mutex<Vec<(u32, String)>>,
}

impl ParkedLoader {
    pub fn new(registry: Arc<WorkerRegistry>) -> Self {
        Self {
            registry,
            next_module: AtomicU32::new(1),
            modules: Mutex::new(Vec::new()),
        }
    }

    /// Loaded modules as `(handle, namespace)`
    pub fn modules(&self) -> Vec<(u32, String)> {
        self.modules.lock().clone()
    }

    fn thread_kind(format: ExecutableFormat) -> ThreadKind {
        match format {
            ExecutableFormat::PpuExec | ExecutableFormat::PpuPrx => ThreadKind::Ppu,
            ExecutableFormat::SpuExec => ThreadKind::Spu,
            ExecutableFormat::ArmExec => ThreadKind::Arm,
        }
    }
}

impl ArchLoader for ParkedLoader {
    fn load_executable(&self, image: ExecutableImage) -> Result<(), EmulatorError> {
        let kind = Self::thread_kind(image.format);
        let entry = image.descriptor.entry;

        self.registry.spawn(kind, "main_thread", move |thread| {
            tracing::debug!("{} main thread parked at entry 0x{:x}", kind, entry);
            while !thread.check_state() {
                std::thread::sleep(PARKED_TICK);
            }
        })?;

        Ok(())
    }

    fn load_shared_object(&self, image: ExecutableImage, namespace: &str) -> Result<u32, EmulatorError> {
        let handle = self.next_module.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "Registered {} module 0x{:x} (entry 0x{:x})",
            image.format,
            handle,
            image.descriptor.entry
        );
        self.modules.lock().push((handle, namespace.to_string()));
        Ok(handle)
    }

    fn finalize(&self) {
        self.modules.lock().clear();
    }
}

/// Kernel without object tables
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyKernel;

impl KernelObjects for EmptyKernel {
    fn cleanup(&self) {
        tracing::trace!("No kernel objects to clean up");
    }
}

/// Renderer that draws nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl RenderBackend for NullRenderer {
    fn name(&self) -> &str {
        "Null"
    }
}

/// Host without a window or event loop
#[derive(Debug, Default)]
pub struct HeadlessHost {
    exit_requested: AtomicBool,
}

impl HeadlessHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::Acquire)
    }
}

impl HostCallbacks for HeadlessHost {
    fn exit(&self) {
        tracing::info!("Exit requested");
        self.exit_requested.store(true, Ordering::Release);
    }

    fn render_backend(&self, backend: GpuBackend) -> Option<Box<dyn RenderBackend>> {
        if backend != GpuBackend::Null {
            tracing::warn!("{:?} renderer is unavailable without a window, using Null", backend);
        }
        Some(Box::new(NullRenderer))
    }

    fn process_events(&self) {}
}

/// Services for a headless session around `registry`
pub fn headless_services(registry: Arc<WorkerRegistry>, host: Arc<HeadlessHost>) -> SessionServices {
    SessionServices {
        loader: Arc::new(ParkedLoader::new(registry.clone())),
        registry,
        address_space: Arc::new(GuestAddressSpace::new()),
        kernel: Arc::new(EmptyKernel),
        decryptor: Arc::new(EmbeddedImageDecryptor),
        metadata: Arc::new(SfoParser),
        host,
        clock: Arc::new(SystemClock),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_core::{ThreadAction, ThreadRegistry};
    use oc_loader::{elf::build_header, Classifier};
    use std::io::Cursor;

    fn image(format: ExecutableFormat) -> ExecutableImage {
        Classifier::new()
            .classify(Box::new(Cursor::new(build_header(format.shape(), 0x10000))))
            .unwrap()
    }

    #[test]
    fn test_address_space_lifecycle() {
        let space = GuestAddressSpace::new();
        assert!(space.init(MachineKind::None).is_err());

        space.init(MachineKind::Ps3).unwrap();
        assert_eq!(space.mapped(), MachineKind::Ps3);
        assert!(space.init(MachineKind::Psv).is_err());

        space.map_io(0x4000_0000, 0x10_0000);
        assert_eq!(space.io_mappings(), 1);
        space.clear_io_map();
        assert_eq!(space.io_mappings(), 0);

        space.close();
        space.close();
        assert_eq!(space.mapped(), MachineKind::None);
    }

    #[test]
    fn test_parked_loader_spawns_worker() {
        let registry = Arc::new(WorkerRegistry::new());
        let loader = ParkedLoader::new(registry.clone());

        loader.load_executable(image(ExecutableFormat::ArmExec)).unwrap();
        assert_eq!(registry.threads_of(ThreadKind::Arm).len(), 1);
        assert_eq!(registry.count_live(), 1);

        registry.broadcast(ThreadKind::Arm, ThreadAction::Stop);
        for _ in 0..500 {
            if registry.count_live() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(registry.count_live(), 0);
    }

    #[test]
    fn test_parked_loader_modules() {
        let loader = ParkedLoader::new(Arc::new(WorkerRegistry::new()));
        let a = loader.load_shared_object(image(ExecutableFormat::PpuPrx), "").unwrap();
        let b = loader.load_shared_object(image(ExecutableFormat::PpuPrx), "sys").unwrap();

        assert_ne!(a, b);
        assert_eq!(loader.modules().len(), 2);
        loader.finalize();
        assert!(loader.modules().is_empty());
    }

    #[test]
    fn test_headless_host() {
        let host = HeadlessHost::new();
        for backend in [GpuBackend::Null, GpuBackend::Vulkan] {
            let renderer = host.render_backend(backend).map(|r| r.name().to_string());
            assert_eq!(renderer.as_deref(), Some("Null"));
        }
        assert!(!host.exit_requested());
        host.exit();
        assert!(host.exit_requested());
    }
}
