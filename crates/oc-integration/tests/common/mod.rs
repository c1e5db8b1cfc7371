//! Shared fixtures: recording collaborators and a log capture layer

#![allow(dead_code)]

use oc_core::config::GpuBackend;
use oc_core::{
    Clock, EmulatorError, LoaderError, ManualClock, ThreadAction, ThreadKind, ThreadRegistry,
    WorkerRegistry,
};
use oc_integration::{
    AddressSpace, ArchLoader, AutoPause, HostCallbacks, KernelObjects, MachineKind, RenderBackend,
    Session, SessionServices,
};
use oc_loader::elf::build_header;
use oc_loader::{Decryptor, EmbeddedImageDecryptor, ExecutableFormat, ExecutableImage, SelfHeader};
use oc_vfs::SfoParser;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;
use tempfile::TempDir;
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

pub const NO_AUTOSTART: &str = "[misc]\nautostart = false\n";

/// Registry that records every broadcast
#[derive(Default)]
pub struct CountingRegistry {
    pub workers: WorkerRegistry,
    pub broadcasts: Mutex<Vec<(ThreadKind, ThreadAction)>>,
    pub clears: AtomicUsize,
}

impl CountingRegistry {
    pub fn actions(&self, action: ThreadAction) -> Vec<ThreadKind> {
        self.broadcasts
            .lock()
            .iter()
            .filter(|(_, a)| *a == action)
            .map(|(k, _)| *k)
            .collect()
    }
}

impl ThreadRegistry for CountingRegistry {
    fn broadcast(&self, kind: ThreadKind, action: ThreadAction) -> usize {
        self.broadcasts.lock().push((kind, action));
        self.workers.broadcast(kind, action)
    }

    fn count_live(&self) -> usize {
        self.workers.count_live()
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.workers.clear();
    }
}

/// Loader that spawns parked workers and records what it was asked to load
pub struct RecordingLoader {
    registry: Arc<CountingRegistry>,
    pub calls: Mutex<Vec<String>>,
    pub finalizes: AtomicUsize,
    /// Auto-pause generation observed at each load
    pub generations: Mutex<Vec<u64>>,
    pub autopause: Mutex<Option<Arc<AutoPause>>>,
}

impl RecordingLoader {
    fn new(registry: Arc<CountingRegistry>) -> Self {
        Self {
            registry,
            calls: Mutex::new(Vec::new()),
            finalizes: AtomicUsize::new(0),
            generations: Mutex::new(Vec::new()),
            autopause: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
        if let Some(autopause) = self.autopause.lock().as_ref() {
            self.generations.lock().push(autopause.generation());
        }
    }
}

impl ArchLoader for RecordingLoader {
    fn load_executable(&self, image: ExecutableImage) -> Result<(), EmulatorError> {
        let kind = match image.format {
            ExecutableFormat::SpuExec => ThreadKind::Spu,
            ExecutableFormat::ArmExec => ThreadKind::Arm,
            _ => ThreadKind::Ppu,
        };

        self.registry.workers.spawn(kind, "main_thread", |thread| {
            while !thread.check_state() {
                std::thread::sleep(Duration::from_millis(1));
            }
        })?;

        self.record(image.format.to_string());
        Ok(())
    }

    fn load_shared_object(&self, image: ExecutableImage, namespace: &str) -> Result<u32, EmulatorError> {
        self.record(format!("{}:{}", image.format, namespace));
        Ok(7)
    }

    fn finalize(&self) {
        self.finalizes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingMemory {
    pub inits: Mutex<Vec<MachineKind>>,
    pub io_clears: AtomicUsize,
    pub closes: AtomicUsize,
    pub fail_init: AtomicBool,
}

impl AddressSpace for RecordingMemory {
    fn init(&self, machine: MachineKind) -> Result<(), EmulatorError> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(EmulatorError::Memory("reservation failed".to_string()));
        }
        self.inits.lock().push(machine);
        Ok(())
    }

    fn clear_io_map(&self) {
        self.io_clears.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct CountingKernel {
    pub cleanups: AtomicUsize,
}

impl KernelObjects for CountingKernel {
    fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockRenderer;

impl RenderBackend for MockRenderer {
    fn name(&self) -> &str {
        "Mock"
    }
}

#[derive(Default)]
pub struct RecordingHost {
    pub exits: AtomicUsize,
    /// Backend requested for each renderer
    pub renderers: Mutex<Vec<GpuBackend>>,
    pub pumps: AtomicUsize,
}

impl HostCallbacks for RecordingHost {
    fn exit(&self) {
        self.exits.fetch_add(1, Ordering::SeqCst);
    }

    fn render_backend(&self, backend: GpuBackend) -> Option<Box<dyn RenderBackend>> {
        self.renderers.lock().push(backend);
        Some(Box::new(MockRenderer))
    }

    fn process_events(&self) {
        self.pumps.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct CountingDecryptor {
    pub calls: AtomicUsize,
    /// Overwrite this file with these bytes during the next decrypt
    pub replace_source: Mutex<Option<(PathBuf, Vec<u8>)>>,
}

impl Decryptor for CountingDecryptor {
    fn decrypt(&self, image: Vec<u8>) -> Result<Vec<u8>, LoaderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let plain = EmbeddedImageDecryptor.decrypt(image);

        if let Some((path, data)) = self.replace_source.lock().take() {
            let before = std::fs::metadata(&path).unwrap().modified().unwrap();
            std::fs::write(&path, data).unwrap();
            set_mtime(&path, before + Duration::from_secs(300));
        }

        plain
    }
}

/// Manual clock that can hold one caller inside `now_us`
pub struct GatedClock {
    inner: ManualClock,
    gate: Mutex<Option<Arc<Barrier>>>,
}

impl GatedClock {
    fn new(start_us: u64) -> Self {
        Self {
            inner: ManualClock::new(start_us),
            gate: Mutex::new(None),
        }
    }

    pub fn set(&self, now_us: u64) {
        self.inner.set(now_us);
    }

    /// The next reader meets `barrier` twice: once on entry and once before returning
    pub fn hold_next(&self, barrier: Arc<Barrier>) {
        *self.gate.lock() = Some(barrier);
    }
}

impl Clock for GatedClock {
    fn now_us(&self) -> u64 {
        let gate = self.gate.lock().take();
        if let Some(barrier) = gate {
            barrier.wait();
            barrier.wait();
        }
        self.inner.now_us()
    }
}

/// A session wired to recording collaborators inside a temporary directory
pub struct Fixture {
    pub temp: TempDir,
    pub config_dir: PathBuf,
    pub registry: Arc<CountingRegistry>,
    pub loader: Arc<RecordingLoader>,
    pub memory: Arc<RecordingMemory>,
    pub kernel: Arc<CountingKernel>,
    pub host: Arc<RecordingHost>,
    pub decryptor: Arc<CountingDecryptor>,
    pub clock: Arc<GatedClock>,
    pub session: Arc<Session>,
}

impl Fixture {
    /// Fixture with the default configuration (autostart on)
    pub fn new() -> Self {
        Self::with_config("")
    }

    /// Fixture whose global `config.toml` contains `config`
    pub fn with_config(config: &str) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let config_dir = temp.path().join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.toml"), config).unwrap();

        let registry = Arc::new(CountingRegistry::default());
        let loader = Arc::new(RecordingLoader::new(registry.clone()));
        let memory = Arc::new(RecordingMemory::default());
        let kernel = Arc::new(CountingKernel::default());
        let host = Arc::new(RecordingHost::default());
        let decryptor = Arc::new(CountingDecryptor::default());
        let clock = Arc::new(GatedClock::new(1_000));

        let services = SessionServices {
            registry: registry.clone(),
            address_space: memory.clone(),
            loader: loader.clone(),
            kernel: kernel.clone(),
            decryptor: decryptor.clone(),
            metadata: Arc::new(SfoParser),
            host: host.clone(),
            clock: clock.clone(),
        };

        let session = Arc::new(Session::new(&config_dir, services));
        *loader.autopause.lock() = Some(session.autopause().clone());

        Self {
            temp,
            config_dir,
            registry,
            loader,
            memory,
            kernel,
            host,
            decryptor,
            clock,
            session,
        }
    }

    /// Write a file below the temporary root, returning its path
    pub fn write_file(&self, relative: &str, data: &[u8]) -> String {
        let path = self.temp.path().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, data).unwrap();
        path.to_string_lossy().into_owned()
    }

    /// Write a minimal executable of `format`
    pub fn write_executable(&self, format: ExecutableFormat, relative: &str) -> String {
        self.write_file(relative, &executable(format))
    }

    /// Set `path` and load it
    pub fn boot(&self, path: &str) {
        self.session.set_path(path, "");
        self.session.load();
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.session.stop();
    }
}

pub fn executable(format: ExecutableFormat) -> Vec<u8> {
    build_header(format.shape(), 0x10200)
}

/// SELF container carrying `payload` unencrypted
pub fn debug_self(payload: &[u8]) -> Vec<u8> {
    let header = SelfHeader {
        version: 2,
        key_type: 0x8000,
        header_type: 1,
        metadata_offset: 0,
        header_len: 0x80,
        data_len: payload.len() as u64,
    };
    let mut image = header.to_bytes();
    image.resize(0x80, 0);
    image.extend_from_slice(payload);
    image
}

pub fn set_mtime(path: &Path, time: std::time::SystemTime) {
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_times(std::fs::FileTimes::new().set_modified(time)).unwrap();
}

/// One captured log event
#[derive(Debug, Clone)]
pub struct Captured {
    pub level: Level,
    pub fatal: bool,
    pub message: String,
}

#[derive(Clone, Default)]
struct CaptureLayer {
    events: Arc<Mutex<Vec<Captured>>>,
}

#[derive(Default)]
struct CaptureVisitor {
    fatal: bool,
    message: String,
}

impl Visit for CaptureVisitor {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "fatal" {
            self.fatal = value;
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = CaptureVisitor::default();
        event.record(&mut visitor);
        self.events.lock().push(Captured {
            level: *event.metadata().level(),
            fatal: visitor.fatal,
            message: visitor.message,
        });
    }
}

/// Run `f` with a capturing subscriber on this thread
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, Vec<Captured>) {
    let layer = CaptureLayer::default();
    let subscriber = tracing_subscriber::registry().with(layer.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    let events = layer.events.lock().clone();
    (result, events)
}

pub fn errors(events: &[Captured]) -> Vec<&Captured> {
    events.iter().filter(|e| e.level == Level::ERROR).collect()
}
