//! Emulator session
//!
//! A [`Session`] owns the lifecycle of one guest process: environment
//! initialization, boot, run/pause/resume and the blocking stop that drains
//! every worker. One session exists per process; tests build as many
//! independent sessions as they need.
//!
//! Lifecycle methods never return errors. Failures are logged and show up as
//! the resulting [`Status`].

use crate::autopause::AutoPause;
use crate::events::SessionEvents;
use crate::services::{MachineKind, RenderBackend, SessionServices};
use crate::status::{Status, StatusCell};
use oc_core::{ConfigStore, ThreadAction, ThreadKind};
use oc_vfs::{DeviceRoots, MountTable};
use parking_lot::{Mutex, RwLock};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Interval between live-worker checks while stopping
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Guest TTY output file inside the configuration directory
pub const TTY_LOG: &str = "TTY.log";

/// Executable locations probed under a game directory, in order
const BOOT_LIST: [&str; 4] = [
    "PS3_GAME/USRDIR/EBOOT.BIN",
    "USRDIR/EBOOT.BIN",
    "EBOOT.BIN",
    "eboot.bin",
];

/// Paths and titles of the current boot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    /// Host path of the executable
    pub path: String,
    /// Path of the executable as the guest sees it
    pub elf_path: String,
    /// Title from PARAM.SFO, or the path
    pub title: String,
    /// Serial from PARAM.SFO, empty if unknown
    pub title_id: String,
    /// Per-title scratch directory
    pub cache_path: PathBuf,
}

/// Emulator session controller
pub struct Session {
    /// Configuration directory (global config, TTY log, per-title data)
    pub(crate) config_dir: PathBuf,
    /// Live configuration
    pub(crate) config: Arc<ConfigStore>,
    /// Default configuration rendered by the last init
    default_config: RwLock<String>,
    /// Device mounts
    pub(crate) mounts: Arc<MountTable>,
    /// External collaborators
    pub(crate) services: SessionServices,
    /// Observers
    events: SessionEvents,
    /// Auto-pause list
    pub(crate) autopause: Arc<AutoPause>,
    /// Lifecycle state
    pub(crate) status: StatusCell,
    /// Timestamp of the pending pause, 0 if none
    pause_start: AtomicU64,
    /// Total time spent paused since the last run
    pause_amend: AtomicU64,
    /// Machine family of the loaded executable
    pub(crate) machine: Mutex<MachineKind>,
    /// Paths and titles
    pub(crate) info: RwLock<SessionInfo>,
    /// Renderer of a running PPU executable
    pub(crate) render: Mutex<Option<Box<dyn RenderBackend>>>,
    /// Guest TTY output
    tty: Mutex<Option<File>>,
    /// Raised by contexts that cannot stop the session themselves
    stop_requested: AtomicBool,
}

impl Session {
    /// Create a stopped session
    ///
    /// Nothing touches the filesystem until [`Session::init`] or a boot.
    pub fn new(config_dir: impl Into<PathBuf>, services: SessionServices) -> Self {
        Self {
            config_dir: config_dir.into(),
            config: Arc::new(ConfigStore::new()),
            default_config: RwLock::new(String::new()),
            mounts: Arc::new(MountTable::new()),
            services,
            events: SessionEvents::new(),
            autopause: Arc::new(AutoPause::new()),
            status: StatusCell::new(Status::Stopped),
            pause_start: AtomicU64::new(0),
            pause_amend: AtomicU64::new(0),
            machine: Mutex::new(MachineKind::None),
            info: RwLock::new(SessionInfo::default()),
            render: Mutex::new(None),
            tty: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// One-time environment setup, repeated after every stop
    ///
    /// Opens the TTY log, restores the default configuration, reloads the
    /// global configuration file and creates the device directory scaffold.
    pub fn init(&self) {
        {
            let mut tty = self.tty.lock();
            if tty.is_none() {
                match oc_core::logging::open_append(&self.config_dir.join(TTY_LOG)) {
                    Ok(file) => *tty = Some(file),
                    Err(e) => tracing::warn!("Failed to open {}: {}", TTY_LOG, e),
                }
            }
        }

        self.config.reset_to_defaults();
        match self.config.serialize() {
            Ok(text) => *self.default_config.write() = text,
            Err(e) => tracing::warn!("Failed to render default configuration: {}", e),
        }

        let config_path = oc_core::Config::config_path(&self.config_dir);
        if !config_path.exists() {
            if let Err(e) = std::fs::create_dir_all(&self.config_dir)
                .and_then(|_| File::create(&config_path).map(drop))
            {
                tracing::warn!("Failed to create {:?}: {}", config_path, e);
            }
        }
        if let Err(e) = self.config.merge_file(&config_path) {
            tracing::error!("Failed to load {:?}: {}", config_path, e);
        }

        let roots = DeviceRoots::resolve(&self.config.snapshot().vfs, &self.config_dir);
        if let Err(e) = roots.create_scaffold() {
            tracing::error!("Failed to create device directories: {}", e);
        }

        self.stop_requested.store(false, Ordering::Release);
    }

    /// Set the executable for the next boot
    ///
    /// An empty `elf_path` is derived from `path` during boot.
    pub fn set_path(&self, path: &str, elf_path: &str) {
        let mut info = self.info.write();
        info.path = path.to_string();
        info.elf_path = elf_path.to_string();
    }

    /// Boot `path`, or the first known executable inside the directory `path`
    ///
    /// Returns whether an executable was found; the boot outcome itself is
    /// reported through [`Session::status`].
    pub fn boot_game(&self, path: &str, direct: bool) -> bool {
        if direct && Path::new(path).is_file() {
            self.set_path(path, "");
            self.load();
            return true;
        }

        let dir = path.trim_end_matches(['/', '\\']);
        for candidate in BOOT_LIST {
            let elf = format!("{dir}/{candidate}");
            if Path::new(&elf).is_file() {
                self.set_path(&elf, "");
                self.load();
                return true;
            }
        }

        tracing::warn!("No executable found in {}", path);
        false
    }

    /// Directory of installed games
    pub fn game_dir(&self) -> String {
        DeviceRoots::resolve(&self.config.snapshot().vfs, &self.config_dir).game_dir()
    }

    /// Directory of external firmware libraries
    pub fn lib_dir(&self) -> String {
        DeviceRoots::resolve(&self.config.snapshot().vfs, &self.config_dir).lib_dir()
    }

    /// Stop the current session and boot the configured path
    ///
    /// Ends in [`Status::Ready`] (or running, with autostart) on success and
    /// [`Status::Stopped`] on any failure.
    pub fn load(&self) {
        self.stop();
        self.init();

        match self.boot() {
            Ok(()) => {
                if let Err(e) = self.autopause.reload(&self.config_dir) {
                    tracing::warn!("Failed to reload auto-pause list: {}", e);
                }

                if self.config.snapshot().misc.autostart && self.is_ready() {
                    self.run();
                }
            }
            Err(e) => {
                e.report();
                self.stop();
            }
        }
    }

    /// Start the loaded executable, booting it first if needed
    pub fn run(&self) {
        if !self.is_ready() {
            self.load();
            if !self.is_ready() {
                return;
            }
        }

        if self.is_running() {
            self.stop();
        }

        if self.is_paused() {
            self.resume();
            return;
        }

        self.events.on_run.fire();

        self.pause_start.store(0, Ordering::Release);
        self.pause_amend.store(0, Ordering::Release);
        self.status.store(Status::Running);

        for kind in ThreadKind::PROCESSORS {
            self.services.registry.broadcast(kind, ThreadAction::Run);
        }

        tracing::info!("Emulator running");
    }

    /// Pause a running session; returns `false` if it was not running
    pub fn pause(&self) -> bool {
        let start = self.services.clock.now_us();

        if self.status.compare_exchange(Status::Running, Status::Paused).is_err() {
            return false;
        }

        self.events.on_pause.fire();

        if self.pause_start.swap(start, Ordering::AcqRel) != 0 {
            tracing::error!("Session::pause() error: concurrent access");
        }

        for kind in ThreadKind::ALL {
            self.services.registry.broadcast(kind, ThreadAction::Pause);
        }

        tracing::info!("Emulator paused");
        true
    }

    /// Resume a paused session
    pub fn resume(&self) {
        let start = self.pause_start.swap(0, Ordering::AcqRel);

        if start != 0 {
            let elapsed = self.services.clock.now_us().saturating_sub(start);
            self.pause_amend.fetch_add(elapsed, Ordering::AcqRel);
        }

        if self.status.compare_exchange(Status::Paused, Status::Running).is_err() {
            return;
        }

        if start == 0 {
            tracing::error!("Session::resume() error: concurrent access");
        }

        for kind in ThreadKind::ALL {
            self.services.registry.broadcast(kind, ThreadAction::Resume);
        }

        self.events.on_resume.fire();
        tracing::info!("Emulator resumed");
    }

    /// Stop every worker and tear the guest down
    ///
    /// Blocks until all workers have exited. Must not be called from a guest
    /// worker; those use [`Session::request_stop`].
    pub fn stop(&self) {
        if self.status.swap(Status::Stopped) == Status::Stopped {
            return;
        }

        tracing::info!("Stopping emulator...");
        self.events.on_stop.fire();

        let registry = &self.services.registry;
        for kind in ThreadKind::ALL {
            registry.broadcast(kind, ThreadAction::Stop);
        }
        tracing::info!("All threads signaled...");

        while registry.count_live() > 0 {
            self.services.host.process_events();
            std::thread::sleep(STOP_POLL_INTERVAL);
        }
        tracing::info!("All threads stopped...");

        self.services.kernel.cleanup();
        registry.clear();
        tracing::info!("Objects cleared...");

        self.services.address_space.clear_io_map();
        self.services.address_space.close();
        self.services.loader.finalize();

        *self.render.lock() = None;
        *self.machine.lock() = MachineKind::None;

        if self.config.snapshot().misc.autoexit {
            self.services.host.exit();
        } else {
            self.init();
        }
    }

    /// Ask the host to stop the session at its next opportunity
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Append guest TTY output to the TTY log
    pub fn write_tty(&self, text: &str) -> std::io::Result<()> {
        match self.tty.lock().as_mut() {
            Some(file) => file.write_all(text.as_bytes()),
            None => Ok(()),
        }
    }

    pub fn status(&self) -> Status {
        self.status.load()
    }

    pub fn is_running(&self) -> bool {
        self.status() == Status::Running
    }

    pub fn is_paused(&self) -> bool {
        self.status() == Status::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.status() == Status::Stopped
    }

    pub fn is_ready(&self) -> bool {
        self.status() == Status::Ready
    }

    /// Total time spent paused since the last run, in microseconds
    pub fn pause_amend_time(&self) -> u64 {
        self.pause_amend.load(Ordering::Acquire)
    }

    pub fn machine_kind(&self) -> MachineKind {
        *self.machine.lock()
    }

    /// Snapshot of the current paths and titles
    pub fn info(&self) -> SessionInfo {
        self.info.read().clone()
    }

    pub fn path(&self) -> String {
        self.info.read().path.clone()
    }

    pub fn elf_path(&self) -> String {
        self.info.read().elf_path.clone()
    }

    pub fn title(&self) -> String {
        self.info.read().title.clone()
    }

    pub fn title_id(&self) -> String {
        self.info.read().title_id.clone()
    }

    pub fn cache_path(&self) -> PathBuf {
        self.info.read().cache_path.clone()
    }

    /// Name of the active renderer, if one was created
    pub fn render_backend_name(&self) -> Option<String> {
        self.render.lock().as_ref().map(|r| r.name().to_string())
    }

    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    /// Default configuration as rendered by the last init
    pub fn default_config(&self) -> String {
        self.default_config.read().clone()
    }

    pub fn mounts(&self) -> &Arc<MountTable> {
        &self.mounts
    }

    pub fn autopause(&self) -> &Arc<AutoPause> {
        &self.autopause
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn services(&self) -> &SessionServices {
        &self.services
    }
}
