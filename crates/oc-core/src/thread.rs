//! Guest worker thread state
//!
//! Every emulated processor runs on its own native thread. The session never
//! touches a worker directly; it raises flags through [`ThreadAction`] and the
//! worker observes them at its safe points via [`CpuThread::check_state`].

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on a single condvar wait at a safe point
const SAFE_POINT_WAIT: Duration = Duration::from_millis(10);

/// Guest processor family a worker belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ThreadKind {
    /// PowerPC main processor
    Ppu,
    /// SPU owned by a thread group
    Spu,
    /// SPU driven directly through MMIO
    RawSpu,
    /// ARMv7 processor
    Arm,
    /// DMA transfer controller
    Mfc,
}

impl ThreadKind {
    /// Kinds that execute guest code
    pub const PROCESSORS: [ThreadKind; 4] = [
        ThreadKind::Ppu,
        ThreadKind::Arm,
        ThreadKind::RawSpu,
        ThreadKind::Spu,
    ];

    /// Processor kinds followed by the transfer controller
    pub const ALL: [ThreadKind; 5] = [
        ThreadKind::Ppu,
        ThreadKind::Arm,
        ThreadKind::RawSpu,
        ThreadKind::Spu,
        ThreadKind::Mfc,
    ];
}

impl fmt::Display for ThreadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadKind::Ppu => "PPU",
            ThreadKind::Spu => "SPU",
            ThreadKind::RawSpu => "RawSPU",
            ThreadKind::Arm => "ARMv7",
            ThreadKind::Mfc => "MFC",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Control flags observed by a worker at its safe points
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CpuFlags: u32 {
        /// Not started yet
        const STOP         = 0b0000_0001;
        /// Session-wide pause
        const GLOBAL_PAUSE = 0b0000_0010;
        /// Session-wide stop; the worker must leave its loop
        const GLOBAL_STOP  = 0b0000_0100;
        /// Worker has left its loop
        const EXIT         = 0b0000_1000;
    }
}

/// Action broadcast by the session to every live worker of a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadAction {
    /// Begin execution
    Run,
    /// Raise the pause flag
    Pause,
    /// Clear the pause flag and wake
    Resume,
    /// Raise the stop flag and signal termination
    Stop,
}

/// Shared state of one guest worker
pub struct CpuThread {
    id: u32,
    kind: ThreadKind,
    name: String,
    flags: AtomicU32,
    wake_lock: Mutex<()>,
    wake: Condvar,
    last_function: Mutex<Option<&'static str>>,
    last_error: Mutex<Option<String>>,
}

impl CpuThread {
    /// Create a worker in the not-started state
    pub fn new(id: u32, kind: ThreadKind, name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            flags: AtomicU32::new(CpuFlags::STOP.bits()),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
            last_function: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> ThreadKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> CpuFlags {
        CpuFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn has_exited(&self) -> bool {
        self.flags().contains(CpuFlags::EXIT)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flags().contains(CpuFlags::GLOBAL_STOP)
    }

    fn raise(&self, flags: CpuFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    fn clear(&self, flags: CpuFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Wake the worker if it is parked at a safe point
    pub fn notify(&self) {
        let _guard = self.wake_lock.lock();
        self.wake.notify_all();
    }

    /// Apply a session action; applying the same action twice is harmless
    pub fn apply(&self, action: ThreadAction) {
        match action {
            ThreadAction::Run => {
                self.clear(CpuFlags::STOP);
                self.notify();
            }
            ThreadAction::Pause => self.raise(CpuFlags::GLOBAL_PAUSE),
            ThreadAction::Resume => {
                self.clear(CpuFlags::GLOBAL_PAUSE);
                self.notify();
            }
            ThreadAction::Stop => {
                self.raise(CpuFlags::GLOBAL_STOP);
                self.notify();
            }
        }
    }

    /// Safe point: park while not started or paused
    ///
    /// Returns `true` once the worker has to leave its loop.
    pub fn check_state(&self) -> bool {
        let mut guard = self.wake_lock.lock();
        loop {
            let flags = self.flags();
            if flags.contains(CpuFlags::GLOBAL_STOP) {
                return true;
            }
            if !flags.intersects(CpuFlags::STOP | CpuFlags::GLOBAL_PAUSE) {
                return false;
            }
            self.wake.wait_for(&mut guard, SAFE_POINT_WAIT);
        }
    }

    /// Mark the worker as gone; called once its loop has returned
    pub fn mark_exited(&self) {
        self.raise(CpuFlags::EXIT);
    }

    /// Record the guest function currently being executed
    pub fn set_last_function(&self, name: &'static str) {
        *self.last_function.lock() = Some(name);
    }

    pub fn last_function(&self) -> Option<&'static str> {
        *self.last_function.lock()
    }

    /// Record why the worker is about to exit
    pub fn set_last_error(&self, error: impl Into<String>) {
        *self.last_error.lock() = Some(error.into());
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }
}

impl fmt::Debug for CpuThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuThread")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("flags", &self.flags())
            .finish()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<CpuThread>>> = const { RefCell::new(None) };
}

/// Guest worker bound to the calling native thread, if any
pub fn current_thread() -> Option<Arc<CpuThread>> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Bind `thread` to the calling native thread
pub fn set_current_thread(thread: Option<Arc<CpuThread>>) {
    CURRENT.with(|current| *current.borrow_mut() = thread);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_thread_is_not_started() {
        let thread = CpuThread::new(1, ThreadKind::Ppu, "main");
        assert_eq!(thread.flags(), CpuFlags::STOP);
        assert!(!thread.has_exited());
        assert_eq!(thread.name(), "main");
    }

    #[test]
    fn test_actions_are_idempotent() {
        let thread = CpuThread::new(1, ThreadKind::Spu, "spu0");
        thread.apply(ThreadAction::Run);
        thread.apply(ThreadAction::Pause);
        thread.apply(ThreadAction::Pause);
        assert_eq!(thread.flags(), CpuFlags::GLOBAL_PAUSE);

        thread.apply(ThreadAction::Resume);
        thread.apply(ThreadAction::Resume);
        assert_eq!(thread.flags(), CpuFlags::empty());

        thread.apply(ThreadAction::Stop);
        thread.apply(ThreadAction::Stop);
        assert!(thread.is_stop_requested());
    }

    #[test]
    fn test_check_state_runs_after_start() {
        let thread = CpuThread::new(1, ThreadKind::Ppu, "main");
        thread.apply(ThreadAction::Run);
        assert!(!thread.check_state());

        thread.apply(ThreadAction::Stop);
        assert!(thread.check_state());
    }

    #[test]
    fn test_parked_thread_wakes_on_stop() {
        let thread = Arc::new(CpuThread::new(2, ThreadKind::Arm, "arm"));
        let worker = {
            let thread = thread.clone();
            std::thread::spawn(move || thread.check_state())
        };

        std::thread::sleep(Duration::from_millis(20));
        thread.apply(ThreadAction::Stop);
        assert!(worker.join().unwrap());
    }

    #[test]
    fn test_last_function_and_error() {
        let thread = CpuThread::new(3, ThreadKind::Ppu, "worker");
        assert_eq!(thread.last_function(), None);
        thread.set_last_function("sys_mutex_lock");
        assert_eq!(thread.last_function(), Some("sys_mutex_lock"));

        thread.set_last_error("stopped");
        assert_eq!(thread.last_error().as_deref(), Some("stopped"));
    }

    #[test]
    fn test_current_thread_binding() {
        assert!(current_thread().is_none());
        let thread = Arc::new(CpuThread::new(4, ThreadKind::Ppu, "main"));
        set_current_thread(Some(thread.clone()));
        assert_eq!(current_thread().map(|t| t.id()), Some(4));
        set_current_thread(None);
        assert!(current_thread().is_none());
    }
}
