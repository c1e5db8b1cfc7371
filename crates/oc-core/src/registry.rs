//! Guest worker identity registry
//!
//! Owns every spawned guest worker, grouped by [`ThreadKind`]. The session
//! only reaches workers through [`ThreadRegistry::broadcast`].

use crate::thread::{set_current_thread, CpuThread, ThreadAction, ThreadKind};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Identity/lookup service for guest workers
pub trait ThreadRegistry: Send + Sync {
    /// Apply `action` to every live worker of `kind`; returns how many were reached
    fn broadcast(&self, kind: ThreadKind, action: ThreadAction) -> usize;

    /// Number of workers whose native thread has not finished
    fn count_live(&self) -> usize;

    /// Forget every registered worker
    fn clear(&self);
}

/// Decrements the live count when a worker's native thread finishes
struct LiveGuard {
    thread: Arc<CpuThread>,
    live: Arc<AtomicUsize>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.thread.mark_exited();
        self.live.fetch_sub(1, Ordering::AcqRel);
        tracing::debug!("{} thread '{}' exited", self.thread.kind(), self.thread.name());
    }
}

/// Registry backed by native threads
pub struct WorkerRegistry {
    next_id: AtomicU32,
    threads: RwLock<BTreeMap<u32, Arc<CpuThread>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    live: Arc<AtomicUsize>,
}

impl WorkerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1), // 0 is never a valid thread id
            threads: RwLock::new(BTreeMap::new()),
            handles: Mutex::new(Vec::new()),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spawn a worker of `kind` running `body`
    ///
    /// The worker starts in the not-started state; `body` is expected to
    /// call [`CpuThread::check_state`] before executing guest code.
    pub fn spawn<F>(&self, kind: ThreadKind, name: &str, body: F) -> std::io::Result<Arc<CpuThread>>
    where
        F: FnOnce(&CpuThread) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let thread = Arc::new(CpuThread::new(id, kind, name));

        self.live.fetch_add(1, Ordering::AcqRel);
        let guard = LiveGuard {
            thread: thread.clone(),
            live: self.live.clone(),
        };

        let spawned = std::thread::Builder::new()
            .name(format!("{kind} {name}"))
            .spawn(move || {
                set_current_thread(Some(guard.thread.clone()));
                body(&guard.thread);
                set_current_thread(None);
                drop(guard);
            });

        // On spawn failure the closure, and with it the guard, is dropped
        let handle = spawned?;

        self.threads.write().insert(id, thread.clone());
        self.handles.lock().push(handle);

        tracing::debug!("Spawned {} thread '{}' (id {})", kind, name, id);
        Ok(thread)
    }

    /// Look up a worker by id
    pub fn get(&self, id: u32) -> Option<Arc<CpuThread>> {
        self.threads.read().get(&id).cloned()
    }

    /// Registered workers of `kind`, live or not
    pub fn threads_of(&self, kind: ThreadKind) -> Vec<Arc<CpuThread>> {
        self.threads
            .read()
            .values()
            .filter(|t| t.kind() == kind)
            .cloned()
            .collect()
    }

    /// Total registered workers
    pub fn len(&self) -> usize {
        self.threads.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.read().is_empty()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadRegistry for WorkerRegistry {
    fn broadcast(&self, kind: ThreadKind, action: ThreadAction) -> usize {
        let targets: Vec<_> = self
            .threads
            .read()
            .values()
            .filter(|t| t.kind() == kind && !t.has_exited())
            .cloned()
            .collect();

        for thread in &targets {
            thread.apply(action);
        }

        targets.len()
    }

    fn count_live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    fn clear(&self) {
        self.threads.write().clear();

        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}
