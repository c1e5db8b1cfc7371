//! Debug auto-pause list
//!
//! `pause.bin` in the configuration directory holds little-endian u32 ids of
//! functions and syscalls that pause the session when reached.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// File name of the auto-pause list
pub const PAUSE_FILE: &str = "pause.bin";

/// Auto-pause settings, reloaded on every successful boot
#[derive(Debug, Default)]
pub struct AutoPause {
    ids: RwLock<BTreeSet<u32>>,
    generation: AtomicU64,
}

impl AutoPause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-read `<config_dir>/pause.bin`; a missing file clears the list
    pub fn reload(&self, config_dir: &Path) -> std::io::Result<()> {
        let path = config_dir.join(PAUSE_FILE);
        let ids = match std::fs::read(&path) {
            Ok(data) => {
                if data.len() % 4 != 0 {
                    tracing::warn!("{:?}: ignoring {} trailing bytes", path, data.len() % 4);
                }
                data.chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(e),
        };

        tracing::debug!("Auto-pause: {} entries", ids.len());
        *self.ids.write() = ids;
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Whether reaching `id` pauses the session
    pub fn contains(&self, id: u32) -> bool {
        self.ids.read().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.read().is_empty()
    }

    /// Number of completed reloads
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
