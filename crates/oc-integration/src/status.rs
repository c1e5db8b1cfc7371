//! Session status cell
//!
//! Every lifecycle transition is one compare-exchange or swap on this cell.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    Running = 0,
    Paused = 1,
    Stopped = 2,
    /// Executable loaded, workers created but not started
    Ready = 3,
}

impl Status {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Status::Running,
            1 => Status::Paused,
            3 => Status::Ready,
            _ => Status::Stopped,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Running => "Running",
            Status::Paused => "Paused",
            Status::Stopped => "Stopped",
            Status::Ready => "Ready",
        };
        f.write_str(name)
    }
}

/// Atomic holder of a [`Status`]
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new(status: Status) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub fn load(&self) -> Status {
        Status::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, status: Status) {
        self.0.store(status as u8, Ordering::Release);
    }

    /// Replace the status, returning the previous one
    pub fn swap(&self, status: Status) -> Status {
        Status::from_u8(self.0.swap(status as u8, Ordering::AcqRel))
    }

    /// Move from `current` to `new`; on failure returns the observed status
    pub fn compare_exchange(&self, current: Status, new: Status) -> Result<Status, Status> {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(Status::from_u8)
            .map_err(Status::from_u8)
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new(Status::Stopped)
    }
}
