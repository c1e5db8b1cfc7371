//! Lifecycle observers
//!
//! Subscribers run synchronously on the thread performing the transition,
//! in subscription order.

use parking_lot::Mutex;
use std::sync::Arc;

type Callback = Arc<dyn Fn() + Send + Sync>;

/// One notification point with any number of subscribers
#[derive(Default)]
pub struct Event {
    callbacks: Mutex<Vec<Callback>>,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.lock().push(Arc::new(callback));
    }

    /// Invoke every subscriber
    pub fn fire(&self) {
        // Subscribers may subscribe again or touch the session
        let callbacks = self.callbacks.lock().clone();
        for callback in &callbacks {
            callback();
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.lock().is_empty()
    }
}

/// The four session notification points
#[derive(Default)]
pub struct SessionEvents {
    pub on_run: Event,
    pub on_pause: Event,
    pub on_resume: Event,
    pub on_stop: Event,
}

impl SessionEvents {
    pub fn new() -> Self {
        Self::default()
    }
}
