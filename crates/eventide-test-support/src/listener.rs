//! Test listener that records every dispatch signal it receives.

use std::sync::Mutex;

use eventide_core::dispatch::EventListener;
use eventide_core::stored::StoredEvent;

/// Records the versions of generic and typed signals, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingListener {
    stored: Mutex<Vec<u64>>,
    typed: Mutex<Vec<(&'static str, u64)>>,
}

impl RecordingListener {
    /// Versions that received the generic signal.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn stored_versions(&self) -> Vec<u64> {
        self.stored.lock().unwrap().clone()
    }

    /// `(event type, version)` pairs that received the typed signal.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn typed_events(&self) -> Vec<(&'static str, u64)> {
        self.typed.lock().unwrap().clone()
    }
}

impl<E> EventListener<E> for RecordingListener {
    fn on_stored(&self, stored: &StoredEvent<E>) {
        self.stored.lock().unwrap().push(stored.version());
    }

    fn on_event(&self, event_type: &'static str, stored: &StoredEvent<E>, _event: &E) {
        self.typed.lock().unwrap().push((event_type, stored.version()));
    }
}
