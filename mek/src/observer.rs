//! Observer hub.
//!
//! Passive fan-out of [`ObservationEvent`]s. Observers return nothing the
//! guard consults, cannot block the gate sequence, and their panics are
//! caught and discarded at the emission site. Removing every observer
//! changes no execution outcome.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::types::ObservationEvent;

/// A passive event consumer.
pub trait Observer: Send + Sync {
    /// Receive an event. Must not affect control flow.
    fn on_event(&self, event: &ObservationEvent);
}

/// Thread-safe collection of observer callbacks.
///
/// The list is cloned out of its lock before iteration, so a slow observer
/// never holds registration up and registration never blocks emission.
#[derive(Default)]
pub struct ObserverHub {
    observers: Mutex<Vec<Arc<dyn Observer>>>,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn Observer>) {
        self.observers
            .lock()
            .expect("observer list lock poisoned")
            .push(observer);
    }

    /// Remove all observers. A supported mode; execution outcomes are
    /// unchanged by it.
    pub fn clear(&self) {
        self.observers
            .lock()
            .expect("observer list lock poisoned")
            .clear();
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .expect("observer list lock poisoned")
            .len()
    }

    /// Fan an event out to every observer, swallowing observer panics.
    pub fn emit(&self, event: &ObservationEvent) {
        let observers: Vec<Arc<dyn Observer>> = self
            .observers
            .lock()
            .expect("observer list lock poisoned")
            .clone();
        for observer in observers {
            let _ = catch_unwind(AssertUnwindSafe(|| observer.on_event(event)));
        }
    }
}

/// Built-in observer that forwards events to the `log` facade.
#[derive(Debug, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_event(&self, event: &ObservationEvent) {
        log::info!(
            target: "mek::observe",
            "event={} details={}",
            event.event_type.as_str(),
            serde_json::to_string(&event.details).unwrap_or_else(|_| "{}".to_string())
        );
    }
}

/// Buffering observer. Records every event it sees; used by the test suite
/// to assert emission without reaching into the guard.
#[derive(Default)]
pub struct BufferObserver {
    events: Mutex<Vec<ObservationEvent>>,
}

impl BufferObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservationEvent> {
        self.events.lock().expect("event buffer lock poisoned").clone()
    }
}

impl Observer for BufferObserver {
    fn on_event(&self, event: &ObservationEvent) {
        self.events
            .lock()
            .expect("event buffer lock poisoned")
            .push(event.clone());
    }
}
