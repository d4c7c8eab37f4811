//! Notification of persisted events to external consumers.
//!
//! Stores call [`EventDispatcher::dispatch`] once per event, in version
//! order, and only after the event is durable. Read models therefore never
//! observe an event that later fails to persist.

use std::fmt;
use std::sync::Arc;

use crate::event::DomainEvent;
use crate::stored::StoredEvent;

/// A consumer of persisted events, such as a projector or an audit log.
pub trait EventListener<E>: Send + Sync {
    /// Whether this listener wants the per-type signal for `event_type`.
    fn handles(&self, event_type: &str) -> bool {
        let _ = event_type;
        true
    }

    /// Generic signal sent for every persisted event.
    fn on_stored(&self, stored: &StoredEvent<E>) {
        let _ = stored;
    }

    /// Per-type signal for events this listener [`handles`](Self::handles).
    fn on_event(&self, event_type: &'static str, stored: &StoredEvent<E>, event: &E) {
        let _ = (event_type, stored, event);
    }
}

/// Fans persisted events out to registered listeners, synchronously.
pub struct EventDispatcher<E> {
    listeners: Vec<Arc<dyn EventListener<E>>>,
}

impl<E: DomainEvent> EventDispatcher<E> {
    /// A dispatcher without listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Registers `listener` for all subsequent dispatches.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn EventListener<E>>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Sends the generic signal to every listener, then the typed one.
    pub fn dispatch(&self, stored: &StoredEvent<E>) {
        let event_type = stored.event().event_type();
        tracing::debug!(
            aggregate_id = %stored.aggregate_id(),
            version = stored.version(),
            event_type,
            "dispatching stored event"
        );

        for listener in &self.listeners {
            listener.on_stored(stored);
        }
        for listener in self.listeners.iter().filter(|l| l.handles(event_type)) {
            listener.on_event(event_type, stored, stored.event());
        }
    }
}

impl<E: DomainEvent> Default for EventDispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventDispatcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::id::AggregateId;
    use crate::testing::SettingsEvent;

    #[derive(Default)]
    struct Journal {
        only: Option<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    impl EventListener<SettingsEvent> for Journal {
        fn handles(&self, event_type: &str) -> bool {
            self.only.is_none_or(|only| only == event_type)
        }

        fn on_stored(&self, stored: &StoredEvent<SettingsEvent>) {
            self.seen.lock().unwrap().push(format!("stored:{}", stored.version()));
        }

        fn on_event(&self, event_type: &'static str, stored: &StoredEvent<SettingsEvent>, _: &SettingsEvent) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{event_type}:{}", stored.version()));
        }
    }

    #[test]
    fn test_dispatch_sends_generic_then_typed_signal() {
        let journal = Arc::new(Journal::default());
        let dispatcher = EventDispatcher::<SettingsEvent>::new().with_listener(journal.clone());
        let stored = StoredEvent::new(AggregateId::new(), SettingsEvent::Set(json!({})), 1, Utc::now());

        dispatcher.dispatch(&stored);

        assert_eq!(
            *journal.seen.lock().unwrap(),
            vec!["stored:1".to_owned(), "SettingsSet:1".to_owned()]
        );
    }

    #[test]
    fn test_typed_signal_respects_handles() {
        let journal = Arc::new(Journal {
            only: Some("SettingsNoted"),
            ..Journal::default()
        });
        let dispatcher = EventDispatcher::<SettingsEvent>::new().with_listener(journal.clone());
        let id = AggregateId::new();

        dispatcher.dispatch(&StoredEvent::new(id, SettingsEvent::Set(json!({})), 1, Utc::now()));
        dispatcher.dispatch(&StoredEvent::new(id, SettingsEvent::Noted("n".into()), 2, Utc::now()));

        assert_eq!(
            *journal.seen.lock().unwrap(),
            vec![
                "stored:1".to_owned(),
                "stored:2".to_owned(),
                "SettingsNoted:2".to_owned()
            ]
        );
    }
}
