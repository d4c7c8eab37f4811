//! Aggregate replay and recording.
//!
//! An [`Aggregate`] is the domain state plus its event handlers. The
//! [`AggregateRoot`] wraps it with the machinery every aggregate shares:
//! the identity, the version counter, and the buffer of recorded events that
//! have not been persisted yet.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::error::AggregateError;
use crate::event::{DomainEvent, Snapshot};
use crate::id::AggregateId;
use crate::stored::StoredEvent;

/// Domain state that is reconstituted from its event history.
pub trait Aggregate: Default + Send + Sync + 'static {
    /// The events this aggregate records and replays.
    type Event: DomainEvent;

    /// Mutates state according to `event`.
    ///
    /// Kinds without a handler must be ignored so that streams containing
    /// newer event kinds still replay.
    fn apply(&mut self, event: &Self::Event);

    /// Serializes the full state for a snapshot.
    ///
    /// # Errors
    ///
    /// The default returns `AggregateError::Unsupported`.
    fn snapshot(&self) -> Result<Value, AggregateError> {
        Err(AggregateError::Unsupported(std::any::type_name::<Self>()))
    }

    /// Replaces the full state with a snapshot payload.
    ///
    /// # Errors
    ///
    /// The default returns `AggregateError::Unsupported`.
    fn restore(&mut self, payload: Value) -> Result<(), AggregateError> {
        let _ = payload;
        Err(AggregateError::Unsupported(std::any::type_name::<Self>()))
    }
}

/// Identity, version and pending events around an [`Aggregate`].
///
/// `version` is the highest stream slot this instance has consumed, either
/// by replay or by recording. Snapshots consume a slot of their own.
pub struct AggregateRoot<A: Aggregate> {
    id: AggregateId,
    version: u64,
    state: A,
    pending: Vec<StoredEvent<A::Event>>,
    clock: Arc<dyn Clock>,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Creates a fresh aggregate at version 0 with empty state.
    #[must_use]
    pub fn new(id: AggregateId) -> Self {
        Self::with_clock(id, Arc::new(SystemClock))
    }

    /// Creates a fresh aggregate that stamps events with `clock`.
    #[must_use]
    pub fn with_clock(id: AggregateId, clock: Arc<dyn Clock>) -> Self {
        Self {
            id,
            version: 0,
            state: A::default(),
            pending: Vec::new(),
            clock,
        }
    }

    /// Returns a pristine instance for the same identity, ready for replay.
    #[must_use]
    pub fn fresh(&self) -> Self {
        Self::with_clock(self.id, Arc::clone(&self.clock))
    }

    /// Creates an aggregate by replaying `events`.
    ///
    /// # Errors
    ///
    /// See [`AggregateRoot::rebuild`].
    pub fn rebuilt(
        id: AggregateId,
        events: impl IntoIterator<Item = StoredEvent<A::Event>>,
    ) -> Result<Self, AggregateError> {
        let mut root = Self::new(id);
        root.rebuild(events)?;
        Ok(root)
    }

    /// The aggregate identity.
    #[must_use]
    pub fn id(&self) -> AggregateId {
        self.id
    }

    /// Version of the last event folded into state.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The current domain state.
    #[must_use]
    pub fn state(&self) -> &A {
        &self.state
    }

    /// Events recorded but not yet flushed.
    #[must_use]
    pub fn pending_events(&self) -> &[StoredEvent<A::Event>] {
        &self.pending
    }

    /// Whether any recorded events await persistence.
    #[must_use]
    pub fn has_pending_events(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Applies `event`, bumps the version and buffers the event for persistence.
    pub fn record(&mut self, event: A::Event) -> &mut Self {
        self.state.apply(&event);
        self.version += 1;
        self.pending.push(StoredEvent::new(
            self.id,
            event,
            self.version,
            self.clock.now(),
        ));
        self
    }

    /// Folds a stream into state, taking each event's version as-is.
    ///
    /// # Errors
    ///
    /// Returns `AggregateError::InvalidState` if events are pending, and
    /// `AggregateError::Integrity` if an event belongs to another aggregate or
    /// its version does not exceed the current one. The instance must be
    /// discarded after an integrity failure.
    pub fn rebuild(
        &mut self,
        events: impl IntoIterator<Item = StoredEvent<A::Event>>,
    ) -> Result<&mut Self, AggregateError> {
        self.ensure_no_pending("rebuild")?;

        for stored in events {
            self.check_position(stored.aggregate_id(), stored.version())?;
            self.state.apply(stored.event());
            self.version = stored.version();
        }

        tracing::trace!(aggregate_id = %self.id, version = self.version, "aggregate rebuilt");
        Ok(self)
    }

    /// Restores state from `snapshot` (if any), then folds `events`.
    ///
    /// # Errors
    ///
    /// Fails like [`AggregateRoot::rebuild`], and with the aggregate's own
    /// error if the snapshot cannot be restored.
    pub fn rebuild_from_snapshot(
        &mut self,
        snapshot: Option<StoredEvent<Snapshot>>,
        events: impl IntoIterator<Item = StoredEvent<A::Event>>,
    ) -> Result<&mut Self, AggregateError> {
        self.ensure_no_pending("rebuild from snapshot")?;

        if let Some(snapshot) = snapshot {
            self.check_position(snapshot.aggregate_id(), snapshot.version())?;
            let version = snapshot.version();
            self.state.restore(snapshot.into_event().into_payload())?;
            self.version = version;
        }

        self.rebuild(events)
    }

    /// Advances the version over trailing slots that carry no event, such as
    /// a snapshot taken after the last replayed event.
    ///
    /// # Errors
    ///
    /// Returns `AggregateError::InvalidState` if events are pending and
    /// `AggregateError::Integrity` if `version` is behind the current one.
    pub fn skip_to(&mut self, version: u64) -> Result<&mut Self, AggregateError> {
        self.ensure_no_pending("advance")?;
        if version < self.version {
            return Err(AggregateError::Integrity {
                aggregate_id: self.id,
                reason: format!("cannot move back from version {} to {version}", self.version),
            });
        }
        self.version = version;
        Ok(self)
    }

    /// Moves the pending events out, leaving the buffer empty.
    ///
    /// The caller owns persisting them; nothing is re-queued on failure.
    pub fn flush_events(&mut self) -> Vec<StoredEvent<A::Event>> {
        std::mem::take(&mut self.pending)
    }

    /// Serializes the current state into a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `AggregateError::Unsupported` if the aggregate has no snapshot support.
    pub fn build_snapshot(&self) -> Result<Snapshot, AggregateError> {
        self.state.snapshot().map(Snapshot::new)
    }

    /// Takes a snapshot at the next version slot.
    ///
    /// The version is bumped so later events do not collide with the
    /// snapshot's slot in the stream.
    ///
    /// # Errors
    ///
    /// Returns `AggregateError::Unsupported` if the aggregate has no snapshot support.
    pub fn new_snapshot(&mut self) -> Result<StoredEvent<Snapshot>, AggregateError> {
        let snapshot = self.build_snapshot()?;
        self.version += 1;
        Ok(StoredEvent::new(
            self.id,
            snapshot,
            self.version,
            self.clock.now(),
        ))
    }

    fn ensure_no_pending(&self, operation: &str) -> Result<(), AggregateError> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(AggregateError::InvalidState(format!(
                "cannot {operation} aggregate {} with {} pending events",
                self.id,
                self.pending.len()
            )))
        }
    }

    fn check_position(&self, aggregate_id: AggregateId, version: u64) -> Result<(), AggregateError> {
        if aggregate_id != self.id {
            return Err(AggregateError::Integrity {
                aggregate_id: self.id,
                reason: format!("event at version {version} belongs to {aggregate_id}"),
            });
        }
        if version <= self.version {
            return Err(AggregateError::Integrity {
                aggregate_id: self.id,
                reason: format!("version {version} does not follow {}", self.version),
            });
        }
        Ok(())
    }
}

impl<A> fmt::Debug for AggregateRoot<A>
where
    A: Aggregate + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRoot")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}
