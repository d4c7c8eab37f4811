//! Persisted envelopes and stream decoding shared by every backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::event::{DomainEvent, Snapshot};
use crate::id::AggregateId;
use crate::registry::EventTypeRegistry;

/// An event together with its position in an aggregate's stream.
///
/// Versions are unique per aggregate, gap-free, and start at 1. The envelope
/// is never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent<E> {
    aggregate_id: AggregateId,
    event: E,
    version: u64,
    persisted_at: DateTime<Utc>,
}

impl<E> StoredEvent<E> {
    /// Wraps `event` at `version` of the stream of `aggregate_id`.
    #[must_use]
    pub fn new(aggregate_id: AggregateId, event: E, version: u64, persisted_at: DateTime<Utc>) -> Self {
        Self {
            aggregate_id,
            event,
            version,
            persisted_at,
        }
    }

    /// The stream this event belongs to.
    #[must_use]
    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    /// The wrapped event.
    #[must_use]
    pub fn event(&self) -> &E {
        &self.event
    }

    /// Position within the stream.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// When the event was recorded.
    #[must_use]
    pub fn persisted_at(&self) -> DateTime<Utc> {
        self.persisted_at
    }

    /// Consumes the envelope, returning the event.
    #[must_use]
    pub fn into_event(self) -> E {
        self.event
    }
}

impl<E: DomainEvent> StoredEvent<E> {
    /// Converts the envelope to its storage form.
    ///
    /// # Errors
    ///
    /// Fails if the event type is not registered or its payload cannot be
    /// serialized.
    pub fn serialize<R: DomainEvent>(
        &self,
        registry: &EventTypeRegistry<R>,
    ) -> Result<SerializedEvent, StoreError> {
        let (name, payload) = registry.serialize(&self.event)?;
        Ok(SerializedEvent {
            aggregate_id: self.aggregate_id,
            event_type: name.to_owned(),
            payload,
            version: self.version,
            persisted_at: self.persisted_at,
        })
    }
}

/// Storage form of a stream entry: the public type name and a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// The stream this entry belongs to.
    pub aggregate_id: AggregateId,
    /// Public, storage-stable type name.
    pub event_type: String,
    /// Structured payload.
    pub payload: Value,
    /// Position within the stream.
    pub version: u64,
    /// When the entry was recorded.
    pub persisted_at: DateTime<Utc>,
}

impl SerializedEvent {
    /// Whether this entry holds a snapshot.
    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        self.event_type == crate::event::SNAPSHOT_EVENT_TYPE
    }

    /// Rebuilds the domain event through the registry.
    ///
    /// # Errors
    ///
    /// Fails with a registry error for unknown names or mismatched payloads.
    pub fn decode<E: DomainEvent>(
        self,
        registry: &EventTypeRegistry<E>,
    ) -> Result<StoredEvent<E>, StoreError> {
        let event = registry.deserialize(&self.event_type, self.payload)?;
        Ok(StoredEvent::new(
            self.aggregate_id,
            event,
            self.version,
            self.persisted_at,
        ))
    }

    /// Rebuilds a snapshot entry.
    ///
    /// # Errors
    ///
    /// Fails with `StoreError::Integrity` if the entry is not a snapshot.
    pub fn decode_snapshot(self) -> Result<StoredEvent<Snapshot>, StoreError> {
        if !self.is_snapshot() {
            return Err(StoreError::Integrity {
                aggregate_id: self.aggregate_id,
                reason: format!(
                    "expected a snapshot at version {}, found {:?}",
                    self.version, self.event_type
                ),
            });
        }
        Ok(StoredEvent::new(
            self.aggregate_id,
            Snapshot::new(self.payload),
            self.version,
            self.persisted_at,
        ))
    }
}

/// The newest snapshot of a stream and every event recorded after it.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotStream<E> {
    /// The most recent snapshot, if one was ever taken.
    pub snapshot: Option<StoredEvent<Snapshot>>,
    /// Events after the snapshot (or the whole history), ascending.
    pub events: Vec<StoredEvent<E>>,
}

impl<E: DomainEvent> SnapshotStream<E> {
    /// Decodes rows that start at a snapshot entry.
    ///
    /// An empty `rows` yields an empty stream without a snapshot.
    ///
    /// # Errors
    ///
    /// Fails if the first row is not a snapshot, the rows are not contiguous,
    /// or an event cannot be decoded.
    pub fn decode(
        aggregate_id: AggregateId,
        rows: Vec<SerializedEvent>,
        registry: &EventTypeRegistry<E>,
    ) -> Result<Self, StoreError> {
        let mut rows = rows.into_iter();
        let Some(first) = rows.next() else {
            return Ok(Self {
                snapshot: None,
                events: Vec::new(),
            });
        };
        let snapshot = first.decode_snapshot()?;
        let events = decode_events(aggregate_id, snapshot.version() + 1, rows, registry)?;
        Ok(Self {
            snapshot: Some(snapshot),
            events,
        })
    }
}

/// Checks that `versions` runs without gaps or repeats from `first`.
///
/// # Errors
///
/// Returns `StoreError::Integrity` naming the first unexpected version.
pub fn ensure_contiguous(
    aggregate_id: AggregateId,
    first: u64,
    versions: impl IntoIterator<Item = u64>,
) -> Result<(), StoreError> {
    let mut expected = first;
    for version in versions {
        if version != expected {
            return Err(StoreError::Integrity {
                aggregate_id,
                reason: format!("expected version {expected}, found {version}"),
            });
        }
        expected += 1;
    }
    Ok(())
}

/// Decodes a slice of a stream starting at version `first`.
///
/// Snapshot entries occupy a version slot, so they take part in the gap
/// check before being filtered out.
///
/// # Errors
///
/// Fails on gaps, foreign rows, or events the registry cannot decode.
pub fn decode_events<E: DomainEvent>(
    aggregate_id: AggregateId,
    first: u64,
    rows: impl IntoIterator<Item = SerializedEvent>,
    registry: &EventTypeRegistry<E>,
) -> Result<Vec<StoredEvent<E>>, StoreError> {
    let rows: Vec<SerializedEvent> = rows.into_iter().collect();
    ensure_contiguous(aggregate_id, first, rows.iter().map(|row| row.version))?;

    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        if row.aggregate_id != aggregate_id {
            return Err(StoreError::Integrity {
                aggregate_id,
                reason: format!("row at version {} belongs to {}", row.version, row.aggregate_id),
            });
        }
        if row.is_snapshot() {
            continue;
        }
        events.push(row.decode(registry)?);
    }
    Ok(events)
}
