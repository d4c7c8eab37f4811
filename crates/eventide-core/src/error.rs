//! Error taxonomy shared by the aggregate, the registry and every backend.

use std::fmt;

use thiserror::Error;

use crate::id::AggregateId;
use crate::stored::SerializedEvent;

/// Boxed driver error, kept unchanged so callers can downcast it.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure to parse an [`AggregateId`] from its serialized form.
#[derive(Debug, Error)]
pub enum IdError {
    /// The string is not a valid identifier.
    #[error("malformed aggregate id {input:?}: {source}")]
    Malformed {
        /// The rejected input.
        input: String,
        /// The underlying parse failure.
        #[source]
        source: uuid::Error,
    },
}

/// Lookup or construction failures of the event type registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No public name is registered for this in-process type.
    #[error("unknown event type: {0}")]
    UnknownType(String),

    /// No in-process type is registered for this public name.
    #[error("unknown event name: {0}")]
    UnknownName(String),

    /// Two registrations share a public name.
    #[error("event name {0:?} is registered more than once")]
    DuplicateName(String),

    /// Two registrations share an in-process type.
    #[error("event type {0:?} is registered more than once")]
    DuplicateType(String),

    /// The public name is reserved for snapshots.
    #[error("event name {0:?} is reserved")]
    ReservedName(String),

    /// The event's payload could not be serialized.
    #[error("cannot encode {type_key} payload: {source}")]
    Encode {
        /// In-process type of the event being encoded.
        type_key: &'static str,
        /// The underlying serialization failure.
        #[source]
        source: serde_json::Error,
    },

    /// The payload does not match the shape of the registered type.
    #[error("cannot decode {name:?} payload: {source}")]
    Decode {
        /// Public name of the event being decoded.
        name: String,
        /// The underlying deserialization failure.
        #[source]
        source: serde_json::Error,
    },
}

/// Misuse of an aggregate or an inconsistent stream handed to it.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// The operation is not allowed in the aggregate's current state.
    #[error("invalid aggregate state: {0}")]
    InvalidState(String),

    /// The aggregate does not implement full-state snapshots.
    #[error("snapshots are not implemented by aggregate {0}")]
    Unsupported(&'static str),

    /// The replayed stream is not strictly ascending or belongs to another aggregate.
    #[error("stream integrity violation on aggregate {aggregate_id}: {reason}")]
    Integrity {
        /// The aggregate being rebuilt.
        aggregate_id: AggregateId,
        /// What was wrong with the stream.
        reason: String,
    },

    /// A snapshot payload could not be turned back into state.
    #[error("cannot restore snapshot: {0}")]
    Restore(#[source] serde_json::Error),

    /// The state could not be serialized into a snapshot payload.
    #[error("cannot build snapshot: {0}")]
    Build(#[source] serde_json::Error),
}

/// Which kind of write lost the race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// An ordinary domain event.
    Event,
    /// A snapshot entry.
    Snapshot,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event => f.write_str("event"),
            Self::Snapshot => f.write_str("snapshot"),
        }
    }
}

/// Another writer already stored an entry at the same `(aggregate id, version)`.
///
/// Recoverable by the caller: reload the aggregate, re-run the business
/// logic and persist again.
#[derive(Debug, Error)]
#[error(
    "cannot store {kind} due to concurrent modification of aggregate {} at version {}",
    .event.aggregate_id,
    .event.version
)]
pub struct ConcurrentModification {
    kind: ConflictKind,
    event: SerializedEvent,
    #[source]
    source: BoxError,
}

impl ConcurrentModification {
    /// A conflict while saving an ordinary event.
    #[must_use]
    pub fn for_event(event: SerializedEvent, source: impl Into<BoxError>) -> Self {
        Self {
            kind: ConflictKind::Event,
            event,
            source: source.into(),
        }
    }

    /// A conflict while saving a snapshot.
    #[must_use]
    pub fn for_snapshot(event: SerializedEvent, source: impl Into<BoxError>) -> Self {
        Self {
            kind: ConflictKind::Snapshot,
            event,
            source: source.into(),
        }
    }

    /// Whether an event or a snapshot failed.
    #[must_use]
    pub fn kind(&self) -> ConflictKind {
        self.kind
    }

    /// The entry that could not be saved.
    #[must_use]
    pub fn stored_event(&self) -> &SerializedEvent {
        &self.event
    }

    /// The backend's own conflict signal.
    #[must_use]
    pub fn backend_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }
}

/// Top-level error returned by event store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The version being written already exists.
    #[error(transparent)]
    ConcurrentModification(#[from] ConcurrentModification),

    /// A type mapping is missing or stale.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The aggregate rejected the operation.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// The persisted stream is corrupt (gaps, duplicates, malformed rows).
    #[error("stream integrity violation on aggregate {aggregate_id}: {reason}")]
    Integrity {
        /// The affected stream.
        aggregate_id: AggregateId,
        /// What was wrong with it.
        reason: String,
    },

    /// Any other failure of the underlying store, propagated unchanged.
    #[error("backend error: {0}")]
    Backend(#[source] BoxError),
}

impl StoreError {
    /// Wraps a driver error.
    pub fn backend(error: impl Into<BoxError>) -> Self {
        Self::Backend(error.into())
    }
}
