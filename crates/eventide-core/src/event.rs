//! Domain event abstractions.

use std::fmt;

use serde_json::Value;

/// Public name reserved for snapshot entries in every stream.
pub const SNAPSHOT_EVENT_TYPE: &str = "snapshot";

/// A fact that happened to an aggregate.
///
/// Events are immutable once created and have no identity of their own;
/// their position in a stream gives them one. The matching decoder is
/// registered in an [`EventTypeRegistry`](crate::registry::EventTypeRegistry).
pub trait DomainEvent: Clone + fmt::Debug + Send + Sync + 'static {
    /// Stable in-process discriminant of this event's concrete kind.
    ///
    /// This is what the registry maps to a public, storage-stable name.
    fn event_type(&self) -> &'static str;

    /// Converts the event into its structured payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented as JSON.
    fn serialize(&self) -> Result<Value, serde_json::Error>;
}

/// Full aggregate state at a given version.
///
/// Stored in the same stream as ordinary events under
/// [`SNAPSHOT_EVENT_TYPE`], so retrieval can tell it apart and filter it.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    payload: Value,
}

impl Snapshot {
    /// In-process discriminant of snapshot entries.
    pub const TYPE_KEY: &'static str = "Snapshot";

    /// Wraps an opaque state payload.
    #[must_use]
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// The payload exactly as the aggregate produced it.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Consumes the snapshot, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Value {
        self.payload
    }
}

impl DomainEvent for Snapshot {
    fn event_type(&self) -> &'static str {
        Self::TYPE_KEY
    }

    fn serialize(&self) -> Result<Value, serde_json::Error> {
        Ok(self.payload.clone())
    }
}
