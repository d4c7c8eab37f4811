//! A small aggregate used by the backend test suites.

use std::sync::Arc;

use eventide_core::aggregate::Aggregate;
use eventide_core::error::AggregateError;
use eventide_core::event::DomainEvent;
use eventide_core::id::AggregateId;
use eventide_core::registry::EventTypeRegistry;
use eventide_core::stored::StoredEvent;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::clock::fixed_now;

/// Emitted once when a document is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentCreated {
    /// Initial title.
    pub title: String,
}

/// Replaces all fields of the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldsSet {
    /// The new field values.
    pub fields: Map<String, Value>,
}

/// A label the document aggregate does not react to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tagged {
    /// The label.
    pub tag: String,
}

/// Events of the [`Document`] aggregate.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentEvent {
    /// The document was created.
    Created(DocumentCreated),
    /// The fields were replaced.
    Set(FieldsSet),
    /// The document was tagged.
    Tagged(Tagged),
}

impl DocumentEvent {
    /// Shorthand for a [`FieldsSet`] event from a JSON object.
    ///
    /// Non-object values set no fields.
    #[must_use]
    pub fn set(fields: Value) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::Set(FieldsSet { fields })
    }
}

impl DomainEvent for DocumentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Created(_) => "DocumentCreated",
            Self::Set(_) => "FieldsSet",
            Self::Tagged(_) => "DocumentTagged",
        }
    }

    fn serialize(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Created(payload) => serde_json::to_value(payload),
            Self::Set(payload) => serde_json::to_value(payload),
            Self::Tagged(payload) => serde_json::to_value(payload),
        }
    }
}

/// Document state: a title and a flat set of fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Title given at creation.
    pub title: Option<String>,
    /// Most recently set fields.
    pub fields: Map<String, Value>,
}

impl Aggregate for Document {
    type Event = DocumentEvent;

    fn apply(&mut self, event: &DocumentEvent) {
        match event {
            DocumentEvent::Created(payload) => self.title = Some(payload.title.clone()),
            DocumentEvent::Set(payload) => self.fields.clone_from(&payload.fields),
            DocumentEvent::Tagged(_) => {}
        }
    }

    fn snapshot(&self) -> Result<Value, AggregateError> {
        serde_json::to_value(self).map_err(AggregateError::Build)
    }

    fn restore(&mut self, payload: Value) -> Result<(), AggregateError> {
        *self = serde_json::from_value(payload).map_err(AggregateError::Restore)?;
        Ok(())
    }
}

/// Registry with the public names the test suites persist under.
///
/// # Panics
///
/// Never; the names are distinct constants.
#[must_use]
pub fn document_registry() -> Arc<EventTypeRegistry<DocumentEvent>> {
    let registry = EventTypeRegistry::builder()
        .register("document.created", "DocumentCreated", |v| {
            serde_json::from_value(v).map(DocumentEvent::Created)
        })
        .register("document.fields_set", "FieldsSet", |v| {
            serde_json::from_value(v).map(DocumentEvent::Set)
        })
        .register("document.tagged", "DocumentTagged", |v| {
            serde_json::from_value(v).map(DocumentEvent::Tagged)
        })
        .build()
        .expect("document registry names are distinct");
    Arc::new(registry)
}

/// Wraps `events` as a stream history starting at version 1.
#[must_use]
pub fn given<E>(id: AggregateId, events: impl IntoIterator<Item = E>) -> Vec<StoredEvent<E>> {
    events
        .into_iter()
        .zip(1..)
        .map(|(event, version)| StoredEvent::new(id, event, version, fixed_now()))
        .collect()
}
