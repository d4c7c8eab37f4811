//! Shared test fixtures for the Eventide event stores.

mod clock;
mod document;
mod listener;

pub use clock::{FixedClock, fixed_clock, fixed_now};
pub use document::{Document, DocumentCreated, DocumentEvent, FieldsSet, Tagged, document_registry, given};
pub use listener::RecordingListener;
