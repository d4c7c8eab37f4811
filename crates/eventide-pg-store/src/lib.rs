//! Eventide PostgreSQL event store.
//!
//! Stores every stream in a single `stored_events` table whose unique index
//! on `(aggregate_id, version)` detects concurrent writers.

pub mod pg_event_store;
pub mod schema;
