//! Key-value event store for Eventide.
//!
//! Each event is one item keyed by `(EventStream, Version)` and written with
//! its own conditional put. The service itself sits behind the
//! [`table::ItemTable`] trait; [`memory::InMemoryTable`] is the in-process
//! implementation and, with the `dynamodb` feature, `dynamodb::DynamoDbTable`
//! talks to Amazon DynamoDB.

pub mod attribute;
#[cfg(feature = "dynamodb")]
pub mod dynamodb;
pub mod kv_event_store;
pub mod memory;
pub mod table;
