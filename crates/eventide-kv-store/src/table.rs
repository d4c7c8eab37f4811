//! The narrow interface the store needs from a key-value service.

use async_trait::async_trait;
use eventide_core::error::BoxError;
use thiserror::Error;

use crate::attribute::Item;

/// Partition key: the aggregate id as a string.
pub const FIELD_EVENT_STREAM: &str = "EventStream";
/// Sort key: the version, as a number.
pub const FIELD_VERSION: &str = "Version";
/// Public event name.
pub const FIELD_EVENT_TYPE: &str = "EventType";
/// Structured payload.
pub const FIELD_PAYLOAD: &str = "Payload";
/// RFC 3339 timestamp of the write.
pub const FIELD_CREATED_AT: &str = "CreatedAt";

/// Secondary index keyed by `EventType` and `Version`.
pub const INDEX_BY_TYPE: &str = "ByType";

/// Errors reported by an [`ItemTable`].
#[derive(Debug, Error)]
pub enum TableError {
    /// An item already exists at the key of a conditional put.
    #[error("conditional check failed: item already exists")]
    ConditionalCheckFailed,

    /// The item lacks one of the primary key attributes.
    #[error("item is missing key attribute {0}")]
    MissingKey(&'static str),

    /// The service returned an attribute type items never hold.
    #[error("unsupported attribute type: {0}")]
    UnsupportedAttribute(String),

    /// Any other failure of the underlying service.
    #[error("table service error: {0}")]
    Service(#[source] BoxError),
}

/// A table of items with a composite `(EventStream, Version)` primary key.
#[async_trait]
pub trait ItemTable: Send + Sync {
    /// Writes `item` unless an item with the same key exists
    /// (`attribute_not_exists(Version)`).
    async fn put_item_if_absent(&self, item: Item) -> Result<(), TableError>;

    /// Strongly consistent query of one stream from `from_version` on,
    /// ascending by version.
    async fn query_stream(&self, stream: &str, from_version: u64) -> Result<Vec<Item>, TableError>;

    /// Queries [`INDEX_BY_TYPE`] descending and returns the first item of
    /// `event_type` that belongs to `stream`.
    async fn query_latest_by_type(
        &self,
        event_type: &str,
        stream: &str,
    ) -> Result<Option<Item>, TableError>;
}
