//! Key-value implementation of the `EventStore` and `SnapshotEventStore` traits.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, instrument, warn};

use eventide_core::aggregate::{Aggregate, AggregateRoot};
use eventide_core::dispatch::EventDispatcher;
use eventide_core::error::{ConcurrentModification, StoreError};
use eventide_core::event::{DomainEvent, SNAPSHOT_EVENT_TYPE};
use eventide_core::id::AggregateId;
use eventide_core::registry::EventTypeRegistry;
use eventide_core::store::{EventStore, SnapshotEventStore, replay, serialize_pending};
use eventide_core::stored::{SerializedEvent, SnapshotStream, StoredEvent, decode_events};

use crate::attribute::{AttributeValue, Item, marshal, unmarshal};
use crate::table::{
    FIELD_CREATED_AT, FIELD_EVENT_STREAM, FIELD_EVENT_TYPE, FIELD_PAYLOAD, FIELD_VERSION,
    ItemTable, TableError,
};

/// Event store over an [`ItemTable`].
///
/// The service offers no conditional batch write, so every event is its own
/// conditional put. A conflict on one event ends the call before the next
/// put: the events written before it stay durable and were dispatched, the
/// rest are never written.
#[derive(Debug)]
pub struct KvEventStore<T, E> {
    table: T,
    registry: Arc<EventTypeRegistry<E>>,
    dispatcher: Arc<EventDispatcher<E>>,
}

impl<T: ItemTable, E: DomainEvent> KvEventStore<T, E> {
    /// Creates a new `KvEventStore`.
    #[must_use]
    pub fn new(
        table: T,
        registry: Arc<EventTypeRegistry<E>>,
        dispatcher: Arc<EventDispatcher<E>>,
    ) -> Self {
        Self {
            table,
            registry,
            dispatcher,
        }
    }

    /// The underlying table.
    #[must_use]
    pub fn table(&self) -> &T {
        &self.table
    }

    /// Loads the raw entries of a stream, snapshots included.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` on table failure and
    /// `StoreError::Integrity` on malformed items.
    pub async fn retrieve_raw(&self, id: AggregateId) -> Result<Vec<SerializedEvent>, StoreError> {
        self.fetch_stream(id, 1).await
    }

    async fn fetch_stream(
        &self,
        id: AggregateId,
        from_version: u64,
    ) -> Result<Vec<SerializedEvent>, StoreError> {
        self.table
            .query_stream(&id.to_string(), from_version)
            .await
            .map_err(StoreError::backend)?
            .into_iter()
            .map(|item| decode_item(id, item))
            .collect()
    }

    async fn put(
        &self,
        entry: &SerializedEvent,
        conflict: fn(SerializedEvent, TableError) -> ConcurrentModification,
    ) -> Result<(), StoreError> {
        match self.table.put_item_if_absent(encode_item(entry)).await {
            Ok(()) => Ok(()),
            Err(TableError::ConditionalCheckFailed) => {
                warn!(
                    aggregate_id = %entry.aggregate_id,
                    version = entry.version,
                    "concurrent modification"
                );
                Err(conflict(entry.clone(), TableError::ConditionalCheckFailed).into())
            }
            Err(error) => Err(StoreError::backend(error)),
        }
    }
}

#[async_trait]
impl<T, A> EventStore<A> for KvEventStore<T, A::Event>
where
    T: ItemTable,
    A: Aggregate,
{
    #[instrument(skip(self), fields(aggregate_id = %id))]
    async fn retrieve_all(&self, id: AggregateId) -> Result<Vec<StoredEvent<A::Event>>, StoreError> {
        let rows = self.fetch_stream(id, 1).await?;
        decode_events(id, 1, rows, &self.registry)
    }

    #[instrument(skip(self), fields(aggregate_id = %id))]
    async fn load(&self, id: AggregateId) -> Result<AggregateRoot<A>, StoreError> {
        let rows = self.fetch_stream(id, 1).await?;
        replay(id, rows, &self.registry)
    }

    #[instrument(skip(self, aggregate), fields(aggregate_id = %aggregate.id()))]
    async fn persist(&self, aggregate: &mut AggregateRoot<A>) -> Result<(), StoreError> {
        let serialized = serialize_pending(aggregate, &self.registry)?;
        let events = aggregate.flush_events();

        for (entry, event) in serialized.iter().zip(&events) {
            self.put(entry, ConcurrentModification::for_event).await?;
            self.dispatcher.dispatch(event);
        }
        debug!(count = events.len(), "persisted events");
        Ok(())
    }
}

#[async_trait]
impl<T, A> SnapshotEventStore<A> for KvEventStore<T, A::Event>
where
    T: ItemTable,
    A: Aggregate,
{
    #[instrument(skip(self), fields(aggregate_id = %id))]
    async fn retrieve_from_last_snapshot(
        &self,
        id: AggregateId,
    ) -> Result<SnapshotStream<A::Event>, StoreError> {
        let latest = self
            .table
            .query_latest_by_type(SNAPSHOT_EVENT_TYPE, &id.to_string())
            .await
            .map_err(StoreError::backend)?;

        let Some(item) = latest else {
            let rows = self.fetch_stream(id, 1).await?;
            return Ok(SnapshotStream {
                snapshot: None,
                events: decode_events(id, 1, rows, &self.registry)?,
            });
        };

        let from = decode_item(id, item)?.version;
        let rows = self.fetch_stream(id, from).await?;
        SnapshotStream::decode(id, rows, &self.registry)
    }

    #[instrument(skip(self, aggregate), fields(aggregate_id = %aggregate.id()))]
    async fn persist_snapshot(&self, aggregate: &mut AggregateRoot<A>) -> Result<(), StoreError> {
        self.persist(aggregate).await?;

        let snapshot = aggregate.new_snapshot()?.serialize(&self.registry)?;
        self.put(&snapshot, ConcurrentModification::for_snapshot).await?;
        debug!(version = snapshot.version, "persisted snapshot");
        Ok(())
    }
}

/// Lays an entry out as a table item.
#[must_use]
pub fn encode_item(entry: &SerializedEvent) -> Item {
    Item::from([
        (
            FIELD_EVENT_STREAM.to_owned(),
            AttributeValue::S(entry.aggregate_id.to_string()),
        ),
        (FIELD_VERSION.to_owned(), AttributeValue::N(entry.version.to_string())),
        (FIELD_EVENT_TYPE.to_owned(), AttributeValue::S(entry.event_type.clone())),
        (FIELD_PAYLOAD.to_owned(), marshal(&entry.payload)),
        (
            FIELD_CREATED_AT.to_owned(),
            AttributeValue::S(entry.persisted_at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        ),
    ])
}

/// Reads an entry back from a table item of stream `id`.
///
/// # Errors
///
/// Returns `StoreError::Integrity` if an attribute is missing or malformed.
pub fn decode_item(id: AggregateId, mut item: Item) -> Result<SerializedEvent, StoreError> {
    let malformed = |field: &str, detail: String| StoreError::Integrity {
        aggregate_id: id,
        reason: format!("attribute {field}: {detail}"),
    };
    let mut take = |field: &'static str| {
        item.remove(field)
            .ok_or_else(|| malformed(field, "missing".to_owned()))
    };

    let stream = take(FIELD_EVENT_STREAM)?;
    let version = take(FIELD_VERSION)?;
    let event_type = take(FIELD_EVENT_TYPE)?;
    let payload = take(FIELD_PAYLOAD)?;
    let created_at = take(FIELD_CREATED_AT)?;

    let aggregate_id = stream
        .as_s()
        .ok_or_else(|| malformed(FIELD_EVENT_STREAM, "not a string".to_owned()))?
        .parse()
        .map_err(|e| malformed(FIELD_EVENT_STREAM, format!("{e}")))?;
    let version = version
        .as_n()
        .and_then(|n| n.parse::<u64>().ok())
        .ok_or_else(|| malformed(FIELD_VERSION, format!("{version:?}")))?;
    let AttributeValue::S(event_type) = event_type else {
        return Err(malformed(FIELD_EVENT_TYPE, "not a string".to_owned()));
    };
    let persisted_at = created_at
        .as_s()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| malformed(FIELD_CREATED_AT, format!("{created_at:?}")))?;
    let payload = unmarshal(payload).map_err(|e| malformed(FIELD_PAYLOAD, e.to_string()))?;

    Ok(SerializedEvent {
        aggregate_id,
        event_type,
        payload,
        version,
        persisted_at,
    })
}
