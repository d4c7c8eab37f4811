//! In-process event store for tests and local development.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;

use crate::aggregate::{Aggregate, AggregateRoot};
use crate::dispatch::EventDispatcher;
use crate::error::{ConcurrentModification, StoreError};
use crate::event::DomainEvent;
use crate::id::AggregateId;
use crate::registry::EventTypeRegistry;
use crate::store::{EventStore, SnapshotEventStore, replay, serialize_pending};
use crate::stored::{SerializedEvent, SnapshotStream, StoredEvent, decode_events};

type Streams = HashMap<AggregateId, BTreeMap<u64, SerializedEvent>>;

/// The slot was already taken when the write was attempted.
#[derive(Debug, Error)]
#[error("version {version} of aggregate {aggregate_id} already exists")]
pub struct VersionTaken {
    aggregate_id: AggregateId,
    version: u64,
}

/// Keeps serialized streams in memory behind the same contract as the
/// durable backends.
///
/// Writes happen one event at a time and stop at the first taken slot,
/// like the key-value backend.
#[derive(Debug)]
pub struct InMemoryEventStore<E> {
    streams: Mutex<Streams>,
    registry: Arc<EventTypeRegistry<E>>,
    dispatcher: Arc<EventDispatcher<E>>,
}

impl<E: DomainEvent> InMemoryEventStore<E> {
    /// Creates an empty store.
    #[must_use]
    pub fn new(registry: Arc<EventTypeRegistry<E>>, dispatcher: Arc<EventDispatcher<E>>) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            registry,
            dispatcher,
        }
    }

    /// Returns the raw entries of a stream, snapshots included.
    ///
    /// # Errors
    ///
    /// Fails only if the internal lock is poisoned.
    pub fn entries(&self, id: AggregateId) -> Result<Vec<SerializedEvent>, StoreError> {
        Ok(self
            .lock()?
            .get(&id)
            .map(|stream| stream.values().cloned().collect())
            .unwrap_or_default())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Streams>, StoreError> {
        self.streams
            .lock()
            .map_err(|e| StoreError::backend(format!("in-memory store poisoned: {e}")))
    }

    fn insert(
        &self,
        entry: SerializedEvent,
        conflict: fn(SerializedEvent, VersionTaken) -> ConcurrentModification,
    ) -> Result<(), StoreError> {
        let mut streams = self.lock()?;
        let stream = streams.entry(entry.aggregate_id).or_default();
        if stream.contains_key(&entry.version) {
            tracing::warn!(
                aggregate_id = %entry.aggregate_id,
                version = entry.version,
                "concurrent modification"
            );
            let taken = VersionTaken {
                aggregate_id: entry.aggregate_id,
                version: entry.version,
            };
            return Err(conflict(entry, taken).into());
        }
        stream.insert(entry.version, entry);
        Ok(())
    }
}

#[async_trait]
impl<A> EventStore<A> for InMemoryEventStore<A::Event>
where
    A: Aggregate,
{
    async fn retrieve_all(&self, id: AggregateId) -> Result<Vec<StoredEvent<A::Event>>, StoreError> {
        let rows = self.entries(id)?;
        decode_events(id, 1, rows, &self.registry)
    }

    async fn load(&self, id: AggregateId) -> Result<AggregateRoot<A>, StoreError> {
        replay(id, self.entries(id)?, &self.registry)
    }

    async fn persist(&self, aggregate: &mut AggregateRoot<A>) -> Result<(), StoreError> {
        let serialized = serialize_pending(aggregate, &self.registry)?;
        let events = aggregate.flush_events();

        for (entry, event) in serialized.into_iter().zip(events) {
            self.insert(entry, |entry, taken| {
                ConcurrentModification::for_event(entry, taken)
            })?;
            self.dispatcher.dispatch(&event);
        }
        Ok(())
    }
}

#[async_trait]
impl<A> SnapshotEventStore<A> for InMemoryEventStore<A::Event>
where
    A: Aggregate,
{
    async fn retrieve_from_last_snapshot(
        &self,
        id: AggregateId,
    ) -> Result<SnapshotStream<A::Event>, StoreError> {
        let rows = self.entries(id)?;
        let Some(start) = rows.iter().rposition(SerializedEvent::is_snapshot) else {
            return Ok(SnapshotStream {
                snapshot: None,
                events: decode_events(id, 1, rows, &self.registry)?,
            });
        };
        SnapshotStream::decode(id, rows[start..].to_vec(), &self.registry)
    }

    async fn persist_snapshot(&self, aggregate: &mut AggregateRoot<A>) -> Result<(), StoreError> {
        self.persist(aggregate).await?;

        let snapshot = aggregate.new_snapshot()?.serialize(&self.registry)?;
        self.insert(snapshot, |entry, taken| {
            ConcurrentModification::for_snapshot(entry, taken)
        })
    }
}
