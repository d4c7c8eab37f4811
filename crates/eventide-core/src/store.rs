//! Event store contracts.

use async_trait::async_trait;

use crate::aggregate::{Aggregate, AggregateRoot};
use crate::error::StoreError;
use crate::id::AggregateId;
use crate::registry::EventTypeRegistry;
use crate::stored::{SerializedEvent, SnapshotStream, StoredEvent, decode_events};

/// Append and retrieve operations over one physical medium.
///
/// Concurrent writers are resolved by the medium's own uniqueness guarantee
/// on `(aggregate id, version)`; implementations hold no in-process locks
/// around that check.
#[async_trait]
pub trait EventStore<A: Aggregate>: Send + Sync {
    /// Loads every event of a stream in ascending version order, without
    /// snapshot entries. An unknown identity yields an empty list.
    async fn retrieve_all(&self, id: AggregateId) -> Result<Vec<StoredEvent<A::Event>>, StoreError>;

    /// Drains the aggregate's pending events and writes them.
    ///
    /// Listeners are notified once per event, in version order, after the
    /// write is durable. A lost race surfaces as
    /// [`StoreError::ConcurrentModification`] naming the first event that
    /// could not be written.
    async fn persist(&self, aggregate: &mut AggregateRoot<A>) -> Result<(), StoreError>;

    /// Replays the full stream into a new aggregate.
    ///
    /// Backends that can see snapshot slots override this with [`replay`] so
    /// the version lands on the stream head even after a trailing snapshot.
    async fn load(&self, id: AggregateId) -> Result<AggregateRoot<A>, StoreError> {
        let events = self.retrieve_all(id).await?;
        Ok(AggregateRoot::rebuilt(id, events)?)
    }
}

/// Snapshot support layered on an [`EventStore`].
#[async_trait]
pub trait SnapshotEventStore<A: Aggregate>: EventStore<A> {
    /// Loads the newest snapshot and the events recorded after it. Without a
    /// snapshot this is the whole stream.
    async fn retrieve_from_last_snapshot(
        &self,
        id: AggregateId,
    ) -> Result<SnapshotStream<A::Event>, StoreError>;

    /// Persists pending events, then a snapshot of the resulting state.
    async fn persist_snapshot(&self, aggregate: &mut AggregateRoot<A>) -> Result<(), StoreError>;

    /// Rebuilds an aggregate from its newest snapshot.
    async fn load_from_snapshot(&self, id: AggregateId) -> Result<AggregateRoot<A>, StoreError> {
        let stream = self.retrieve_from_last_snapshot(id).await?;
        let mut root = AggregateRoot::new(id);
        root.rebuild_from_snapshot(stream.snapshot, stream.events)?;
        Ok(root)
    }
}

/// Serializes the pending events without draining them.
///
/// Backends call this before [`AggregateRoot::flush_events`] so that an
/// unregistered type leaves the buffer intact.
///
/// # Errors
///
/// Fails on the first event the registry or the payload codec rejects.
pub fn serialize_pending<A: Aggregate>(
    aggregate: &AggregateRoot<A>,
    registry: &EventTypeRegistry<A::Event>,
) -> Result<Vec<SerializedEvent>, StoreError> {
    aggregate
        .pending_events()
        .iter()
        .map(|event| event.serialize(registry))
        .collect()
}

/// Rebuilds an aggregate from every raw entry of its stream.
///
/// Snapshot entries are skipped for state but still count as occupied slots,
/// so the returned version is the version of the last entry.
///
/// # Errors
///
/// Fails on gaps, foreign rows, undecodable events, or replay integrity errors.
pub fn replay<A: Aggregate>(
    id: AggregateId,
    rows: Vec<SerializedEvent>,
    registry: &EventTypeRegistry<A::Event>,
) -> Result<AggregateRoot<A>, StoreError> {
    let head = rows.last().map_or(0, |row| row.version);
    let events = decode_events(id, 1, rows, registry)?;
    let mut root = AggregateRoot::rebuilt(id, events)?;
    root.skip_to(head)?;
    Ok(root)
}
