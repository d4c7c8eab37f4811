//! `PostgreSQL` implementation of the `EventStore` and `SnapshotEventStore` traits.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use eventide_core::aggregate::{Aggregate, AggregateRoot};
use eventide_core::dispatch::EventDispatcher;
use eventide_core::error::{ConcurrentModification, ConflictKind, StoreError};
use eventide_core::event::{DomainEvent, SNAPSHOT_EVENT_TYPE};
use eventide_core::id::AggregateId;
use eventide_core::registry::EventTypeRegistry;
use eventide_core::store::{EventStore, SnapshotEventStore, replay, serialize_pending};
use eventide_core::stored::{SerializedEvent, SnapshotStream, StoredEvent, decode_events};

/// Maximum number of rows per `INSERT` statement.
pub const INSERT_CHUNK_SIZE: usize = 128;

/// PostgreSQL-backed event store.
///
/// A batch is written in one transaction, so it is either fully durable or
/// not written at all. Conflicts are detected by the unique index on
/// `(aggregate_id, version)`, never by reading first: rows whose key is taken
/// are skipped by `ON CONFLICT DO NOTHING`, and the first skipped row is the
/// one reported.
#[derive(Debug, Clone)]
pub struct PgEventStore<E> {
    pool: PgPool,
    registry: Arc<EventTypeRegistry<E>>,
    dispatcher: Arc<EventDispatcher<E>>,
}

impl<E: DomainEvent> PgEventStore<E> {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(
        pool: PgPool,
        registry: Arc<EventTypeRegistry<E>>,
        dispatcher: Arc<EventDispatcher<E>>,
    ) -> Self {
        Self {
            pool,
            registry,
            dispatcher,
        }
    }

    /// Loads the raw rows of a stream, snapshots included, without decoding
    /// the payloads.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` on query failure and
    /// `StoreError::Integrity` on malformed rows.
    pub async fn retrieve_raw(&self, id: AggregateId) -> Result<Vec<SerializedEvent>, StoreError> {
        self.fetch_stream(id, 1).await
    }

    async fn fetch_stream(
        &self,
        id: AggregateId,
        from_version: u64,
    ) -> Result<Vec<SerializedEvent>, StoreError> {
        fetch_stream(&self.pool, id, from_version).await
    }

    async fn latest_snapshot_version(&self, id: AggregateId) -> Result<Option<u64>, StoreError> {
        let version = sqlx::query_scalar::<_, i64>(
            r"
            SELECT version
            FROM stored_events
            WHERE aggregate_id = $1 AND event_type = $2
            ORDER BY version DESC
            LIMIT 1
            ",
        )
        .bind(id.to_string())
        .bind(SNAPSHOT_EVENT_TYPE)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        version.map(|v| from_db_version(id, v)).transpose()
    }
}

#[async_trait]
impl<A> EventStore<A> for PgEventStore<A::Event>
where
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
        if serialized.is_empty() {
            return Ok(());
        }
        let rows = serialized
            .into_iter()
            .map(InsertRow::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let events = aggregate.flush_events();

        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            let taken = insert_rows(&mut tx, chunk)
                .await
                .map_err(StoreError::backend)?;
            if let Some(row) = taken {
                tx.rollback().await.map_err(StoreError::backend)?;
                return Err(conflict(row, ConflictKind::Event));
            }
        }
        tx.commit().await.map_err(StoreError::backend)?;
        debug!(count = events.len(), "persisted events");

        for event in &events {
            self.dispatcher.dispatch(event);
        }
        Ok(())
    }
}

#[async_trait]
impl<A> SnapshotEventStore<A> for PgEventStore<A::Event>
where
    A: Aggregate,
{
    #[instrument(skip(self), fields(aggregate_id = %id))]
    async fn retrieve_from_last_snapshot(
        &self,
        id: AggregateId,
    ) -> Result<SnapshotStream<A::Event>, StoreError> {
        let Some(snapshot_version) = self.latest_snapshot_version(id).await? else {
            let rows = self.fetch_stream(id, 1).await?;
            return Ok(SnapshotStream {
                snapshot: None,
                events: decode_events(id, 1, rows, &self.registry)?,
            });
        };

        let rows = self.fetch_stream(id, snapshot_version).await?;
        SnapshotStream::decode(id, rows, &self.registry)
    }

    #[instrument(skip(self, aggregate), fields(aggregate_id = %aggregate.id()))]
    async fn persist_snapshot(&self, aggregate: &mut AggregateRoot<A>) -> Result<(), StoreError> {
        self.persist(aggregate).await?;

        let snapshot = aggregate.new_snapshot()?.serialize(&self.registry)?;
        let row = InsertRow::try_from(snapshot)?;
        let mut conn = self.pool.acquire().await.map_err(StoreError::backend)?;
        let taken = insert_rows(&mut conn, std::slice::from_ref(&row))
            .await
            .map_err(StoreError::backend)?;
        if let Some(row) = taken {
            return Err(conflict(row, ConflictKind::Snapshot));
        }
        debug!(version = row.entry.version, "persisted snapshot");
        Ok(())
    }
}

/// Loads the raw rows of a stream without a registry, for tooling that only
/// inspects the log.
///
/// # Errors
///
/// Same as [`PgEventStore::retrieve_raw`].
pub async fn read_stream(pool: &PgPool, id: AggregateId) -> Result<Vec<SerializedEvent>, StoreError> {
    fetch_stream(pool, id, 1).await
}

async fn fetch_stream(
    pool: &PgPool,
    id: AggregateId,
    from_version: u64,
) -> Result<Vec<SerializedEvent>, StoreError> {
    let rows = sqlx::query(
        r"
        SELECT aggregate_id, version, event_type, payload, created_at
        FROM stored_events
        WHERE aggregate_id = $1 AND version >= $2
        ORDER BY version ASC
        ",
    )
    .bind(id.to_string())
    .bind(to_db_version(id, from_version)?)
    .fetch_all(pool)
    .await
    .map_err(StoreError::backend)?;

    rows.iter().map(|row| decode_row(id, row)).collect()
}

/// A serialized entry with its version already converted to the column type.
struct InsertRow {
    entry: SerializedEvent,
    version: i64,
}

impl TryFrom<SerializedEvent> for InsertRow {
    type Error = StoreError;

    fn try_from(entry: SerializedEvent) -> Result<Self, Self::Error> {
        let version = to_db_version(entry.aggregate_id, entry.version)?;
        Ok(Self { entry, version })
    }
}

/// The `(aggregate_id, version)` key of a row was already taken when it was
/// inserted.
#[derive(Debug, Error)]
#[error("version {version} of aggregate {aggregate_id} is already stored")]
pub struct VersionTaken {
    /// Stream of the rejected row.
    pub aggregate_id: AggregateId,
    /// Version of the rejected row.
    pub version: u64,
}

/// Inserts `rows` and returns the first one whose key was already taken.
///
/// Taken keys are skipped rather than raised so the violating row can be
/// named; the caller must roll back when one is returned.
async fn insert_rows<'r>(
    conn: &mut PgConnection,
    rows: &'r [InsertRow],
) -> Result<Option<&'r InsertRow>, sqlx::Error> {
    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO stored_events (aggregate_id, version, event_type, payload, meta_data, created_at) ",
    );
    qb.push_values(rows, |mut b, row| {
        b.push_bind(row.entry.aggregate_id.to_string());
        b.push_bind(row.version);
        b.push_bind(row.entry.event_type.clone());
        b.push_bind(Json(row.entry.payload.clone()));
        b.push_bind(Json(Value::Object(serde_json::Map::new())));
        b.push_bind(row.entry.persisted_at);
    });
    qb.push(" ON CONFLICT (aggregate_id, version) DO NOTHING RETURNING version");

    let inserted: HashSet<i64> = qb
        .build_query_scalar::<i64>()
        .fetch_all(conn)
        .await?
        .into_iter()
        .collect();
    Ok(rows.iter().find(|row| !inserted.contains(&row.version)))
}

fn conflict(row: &InsertRow, kind: ConflictKind) -> StoreError {
    warn!(
        aggregate_id = %row.entry.aggregate_id,
        version = row.entry.version,
        %kind,
        "concurrent modification"
    );
    let entry = row.entry.clone();
    let cause = VersionTaken {
        aggregate_id: entry.aggregate_id,
        version: entry.version,
    };
    match kind {
        ConflictKind::Event => ConcurrentModification::for_event(entry, cause),
        ConflictKind::Snapshot => ConcurrentModification::for_snapshot(entry, cause),
    }
    .into()
}

fn decode_row(id: AggregateId, row: &PgRow) -> Result<SerializedEvent, StoreError> {
    let aggregate_id: String = row.try_get("aggregate_id").map_err(StoreError::backend)?;
    let version: i64 = row.try_get("version").map_err(StoreError::backend)?;
    let event_type: String = row.try_get("event_type").map_err(StoreError::backend)?;
    let payload: Json<Value> = row.try_get("payload").map_err(StoreError::backend)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(StoreError::backend)?;

    Ok(SerializedEvent {
        aggregate_id: aggregate_id.parse().map_err(|e| StoreError::Integrity {
            aggregate_id: id,
            reason: format!("malformed aggregate_id column: {e}"),
        })?,
        event_type,
        payload: payload.0,
        version: from_db_version(id, version)?,
        persisted_at: created_at,
    })
}

fn to_db_version(id: AggregateId, version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Integrity {
        aggregate_id: id,
        reason: format!("version {version} exceeds the column range"),
    })
}

fn from_db_version(id: AggregateId, version: i64) -> Result<u64, StoreError> {
    u64::try_from(version).map_err(|_| StoreError::Integrity {
        aggregate_id: id,
        reason: format!("negative version {version}"),
    })
}
