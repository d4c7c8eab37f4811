//! Integration tests for `PgEventStore`.

use std::sync::Arc;

use eventide_core::aggregate::AggregateRoot;
use eventide_core::dispatch::EventDispatcher;
use eventide_core::error::{ConflictKind, RegistryError, StoreError};
use eventide_core::id::AggregateId;
use eventide_core::store::{EventStore, SnapshotEventStore};
use eventide_core::stored::StoredEvent;
use eventide_pg_store::pg_event_store::{INSERT_CHUNK_SIZE, PgEventStore, VersionTaken};
use eventide_test_support::{
    Document, DocumentCreated, DocumentEvent, RecordingListener, Tagged, document_registry,
    fixed_clock, fixed_now,
};
use serde_json::{Value, json};
use sqlx::PgPool;
use sqlx::types::Json;

fn make_store(pool: PgPool) -> PgEventStore<DocumentEvent> {
    PgEventStore::new(pool, document_registry(), Arc::new(EventDispatcher::new()))
}

fn make_listening_store(pool: PgPool) -> (PgEventStore<DocumentEvent>, Arc<RecordingListener>) {
    let listener = Arc::new(RecordingListener::default());
    let dispatcher = EventDispatcher::<DocumentEvent>::new().with_listener(listener.clone());
    let store = PgEventStore::new(pool, document_registry(), Arc::new(dispatcher));
    (store, listener)
}

fn new_document() -> AggregateRoot<Document> {
    AggregateRoot::with_clock(AggregateId::new(), fixed_clock())
}

fn created(title: &str) -> DocumentEvent {
    DocumentEvent::Created(DocumentCreated {
        title: title.to_owned(),
    })
}

/// Writes a row behind the store's back, as another process would.
async fn insert_raw(pool: &PgPool, id: AggregateId, version: i64, event_type: &str, payload: Value) {
    sqlx::query(
        "INSERT INTO stored_events (aggregate_id, version, event_type, payload, created_at) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id.to_string())
    .bind(version)
    .bind(event_type)
    .bind(Json(payload))
    .bind(fixed_now())
    .execute(pool)
    .await
    .unwrap();
}

// --- retrieve_all ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_retrieve_all_returns_empty_vec_for_unknown_aggregate(pool: PgPool) {
    let store = make_store(pool);

    let events = EventStore::<Document>::retrieve_all(&store, AggregateId::new())
        .await
        .unwrap();

    assert!(events.is_empty());
}

// --- persist + retrieve ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_persist_and_reload_reproduces_state(pool: PgPool) {
    // Arrange
    let store = make_store(pool);
    let mut document = new_document();
    document
        .record(created("Draft"))
        .record(DocumentEvent::set(json!({"foo": "bar"})))
        .record(DocumentEvent::set(json!({"foo": "baz", "n": 2})));

    // Act
    store.persist(&mut document).await.unwrap();
    let loaded: AggregateRoot<Document> = store.load(document.id()).await.unwrap();

    // Assert
    assert_eq!(loaded.state(), document.state());
    assert_eq!(loaded.version(), 3);
    assert!(!document.has_pending_events());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_rows_carry_public_names_and_timestamps(pool: PgPool) {
    let store = make_store(pool);
    let mut document = new_document();
    document.record(created("Draft"));

    store.persist(&mut document).await.unwrap();

    let rows = store.retrieve_raw(document.id()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].event_type, "document.created");
    assert_eq!(rows[0].payload, json!({"title": "Draft"}));
    assert_eq!(rows[0].version, 1);
    assert_eq!(rows[0].persisted_at, fixed_now());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_persist_without_pending_events_is_noop(pool: PgPool) {
    let store = make_store(pool);
    let mut document = new_document();

    store.persist(&mut document).await.unwrap();

    assert!(store.retrieve_raw(document.id()).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_events_are_dispatched_after_persist_in_version_order(pool: PgPool) {
    // Arrange
    let (store, listener) = make_listening_store(pool);
    let mut document = new_document();
    document
        .record(created("Draft"))
        .record(DocumentEvent::Tagged(Tagged { tag: "x".into() }))
        .record(DocumentEvent::set(json!({})));

    // Act
    store.persist(&mut document).await.unwrap();

    // Assert
    assert_eq!(listener.stored_versions(), vec![1, 2, 3]);
    assert_eq!(
        listener.typed_events(),
        vec![("DocumentCreated", 1), ("DocumentTagged", 2), ("FieldsSet", 3)]
    );
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_batch_larger_than_one_statement_is_stored(pool: PgPool) {
    // Arrange
    let (store, listener) = make_listening_store(pool);
    let mut document = new_document();
    let count = INSERT_CHUNK_SIZE * 2 + 7;
    for i in 0..count {
        document.record(DocumentEvent::set(json!({ "i": i })));
    }

    // Act
    store.persist(&mut document).await.unwrap();

    // Assert
    let events = EventStore::<Document>::retrieve_all(&store, document.id())
        .await
        .unwrap();
    assert_eq!(events.len(), count);
    assert!(events.iter().zip(1..).all(|(e, v)| e.version() == v));
    assert_eq!(listener.stored_versions().len(), count);
}

// --- concurrency ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_racing_writers_second_gets_concurrent_modification(pool: PgPool) {
    // Arrange
    let store = make_store(pool);
    let mut document = new_document();
    document.record(created("Draft"));
    store.persist(&mut document).await.unwrap();

    let mut first: AggregateRoot<Document> = store.load(document.id()).await.unwrap();
    let mut second: AggregateRoot<Document> = store.load(document.id()).await.unwrap();
    first.record(DocumentEvent::set(json!({"by": "first"})));
    second.record(DocumentEvent::set(json!({"by": "second"})));

    // Act
    store.persist(&mut first).await.unwrap();
    let result = store.persist(&mut second).await;

    // Assert
    let Err(StoreError::ConcurrentModification(conflict)) = result else {
        panic!("expected ConcurrentModification, got {result:?}");
    };
    assert_eq!(conflict.kind(), ConflictKind::Event);
    assert_eq!(conflict.stored_event().version, 2);
    assert_eq!(
        conflict.stored_event().payload,
        json!({"fields": {"by": "second"}})
    );
    let cause = conflict.backend_error().downcast_ref::<VersionTaken>();
    assert!(matches!(cause, Some(VersionTaken { version: 2, .. })));

    let loaded: AggregateRoot<Document> = store.load(document.id()).await.unwrap();
    assert_eq!(loaded.state().fields["by"], json!("first"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_conflicting_batch_is_rolled_back_entirely(pool: PgPool) {
    // Arrange
    let (store, listener) = make_listening_store(pool.clone());
    let mut document = new_document();
    document.record(created("Draft"));
    store.persist(&mut document).await.unwrap();

    // Inside the second chunk, not on its first row.
    let conflict_at = INSERT_CHUNK_SIZE + 5;
    insert_raw(
        &pool,
        document.id(),
        i64::try_from(conflict_at).unwrap(),
        "document.tagged",
        json!({"tag": "elsewhere"}),
    )
    .await;
    for i in 0..200 {
        document.record(DocumentEvent::set(json!({ "i": i })));
    }

    // Act
    let result = store.persist(&mut document).await;

    // Assert
    let Err(StoreError::ConcurrentModification(conflict)) = result else {
        panic!("expected ConcurrentModification, got {result:?}");
    };
    assert_eq!(conflict.stored_event().version, u64::try_from(conflict_at).unwrap());

    let versions: Vec<u64> = store
        .retrieve_raw(document.id())
        .await
        .unwrap()
        .iter()
        .map(|row| row.version)
        .collect();
    assert_eq!(versions, vec![1, u64::try_from(conflict_at).unwrap()]);
    assert_eq!(listener.stored_versions(), vec![1]);
}

// --- snapshots ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_load_from_snapshot_matches_full_replay(pool: PgPool) {
    // Arrange
    let store = make_store(pool);
    let mut document = new_document();
    document.record(created("Draft"));
    for i in 0..9 {
        document.record(DocumentEvent::set(json!({ "i": i })));
    }
    store.persist_snapshot(&mut document).await.unwrap();
    document
        .record(DocumentEvent::set(json!({"i": "after"})))
        .record(DocumentEvent::set(json!({"i": "last"})));
    store.persist(&mut document).await.unwrap();

    // Act
    let stream = SnapshotEventStore::<Document>::retrieve_from_last_snapshot(&store, document.id())
        .await
        .unwrap();
    let from_snapshot: AggregateRoot<Document> =
        store.load_from_snapshot(document.id()).await.unwrap();
    let full: AggregateRoot<Document> = store.load(document.id()).await.unwrap();

    // Assert
    assert_eq!(stream.snapshot.as_ref().map(StoredEvent::version), Some(11));
    assert_eq!(stream.events.len(), 2);
    assert_eq!(from_snapshot.state(), full.state());
    assert_eq!(from_snapshot.version(), 13);
    assert_eq!(full.version(), 13);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_retrieve_from_last_snapshot_without_snapshot_is_whole_stream(pool: PgPool) {
    let store = make_store(pool);
    let mut document = new_document();
    document.record(created("Draft")).record(DocumentEvent::set(json!({})));
    store.persist(&mut document).await.unwrap();

    let stream = SnapshotEventStore::<Document>::retrieve_from_last_snapshot(&store, document.id())
        .await
        .unwrap();

    assert!(stream.snapshot.is_none());
    assert_eq!(stream.events.len(), 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_stale_snapshot_is_a_snapshot_conflict(pool: PgPool) {
    // Arrange
    let store = make_store(pool);
    let mut document = new_document();
    document.record(created("Draft"));
    store.persist(&mut document).await.unwrap();
    let mut stale: AggregateRoot<Document> = store.load(document.id()).await.unwrap();
    document.record(DocumentEvent::set(json!({"v": 2})));
    store.persist(&mut document).await.unwrap();

    // Act
    let result = store.persist_snapshot(&mut stale).await;

    // Assert
    let Err(StoreError::ConcurrentModification(conflict)) = result else {
        panic!("expected ConcurrentModification, got {result:?}");
    };
    assert_eq!(conflict.kind(), ConflictKind::Snapshot);
    assert!(conflict.stored_event().is_snapshot());
}

// --- integrity ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_unknown_event_name_stops_replay(pool: PgPool) {
    let store = make_store(pool.clone());
    let id = AggregateId::new();
    insert_raw(&pool, id, 1, "document.archived", json!({})).await;

    let result = EventStore::<Document>::retrieve_all(&store, id).await;

    assert!(matches!(
        result,
        Err(StoreError::Registry(RegistryError::UnknownName(name))) if name == "document.archived"
    ));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_gap_in_stream_is_an_integrity_error(pool: PgPool) {
    let store = make_store(pool.clone());
    let id = AggregateId::new();
    insert_raw(&pool, id, 1, "document.created", json!({"title": "a"})).await;
    insert_raw(&pool, id, 3, "document.tagged", json!({"tag": "b"})).await;

    let result = EventStore::<Document>::retrieve_all(&store, id).await;

    assert!(matches!(result, Err(StoreError::Integrity { .. })));
}
