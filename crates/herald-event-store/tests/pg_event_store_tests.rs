//! Integration tests for `PgEventStore`.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use herald_core::clock::SystemClock;
use herald_core::event::{DomainEvent, EventData, ProcessingStatus};
use herald_core::store::EventStore;
use herald_event_store::PgEventStore;
use herald_test_support::conformance;
use sqlx::PgPool;

/// Get a store over a test database, or skip if no test DB is available.
async fn test_store() -> Option<PgEventStore> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    let store = PgEventStore::new(pool);
    store.ensure_schema().await.ok()?;
    Some(store)
}

#[tokio::test]
async fn test_pg_store_passes_conformance_suite() {
    let Some(store) = test_store().await else {
        return;
    };

    conformance::run_all(&store).await;
}

#[tokio::test]
async fn test_ensure_schema_is_repeatable() {
    let Some(store) = test_store().await else {
        return;
    };

    assert!(store.ensure_schema().await.is_ok());
}

#[tokio::test]
async fn test_set_status_persists_across_reads() {
    // Arrange
    let Some(store) = test_store().await else {
        return;
    };
    let event = DomainEvent::new(
        format!("agg-{}", uuid::Uuid::new_v4()),
        "StatusProbe",
        EventData::new(),
        &SystemClock,
    );
    let ack = store.append(event).await.unwrap();

    // Act
    store
        .set_status(ack.event_id, ProcessingStatus::Dispatched)
        .await
        .unwrap();

    // Assert
    let loaded = store.get(ack.event_id).await.unwrap().unwrap();
    assert_eq!(loaded.processing_status(), ProcessingStatus::Dispatched);
    assert_eq!(loaded.position(), Some(ack.position));
}

#[tokio::test]
async fn test_closed_store_reports_unhealthy() {
    let Some(store) = test_store().await else {
        return;
    };

    store.close().await;

    assert!(!store.health_check().await.is_healthy());
}
