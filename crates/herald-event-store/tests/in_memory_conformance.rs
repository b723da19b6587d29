//! Conformance tests for `InMemoryEventStore`.

use std::sync::Arc;

use herald_core::clock::SystemClock;
use herald_event_store::InMemoryEventStore;
use herald_test_support::conformance;

#[tokio::test]
async fn test_in_memory_store_passes_conformance_suite() {
    let store = InMemoryEventStore::new();

    conformance::run_all(&store).await;
}

#[tokio::test]
async fn test_bounded_store_with_room_passes_conformance_suite() {
    let store = InMemoryEventStore::bounded(10_000, Arc::new(SystemClock));

    conformance::run_all(&store).await;
}
