//! Conformance suite for `EventStore` backends.
//!
//! Every backend runs the same checks. Each check uses fresh aggregate ids
//! and event types so that it can run against a shared database, and only
//! asserts on deltas for store-wide counters.

use herald_core::clock::SystemClock;
use herald_core::error::EventError;
use herald_core::event::{DomainEvent, EventData, ProcessingStatus};
use herald_core::status::StatusCounts;
use herald_core::store::{EventFilter, EventStore, HandlerRecordStatus};
use uuid::Uuid;

use crate::event_data;

fn unique(prefix: &str) -> String {
    format!("{prefix}{}", Uuid::new_v4().simple())
}

fn new_event(aggregate_id: &str, event_type: &str, n: u32) -> DomainEvent {
    DomainEvent::new(
        aggregate_id,
        event_type,
        event_data(serde_json::json!({ "n": n })),
        &SystemClock,
    )
}

/// Runs every conformance check against `store`.
///
/// # Panics
///
/// Panics on the first violated expectation.
pub async fn run_all(store: &dyn EventStore) {
    append_then_read_by_aggregate_in_order(store).await;
    append_is_idempotent_by_event_id(store).await;
    recorded_at_not_before_occurred_at(store).await;
    aggregates_are_isolated(store).await;
    get_by_type_respects_limit_and_order(store).await;
    query_combines_filters(store).await;
    query_pages_with_position_cursor(store).await;
    unprocessed_excludes_dispatched(store).await;
    handler_outcomes_are_recorded_independently(store).await;
    marking_unknown_event_is_not_found(store).await;
    status_counts_track_transitions(store).await;
    complex_payload_round_trips(store).await;
    health_check_reports_healthy(store).await;
}

/// Events for one aggregate come back in insertion order, exactly once.
pub async fn append_then_read_by_aggregate_in_order(store: &dyn EventStore) {
    let aggregate = unique("agg-");
    let kind = unique("OrderPlaced");
    let mut ids = Vec::new();
    for n in 0..3 {
        let event = new_event(&aggregate, &kind, n);
        ids.push(event.event_id());
        let ack = store.append(event).await.unwrap();
        assert!(!ack.duplicate);
    }

    let loaded = store.get_by_aggregate(&aggregate).await.unwrap();
    let loaded_ids: Vec<Uuid> = loaded.iter().map(DomainEvent::event_id).collect();
    assert_eq!(loaded_ids, ids);
    assert!(loaded.iter().all(DomainEvent::is_recorded));
    assert!(
        loaded
            .windows(2)
            .all(|pair| pair[0].position() < pair[1].position())
    );
    assert!(
        loaded
            .iter()
            .all(|e| e.processing_status() == ProcessingStatus::Pending)
    );
}

/// A second append of the same `event_id` writes nothing.
pub async fn append_is_idempotent_by_event_id(store: &dyn EventStore) {
    let aggregate = unique("agg-");
    let event = new_event(&aggregate, &unique("Dup"), 1);

    let first = store.append(event.clone()).await.unwrap();
    let second = store.append(event.clone()).await.unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(first.position, second.position);
    assert_eq!(first.event_id, second.event_id);
    assert_eq!(store.get_by_aggregate(&aggregate).await.unwrap().len(), 1);
}

/// `recorded_at >= occurred_at` for every recorded event.
pub async fn recorded_at_not_before_occurred_at(store: &dyn EventStore) {
    let aggregate = unique("agg-");
    let event = new_event(&aggregate, &unique("Clocked"), 1);
    let occurred_at = event.occurred_at();

    let ack = store.append(event).await.unwrap();
    let loaded = store.get(ack.event_id).await.unwrap().unwrap();

    // Durable backends keep microsecond precision.
    assert!(ack.recorded_at.timestamp_micros() >= occurred_at.timestamp_micros());
    assert!(loaded.recorded_at().unwrap() >= loaded.occurred_at());
    assert_eq!(
        loaded.occurred_at().timestamp_micros(),
        occurred_at.timestamp_micros()
    );
}

/// Reading one aggregate never returns another's events.
pub async fn aggregates_are_isolated(store: &dyn EventStore) {
    let agg_a = unique("agg-a-");
    let agg_b = unique("agg-b-");
    let kind = unique("Isolated");
    store.append(new_event(&agg_a, &kind, 1)).await.unwrap();
    store.append(new_event(&agg_b, &kind, 1)).await.unwrap();

    let loaded_a = store.get_by_aggregate(&agg_a).await.unwrap();
    let loaded_b = store.get_by_aggregate(&agg_b).await.unwrap();

    assert_eq!(loaded_a.len(), 1);
    assert_eq!(loaded_b.len(), 1);
    assert_eq!(loaded_a[0].aggregate_id(), agg_a);
    assert_eq!(loaded_b[0].aggregate_id(), agg_b);
    assert!(store.get_by_aggregate(&unique("agg-none-")).await.unwrap().is_empty());
}

/// `get_by_type` returns the oldest `limit` events of that type.
pub async fn get_by_type_respects_limit_and_order(store: &dyn EventStore) {
    let aggregate = unique("agg-");
    let kind = unique("Typed");
    let mut ids = Vec::new();
    for n in 0..4 {
        let event = new_event(&aggregate, &kind, n);
        ids.push(event.event_id());
        store.append(event).await.unwrap();
    }
    store
        .append(new_event(&aggregate, &unique("Other"), 9))
        .await
        .unwrap();

    let loaded = store.get_by_type(&kind, 2).await.unwrap();

    let loaded_ids: Vec<Uuid> = loaded.iter().map(DomainEvent::event_id).collect();
    assert_eq!(loaded_ids, ids[..2].to_vec());
}

/// Type, aggregate and time criteria combine conjunctively.
pub async fn query_combines_filters(store: &dyn EventStore) {
    let agg_a = unique("agg-a-");
    let agg_b = unique("agg-b-");
    let kind = unique("Filtered");
    let first = store.append(new_event(&agg_a, &kind, 1)).await.unwrap();
    store.append(new_event(&agg_b, &kind, 2)).await.unwrap();
    store
        .append(new_event(&agg_a, &unique("Unrelated"), 3))
        .await
        .unwrap();

    let by_both = store
        .query(&EventFilter::new(10).event_type(&kind).aggregate_id(&agg_a))
        .await
        .unwrap();
    assert_eq!(by_both.len(), 1);
    assert_eq!(by_both[0].event_id(), first.event_id);

    let none_yet = store
        .query(&EventFilter::new(10).event_type(&kind).until(first.recorded_at))
        .await
        .unwrap();
    assert!(none_yet.is_empty());

    let from_first = store
        .query(&EventFilter::new(10).event_type(&kind).since(first.recorded_at))
        .await
        .unwrap();
    assert_eq!(from_first.len(), 2);
}

/// `after_position` resumes a scan without repeats.
pub async fn query_pages_with_position_cursor(store: &dyn EventStore) {
    let aggregate = unique("agg-");
    let kind = unique("Paged");
    for n in 0..5 {
        store.append(new_event(&aggregate, &kind, n)).await.unwrap();
    }

    let mut seen = Vec::new();
    let mut filter = EventFilter::new(2).event_type(&kind);
    loop {
        let page = store.query(&filter).await.unwrap();
        let Some(last) = page.last() else {
            break;
        };
        filter = filter.clone().after_position(last.position().unwrap());
        seen.extend(page.iter().map(DomainEvent::event_id));
    }

    let all: Vec<Uuid> = store
        .get_by_aggregate(&aggregate)
        .await
        .unwrap()
        .iter()
        .map(DomainEvent::event_id)
        .collect();
    assert_eq!(seen, all);
}

/// Dispatched events drop out of `get_unprocessed`; failed ones stay.
pub async fn unprocessed_excludes_dispatched(store: &dyn EventStore) {
    let aggregate = unique("agg-");
    let kind = unique("Unprocessed");
    let dispatched = store.append(new_event(&aggregate, &kind, 1)).await.unwrap();
    let failed = store.append(new_event(&aggregate, &kind, 2)).await.unwrap();
    let pending = store.append(new_event(&aggregate, &kind, 3)).await.unwrap();

    store
        .set_status(dispatched.event_id, ProcessingStatus::Dispatched)
        .await
        .unwrap();
    store
        .mark_failed(failed.event_id, "projector", "boom")
        .await
        .unwrap();

    let unprocessed: Vec<Uuid> = store
        .get_unprocessed(100_000)
        .await
        .unwrap()
        .iter()
        .map(DomainEvent::event_id)
        .collect();
    assert!(!unprocessed.contains(&dispatched.event_id));
    assert!(unprocessed.contains(&failed.event_id));
    assert!(unprocessed.contains(&pending.event_id));

    let reloaded = store.get(failed.event_id).await.unwrap().unwrap();
    assert_eq!(reloaded.processing_status(), ProcessingStatus::Failed);
}

/// One handler's failure does not overwrite another handler's success.
pub async fn handler_outcomes_are_recorded_independently(store: &dyn EventStore) {
    let aggregate = unique("agg-");
    let ack = store
        .append(new_event(&aggregate, &unique("Handled"), 1))
        .await
        .unwrap();

    store
        .mark_processed(ack.event_id, "welcome-email")
        .await
        .unwrap();
    store
        .mark_failed(ack.event_id, "analytics", "quota exceeded")
        .await
        .unwrap();

    let mut outcomes = store.handler_outcomes(ack.event_id).await.unwrap();
    outcomes.sort_by(|a, b| a.handler_id.cmp(&b.handler_id));
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].handler_id, "analytics");
    assert_eq!(outcomes[0].status, HandlerRecordStatus::Failed);
    assert_eq!(outcomes[0].reason.as_deref(), Some("quota exceeded"));
    assert_eq!(outcomes[1].handler_id, "welcome-email");
    assert_eq!(outcomes[1].status, HandlerRecordStatus::Processed);
    assert!(outcomes[1].processed_at.is_some());

    // A later success for the failed handler replaces its row.
    store.mark_processed(ack.event_id, "analytics").await.unwrap();
    let outcomes = store.handler_outcomes(ack.event_id).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(
        outcomes
            .iter()
            .all(|o| o.status == HandlerRecordStatus::Processed)
    );
}

/// Mark operations on an unknown id fail with `EventNotFound`.
pub async fn marking_unknown_event_is_not_found(store: &dyn EventStore) {
    let missing = Uuid::new_v4();

    let processed = store.mark_processed(missing, "h").await;
    let failed = store.mark_failed(missing, "h", "r").await;
    let status = store.set_status(missing, ProcessingStatus::Dispatched).await;

    assert_eq!(processed, Err(EventError::EventNotFound(missing)));
    assert_eq!(failed, Err(EventError::EventNotFound(missing)));
    assert_eq!(status, Err(EventError::EventNotFound(missing)));
    assert!(store.get(missing).await.unwrap().is_none());
}

/// Status counts move with appends and transitions.
pub async fn status_counts_track_transitions(store: &dyn EventStore) {
    let before: StatusCounts = store.status_counts().await.unwrap();
    let aggregate = unique("agg-");
    let kind = unique("Counted");
    let a = store.append(new_event(&aggregate, &kind, 1)).await.unwrap();
    let b = store.append(new_event(&aggregate, &kind, 2)).await.unwrap();
    store.append(new_event(&aggregate, &kind, 3)).await.unwrap();

    store
        .set_status(a.event_id, ProcessingStatus::Dispatched)
        .await
        .unwrap();
    store.mark_failed(b.event_id, "h", "r").await.unwrap();

    let after = store.status_counts().await.unwrap();
    assert_eq!(after.total(), before.total() + 3);
    assert!(after.dispatched > before.dispatched);
    assert!(after.failed > before.failed);
    assert!(after.pending > before.pending);
}

/// Nested payloads come back unchanged.
pub async fn complex_payload_round_trips(store: &dyn EventStore) {
    let data: EventData = event_data(serde_json::json!({
        "nested": {"key": "value", "number": 42},
        "array": [1, "two", null, true, false],
        "null_field": null,
        "empty_object": {},
        "empty_array": []
    }));
    let event = DomainEvent::new(unique("agg-"), unique("Complex"), data.clone(), &SystemClock)
        .with_schema_version(3);

    let ack = store.append(event).await.unwrap();
    let loaded = store.get(ack.event_id).await.unwrap().unwrap();

    assert_eq!(loaded.event_data(), &data);
    assert_eq!(loaded.schema_version(), 3);
}

/// A reachable store reports healthy.
pub async fn health_check_reports_healthy(store: &dyn EventStore) {
    assert!(store.health_check().await.is_healthy());
}
