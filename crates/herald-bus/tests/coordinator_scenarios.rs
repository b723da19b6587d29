//! End-to-end scenarios through the coordinator with in-memory backends.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use herald_bus::{
    CoordinatorConfig, EventDrivenCoordinator, ReplayRequest, RetryPolicy, StaticBackends,
    TypeFilterMiddleware,
};
use herald_core::clock::SystemClock;
use herald_core::error::EventError;
use herald_core::event::{DomainEvent, EventData, ProcessingStatus};
use herald_core::handler::DispatchMode;
use herald_core::publisher::TransportEnvelope;
use herald_core::status::{CoordinatorState, Health};
use herald_core::store::{EventFilter, EventStore};
use herald_event_store::InMemoryEventStore;
use herald_test_support::{
    FailingEventStore, FailingHandler, FixedClock, OutageEventStore, RecordingHandler,
    RecordingPublisher, SlowHandler, SteppingClock, event_data,
};
use serde_json::json;

const NODE: &str = "node-a";

fn fast_retry() -> RetryPolicy {
    RetryPolicy::attempts(2).with_backoff(Duration::from_millis(1), Duration::from_millis(5))
}

fn config() -> CoordinatorConfig {
    CoordinatorConfig {
        node_id: NODE.into(),
        handler_timeout: Duration::from_secs(2),
        handler_retry: fast_retry(),
        transport_retry: fast_retry(),
        store_retry: fast_retry(),
        drain_timeout: Duration::from_secs(2),
        ..CoordinatorConfig::default()
    }
}

async fn running(
    config: CoordinatorConfig,
    store: Arc<dyn EventStore>,
    publisher: Arc<RecordingPublisher>,
) -> EventDrivenCoordinator {
    let coordinator =
        EventDrivenCoordinator::new(config, Arc::new(StaticBackends::new(store, publisher)));
    coordinator.start().await.unwrap();
    coordinator
}

fn user_registered(user: &str) -> DomainEvent {
    DomainEvent::new(
        user,
        "UserRegistered",
        event_data(json!({ "email": format!("{user}@example.com") })),
        &SystemClock,
    )
}

#[tokio::test]
async fn test_published_event_appears_once_in_history() {
    // Arrange
    let coordinator = running(
        config(),
        Arc::new(InMemoryEventStore::new()),
        Arc::new(RecordingPublisher::new(NODE)),
    )
    .await;
    let event = user_registered("U1");
    let event_id = event.event_id();

    // Act
    let report = coordinator.publish(event).await.unwrap();
    let history = coordinator
        .get_history(&EventFilter::new(100).aggregate_id("U1"))
        .await
        .unwrap();

    // Assert
    assert_eq!(report.event_id, event_id);
    assert_eq!(report.status, ProcessingStatus::Dispatched);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event_id(), event_id);
    assert!(history[0].recorded_at().unwrap() >= history[0].occurred_at());
}

#[tokio::test]
async fn test_every_registered_handler_runs_once() {
    // Arrange
    let coordinator = running(
        config(),
        Arc::new(InMemoryEventStore::new()),
        Arc::new(RecordingPublisher::new(NODE)),
    )
    .await;
    let welcome = Arc::new(RecordingHandler::new("welcome-email"));
    let analytics = Arc::new(RecordingHandler::new("analytics"));
    coordinator
        .register_handler("UserRegistered", welcome.clone())
        .unwrap();
    coordinator
        .register_handler("UserRegistered", analytics.clone())
        .unwrap();

    // Act
    let report = coordinator.publish(user_registered("U1")).await.unwrap();
    let status = coordinator.status().await;

    // Assert
    assert!(report.is_clean());
    assert_eq!(welcome.count(), 1);
    assert_eq!(analytics.count(), 1);
    assert_eq!(welcome.invocations()[0].mode, DispatchMode::Live);
    assert_eq!(status.failed, 0);
    assert_eq!(status.pending, 0);
}

#[tokio::test]
async fn test_failing_handler_does_not_affect_siblings() {
    // Arrange
    let coordinator = running(
        config(),
        Arc::new(InMemoryEventStore::new()),
        Arc::new(RecordingPublisher::new(NODE)),
    )
    .await;
    let analytics = Arc::new(RecordingHandler::new("analytics"));
    coordinator
        .register_handler("UserRegistered", Arc::new(FailingHandler::fatal("welcome-email")))
        .unwrap();
    coordinator
        .register_handler("UserRegistered", analytics.clone())
        .unwrap();

    // Act
    let report = coordinator.publish(user_registered("U1")).await.unwrap();

    // Assert
    assert_eq!(report.status, ProcessingStatus::Failed);
    assert_eq!(analytics.count(), 1);
    let failed: Vec<_> = report.handlers.iter().filter(|h| !h.is_success()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].handler_id, "welcome-email");
    assert_eq!(coordinator.status().await.failed, 1);
}

#[tokio::test]
async fn test_transport_outage_keeps_event_pending_until_redelivery() {
    // Arrange
    let publisher = Arc::new(RecordingPublisher::unavailable(NODE));
    let coordinator = running(
        config(),
        Arc::new(InMemoryEventStore::new()),
        publisher.clone(),
    )
    .await;
    let audit = Arc::new(RecordingHandler::new("audit"));
    coordinator
        .register_handler("UserRegistered", audit.clone())
        .unwrap();

    // Act
    let report = coordinator.publish(user_registered("U1")).await.unwrap();
    let pending = coordinator.get_unprocessed(10).await.unwrap();
    publisher.set_available(true);
    let redelivery = coordinator.redeliver_unprocessed(10).await.unwrap();

    // Assert
    assert_eq!(report.status, ProcessingStatus::Pending);
    assert!(report.transport_error.is_some());
    assert_eq!(pending.len(), 1);
    assert_eq!(redelivery.attempted, 1);
    assert_eq!(redelivery.dispatched, 1);
    assert_eq!(publisher.published().len(), 1);
    assert_eq!(audit.count(), 1);
    assert!(coordinator.get_unprocessed(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_store_outage_rejects_publish_and_leaves_no_trace() {
    // Arrange
    let store = Arc::new(OutageEventStore::new(InMemoryEventStore::new()));
    let publisher = Arc::new(RecordingPublisher::new(NODE));
    let coordinator = running(config(), store.clone(), publisher.clone()).await;
    let audit = Arc::new(RecordingHandler::new("audit"));
    coordinator
        .register_handler("UserRegistered", audit.clone())
        .unwrap();

    // Act
    store.set_down(true);
    let result = coordinator.publish(user_registered("U1")).await;
    store.set_down(false);
    let history = coordinator
        .get_history(&EventFilter::new(100))
        .await
        .unwrap();

    // Assert
    assert!(matches!(result, Err(EventError::Persistence(_))));
    assert!(history.is_empty());
    assert!(publisher.published().is_empty());
    assert_eq!(audit.count(), 0);
}

#[tokio::test]
async fn test_unreachable_store_reports_unhealthy_status() {
    let coordinator = running(
        config(),
        Arc::new(FailingEventStore),
        Arc::new(RecordingPublisher::new(NODE)),
    )
    .await;

    let result = coordinator.publish(user_registered("U1")).await;
    let status = coordinator.status().await;

    assert!(matches!(result, Err(EventError::Persistence(_))));
    assert!(matches!(status.store, Health::Unhealthy(_)));
    assert_eq!(status.publisher, Health::Healthy);
    assert!(!status.is_healthy());
}

#[tokio::test]
async fn test_vetoed_event_is_never_stored_or_dispatched() {
    // Arrange
    let store = Arc::new(InMemoryEventStore::new());
    let coordinator = EventDrivenCoordinator::new(
        config(),
        Arc::new(StaticBackends::new(
            store.clone(),
            Arc::new(RecordingPublisher::new(NODE)),
        )),
    )
    .with_middleware(Arc::new(TypeFilterMiddleware::deny(["UserDeleted"])));
    coordinator.start().await.unwrap();
    let audit = Arc::new(RecordingHandler::new("audit"));
    coordinator
        .register_handler("UserDeleted", audit.clone())
        .unwrap();
    let event = DomainEvent::new("U1", "UserDeleted", EventData::new(), &SystemClock);

    // Act
    let result = coordinator.publish(event).await;

    // Assert
    assert!(
        matches!(result, Err(EventError::Vetoed { ref middleware, .. }) if middleware == "type-filter")
    );
    assert_eq!(audit.count(), 0);
    assert!(store.is_empty().unwrap());
}

#[tokio::test]
async fn test_replay_window_dispatches_only_matching_events() {
    // Arrange
    let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let occurred = FixedClock(start - chrono::Duration::hours(1));
    let store = Arc::new(InMemoryEventStore::with_clock(Arc::new(SteppingClock::new(
        start,
        chrono::Duration::minutes(1),
    ))));
    let coordinator = running(
        CoordinatorConfig {
            replay_batch_size: 2,
            ..config()
        },
        store.clone(),
        Arc::new(RecordingPublisher::new(NODE)),
    )
    .await;
    for (aggregate, event_type) in [
        ("U1", "UserRegistered"),
        ("S1", "SubscriptionActivated"),
        ("U2", "UserRegistered"),
        ("S2", "SubscriptionActivated"),
        ("U3", "UserRegistered"),
        ("U4", "UserRegistered"),
    ] {
        coordinator
            .publish(DomainEvent::new(aggregate, event_type, EventData::new(), &occurred))
            .await
            .unwrap();
    }
    let onboarding = Arc::new(RecordingHandler::new("onboarding"));
    coordinator
        .register_handler("UserRegistered", onboarding.clone())
        .unwrap();
    let request = ReplayRequest::new(start, start + chrono::Duration::minutes(5))
        .event_type("UserRegistered");

    // Act
    let report = coordinator.replay(&request).await.unwrap();

    // Assert
    assert_eq!(report.events, 3);
    assert_eq!(report.dispatches, 3);
    assert_eq!(report.failures, 0);
    let replayed: Vec<_> = onboarding.invocations();
    assert!(replayed.iter().all(|i| i.mode == DispatchMode::Replay));
    assert_eq!(store.len().unwrap(), 6);
}

#[tokio::test]
async fn test_replay_is_repeatable_and_leaves_store_untouched() {
    // Arrange
    let coordinator = running(
        config(),
        Arc::new(InMemoryEventStore::new()),
        Arc::new(RecordingPublisher::new(NODE)),
    )
    .await;
    let before = Utc::now() - chrono::Duration::seconds(1);
    for user in ["U1", "U2"] {
        coordinator.publish(user_registered(user)).await.unwrap();
    }
    let audit = Arc::new(RecordingHandler::new("audit"));
    coordinator
        .register_handler("UserRegistered", audit.clone())
        .unwrap();
    let request = ReplayRequest::new(before, Utc::now() + chrono::Duration::seconds(1));
    let history_before = coordinator
        .get_history(&EventFilter::new(100))
        .await
        .unwrap();

    // Act
    let first = coordinator.replay(&request).await.unwrap();
    let second = coordinator.replay(&request).await.unwrap();
    let history_after = coordinator
        .get_history(&EventFilter::new(100))
        .await
        .unwrap();

    // Assert
    assert_eq!(first, second);
    assert_eq!(audit.count(), 4);
    let invocations = audit.invocations();
    assert_eq!(invocations[0].event_id, invocations[2].event_id);
    assert_eq!(invocations[1].event_id, invocations[3].event_id);
    assert_eq!(history_before, history_after);
}

#[tokio::test]
async fn test_inverted_replay_window_is_rejected() {
    let coordinator = running(
        config(),
        Arc::new(InMemoryEventStore::new()),
        Arc::new(RecordingPublisher::new(NODE)),
    )
    .await;
    let now = Utc::now();

    let result = coordinator
        .replay(&ReplayRequest::new(now, now - chrono::Duration::minutes(1)))
        .await;

    assert!(matches!(result, Err(EventError::Validation(_))));
}

#[tokio::test]
async fn test_batch_reports_each_event() {
    // Arrange
    let coordinator = running(
        config(),
        Arc::new(InMemoryEventStore::new()),
        Arc::new(RecordingPublisher::new(NODE)),
    )
    .await;
    let invalid = DomainEvent::new("U3", "", EventData::new(), &SystemClock);
    let invalid_id = invalid.event_id();

    // Act
    let report = coordinator
        .publish_batch(vec![user_registered("U1"), invalid, user_registered("U2")])
        .await
        .unwrap();

    // Assert
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert!(matches!(
        report.get(invalid_id),
        Some(Err(EventError::Validation(_)))
    ));
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_dispatch() {
    // Arrange
    let coordinator = Arc::new(
        running(
            config(),
            Arc::new(InMemoryEventStore::new()),
            Arc::new(RecordingPublisher::new(NODE)),
        )
        .await,
    );
    let slow = Arc::new(SlowHandler::new("slow", Duration::from_millis(200)));
    coordinator
        .register_handler("UserRegistered", slow.clone())
        .unwrap();
    let publishing = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.publish(user_registered("U1")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Act
    let report = coordinator.shutdown().await;

    // Assert
    assert_eq!(report.abandoned, 0);
    assert_eq!(slow.completed(), 1);
    assert_eq!(coordinator.state(), CoordinatorState::Stopped);
    assert!(publishing.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_shutdown_abandons_dispatch_past_drain_deadline() {
    // Arrange
    let coordinator = Arc::new(
        running(
            CoordinatorConfig {
                drain_timeout: Duration::from_millis(50),
                handler_timeout: Duration::from_secs(10),
                ..config()
            },
            Arc::new(InMemoryEventStore::new()),
            Arc::new(RecordingPublisher::new(NODE)),
        )
        .await,
    );
    coordinator
        .register_handler(
            "UserRegistered",
            Arc::new(SlowHandler::new("slow", Duration::from_secs(5))),
        )
        .unwrap();
    let publishing = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.publish(user_registered("U1")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Act
    let report = coordinator.shutdown().await;

    // Assert
    assert_eq!(report.abandoned, 1);
    assert_eq!(coordinator.state(), CoordinatorState::Stopped);
    publishing.abort();
}

#[tokio::test]
async fn test_remote_envelopes_reach_local_handlers() {
    // Arrange
    let store = Arc::new(InMemoryEventStore::new());
    let publisher = Arc::new(RecordingPublisher::new(NODE));
    let coordinator = running(
        CoordinatorConfig {
            consume_remote: true,
            ..config()
        },
        store.clone(),
        publisher.clone(),
    )
    .await;
    let audit = Arc::new(RecordingHandler::new("audit"));
    coordinator
        .register_handler("UserRegistered", audit.clone())
        .unwrap();

    // Act
    publisher
        .inject(TransportEnvelope {
            source_node: "node-b".into(),
            sent_at: Utc::now(),
            event: user_registered("U9"),
        })
        .await;
    coordinator.publish(user_registered("U1")).await.unwrap();

    // Assert
    let modes: Vec<_> = audit.invocations().into_iter().map(|i| i.mode).collect();
    assert_eq!(modes, vec![DispatchMode::Remote, DispatchMode::Live]);
    assert_eq!(store.len().unwrap(), 1);
    assert_eq!(publisher.subscriber_count(), 1);
}

#[tokio::test]
async fn test_shutdown_cancels_remote_subscription() {
    let publisher = Arc::new(RecordingPublisher::new(NODE));
    let coordinator = running(
        CoordinatorConfig {
            consume_remote: true,
            ..config()
        },
        Arc::new(InMemoryEventStore::new()),
        publisher.clone(),
    )
    .await;

    coordinator.shutdown().await;

    assert_eq!(publisher.subscriber_count(), 0);
}

#[tokio::test]
async fn test_status_reflects_running_instance() {
    // Arrange
    let coordinator = running(
        config(),
        Arc::new(InMemoryEventStore::new()),
        Arc::new(RecordingPublisher::new(NODE)),
    )
    .await;
    coordinator
        .register_handler("UserRegistered", Arc::new(RecordingHandler::new("a")))
        .unwrap();
    coordinator
        .register_handler("UserRegistered", Arc::new(RecordingHandler::new("b")))
        .unwrap();
    coordinator
        .register_handler("SubscriptionActivated", Arc::new(RecordingHandler::new("a")))
        .unwrap();

    // Act
    let status = coordinator.status().await;

    // Assert
    assert!(status.is_healthy());
    assert_eq!(status.state, CoordinatorState::Ready);
    assert_eq!(status.instance_id, coordinator.instance_id());
    assert_eq!(status.node_id, NODE);
    assert_eq!(status.registered_event_types, 2);
    assert_eq!(status.registered_handlers, 3);
}
