//! The event bus: store, middleware, transport and local dispatch for one
//! publish, plus the history, replay and redelivery read paths.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use herald_core::error::EventError;
use herald_core::event::{DomainEvent, ProcessingStatus};
use herald_core::handler::DispatchMode;
use herald_core::middleware::PublishOutcomeView;
use herald_core::publisher::{EventPublisher, TransportEnvelope};
use herald_core::store::{AppendAck, EventFilter, EventStore, HandlerRecordStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::dispatch::{Dispatcher, HandlerReport};
use crate::middleware::MiddlewareChain;
use crate::registry::HandlerRegistry;
use crate::retry::RetryPolicy;

/// Result of one successful publish. The event is durably recorded;
/// transport and handler problems appear as warnings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Identifier of the recorded event (differs from the input when
    /// middleware derived a new event).
    pub event_id: Uuid,
    /// Store position.
    pub position: i64,
    /// When the store recorded the event.
    pub recorded_at: DateTime<Utc>,
    /// The event was already recorded; nothing was re-sent.
    pub duplicate: bool,
    /// Processing status after this publish.
    pub status: ProcessingStatus,
    /// Transport failure, if the broadcast did not go out.
    pub transport_error: Option<String>,
    /// Per-handler results of local dispatch.
    pub handlers: Vec<HandlerReport>,
    /// Everything that went wrong after the append.
    pub warnings: Vec<String>,
}

impl PublishReport {
    /// True when the transport accepted the event and every handler succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Per-event outcomes of a batch publish, in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Input `event_id` paired with that event's outcome.
    pub outcomes: Vec<(Uuid, Result<PublishReport, EventError>)>,
}

impl BatchReport {
    /// Outcome for the input event `event_id`.
    #[must_use]
    pub fn get(&self, event_id: Uuid) -> Option<&Result<PublishReport, EventError>> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == event_id)
            .map(|(_, outcome)| outcome)
    }

    /// Number of events recorded.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_ok()).count()
    }

    /// Number of events rejected or not recorded.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Time window, `[start, end)` on `recorded_at`, optionally narrowed to one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRequest {
    /// Inclusive lower bound.
    pub start: DateTime<Utc>,
    /// Exclusive upper bound.
    pub end: DateTime<Utc>,
    /// Only this event type.
    #[serde(default)]
    pub event_type: Option<String>,
}

impl ReplayRequest {
    /// Replays every type recorded in `[start, end)`.
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            event_type: None,
        }
    }

    /// Narrows the replay to one event type.
    #[must_use]
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    fn validate(&self) -> Result<(), EventError> {
        if self.start > self.end {
            return Err(EventError::Validation(format!(
                "replay window start {} is after end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

/// Totals of a replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Events read back from the store.
    pub events: usize,
    /// Handler invocations made (one per handler per event).
    pub dispatches: usize,
    /// Handler invocations that ended in failure.
    pub failures: usize,
}

/// Totals of a redelivery run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RedeliveryReport {
    /// Unprocessed events picked up.
    pub attempted: usize,
    /// Events now `dispatched`.
    pub dispatched: usize,
    /// Events now `failed`.
    pub failed: usize,
    /// Events still `pending` because the transport is unavailable.
    pub pending: usize,
}

/// Coordinates one publish across store, middleware, transport and local
/// handlers, and serves the read paths over the store.
pub struct EventBus {
    node_id: String,
    store: Arc<dyn EventStore>,
    publisher: Arc<dyn EventPublisher>,
    registry: Arc<HandlerRegistry>,
    middleware: MiddlewareChain,
    dispatcher: Dispatcher,
    store_retry: RetryPolicy,
    transport_retry: RetryPolicy,
    replay_batch_size: usize,
}

impl EventBus {
    /// Creates a bus over the given backends.
    #[must_use]
    pub fn new(
        config: &CoordinatorConfig,
        store: Arc<dyn EventStore>,
        publisher: Arc<dyn EventPublisher>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            node_id: config.node_id.clone(),
            store,
            publisher,
            registry,
            middleware: MiddlewareChain::new(),
            dispatcher: Dispatcher::new(config.handler_timeout, config.handler_retry),
            store_retry: config.store_retry,
            transport_retry: config.transport_retry,
            replay_batch_size: config.replay_batch_size.max(1),
        }
    }

    /// Installs the middleware chain.
    #[must_use]
    pub fn with_middleware(mut self, middleware: MiddlewareChain) -> Self {
        self.middleware = middleware;
        self
    }

    /// Transport identity of this bus.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The handler registry dispatched against.
    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// The durable log.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// The transport.
    #[must_use]
    pub fn publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.publisher
    }

    /// Runs one event through middleware, the store, the transport and
    /// local handlers.
    ///
    /// # Errors
    ///
    /// - `EventError::Vetoed` if middleware vetoed; nothing is stored.
    /// - `EventError::Validation` if the event is malformed; nothing is stored.
    /// - `EventError::Persistence` if the append failed after retries; the
    ///   event has not happened and was neither broadcast nor dispatched.
    #[instrument(skip_all, fields(event_type = %event.event_type(), aggregate_id = %event.aggregate_id()))]
    pub async fn publish(&self, event: DomainEvent) -> Result<PublishReport, EventError> {
        let event = self.middleware.before_publish(event).await?;

        let ack = match self.record(&event).await {
            Ok(ack) => ack,
            Err(e) => {
                if matches!(e, EventError::Persistence(_)) {
                    error!(event_id = %event.event_id(), error = %e, "append failed, event not recorded");
                }
                self.middleware
                    .after_publish(&event, &PublishOutcomeView::Failed(&e))
                    .await;
                return Err(e);
            }
        };

        if ack.duplicate {
            debug!(event_id = %ack.event_id, "event already recorded, skipping broadcast");
            let status = match self.store.get(ack.event_id).await {
                Ok(Some(existing)) => existing.processing_status(),
                _ => ProcessingStatus::Pending,
            };
            self.middleware
                .after_publish(&event, &PublishOutcomeView::Recorded { warnings: &[] })
                .await;
            return Ok(PublishReport {
                event_id: ack.event_id,
                position: ack.position,
                recorded_at: ack.recorded_at,
                duplicate: true,
                status,
                transport_error: None,
                handlers: Vec::new(),
                warnings: Vec::new(),
            });
        }

        let recorded = event.recorded(ack.position, ack.recorded_at);
        let delivery = self
            .deliver(&recorded, DispatchMode::Live, &HashSet::new())
            .await;
        self.middleware
            .after_publish(
                &recorded,
                &PublishOutcomeView::Recorded {
                    warnings: &delivery.warnings,
                },
            )
            .await;

        Ok(PublishReport {
            event_id: ack.event_id,
            position: ack.position,
            recorded_at: ack.recorded_at,
            duplicate: false,
            status: delivery.status,
            transport_error: delivery.transport_error,
            handlers: delivery.handlers,
            warnings: delivery.warnings,
        })
    }

    /// Publishes each event in turn. A failure is reported for that event
    /// and does not stop the rest.
    pub async fn publish_batch(&self, events: Vec<DomainEvent>) -> BatchReport {
        let mut report = BatchReport::default();
        for event in events {
            let event_id = event.event_id();
            let outcome = self.publish(event).await;
            report.outcomes.push((event_id, outcome));
        }
        report
    }

    /// Reads recorded events matching `filter` in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Persistence` if the store cannot be read.
    pub async fn get_history(&self, filter: &EventFilter) -> Result<Vec<DomainEvent>, EventError> {
        self.store.query(filter).await
    }

    /// Reads up to `limit` events that are not yet `dispatched`.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Persistence` if the store cannot be read.
    pub async fn get_unprocessed(&self, limit: usize) -> Result<Vec<DomainEvent>, EventError> {
        self.store.get_unprocessed(limit).await
    }

    /// Re-dispatches recorded events in the window to local handlers, in
    /// insertion order, flagged as replay. Nothing is broadcast and the
    /// store is not written.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Validation` for an inverted window, or
    /// `EventError::Persistence` if the store cannot be read.
    #[instrument(skip_all, fields(start = %request.start, end = %request.end))]
    pub async fn replay(&self, request: &ReplayRequest) -> Result<ReplayReport, EventError> {
        request.validate()?;
        let mut report = ReplayReport::default();
        let mut cursor = None;

        loop {
            let mut filter = EventFilter::new(self.replay_batch_size)
                .since(request.start)
                .until(request.end);
            if let Some(event_type) = &request.event_type {
                filter = filter.event_type(event_type.clone());
            }
            if let Some(position) = cursor {
                filter = filter.after_position(position);
            }

            let page = self.store.query(&filter).await?;
            for event in &page {
                let handlers = self.registry.handlers_for(event.event_type());
                let reports = self
                    .dispatcher
                    .dispatch(event, handlers, DispatchMode::Replay)
                    .await;
                report.events += 1;
                report.dispatches += reports.len();
                report.failures += reports.iter().filter(|r| !r.is_success()).count();
            }

            match page.last().and_then(DomainEvent::position) {
                Some(last) if page.len() == self.replay_batch_size => cursor = Some(last),
                _ => break,
            }
        }

        info!(
            events = report.events,
            dispatches = report.dispatches,
            failures = report.failures,
            "replay finished"
        );
        Ok(report)
    }

    /// Re-broadcasts up to `limit` pending or failed events and re-dispatches
    /// them to the local handlers that have not yet processed them.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Persistence` if the unprocessed events cannot be
    /// read.
    #[instrument(skip(self))]
    pub async fn redeliver_unprocessed(&self, limit: usize) -> Result<RedeliveryReport, EventError> {
        let events = self.store.get_unprocessed(limit).await?;
        let mut report = RedeliveryReport::default();

        for event in events {
            let done: HashSet<String> = match self.store.handler_outcomes(event.event_id()).await {
                Ok(outcomes) => outcomes
                    .into_iter()
                    .filter(|o| o.status == HandlerRecordStatus::Processed)
                    .map(|o| o.handler_id)
                    .collect(),
                Err(e) => {
                    warn!(event_id = %event.event_id(), error = %e, "handler outcomes unavailable, redelivering to all");
                    HashSet::new()
                }
            };
            let delivery = self.deliver(&event, DispatchMode::Redelivery, &done).await;
            report.attempted += 1;
            match delivery.status {
                ProcessingStatus::Dispatched => report.dispatched += 1,
                ProcessingStatus::Failed => report.failed += 1,
                ProcessingStatus::Pending => report.pending += 1,
            }
        }

        info!(
            attempted = report.attempted,
            dispatched = report.dispatched,
            failed = report.failed,
            pending = report.pending,
            "redelivery finished"
        );
        Ok(report)
    }

    /// Dispatches an envelope broadcast by another node to local handlers.
    /// Envelopes from this node are ignored. Returns `None` when skipped.
    pub async fn consume_remote(&self, envelope: TransportEnvelope) -> Option<Vec<HandlerReport>> {
        if envelope.source_node == self.node_id {
            return None;
        }
        let event = envelope.event;
        debug!(
            event_id = %event.event_id(),
            event_type = %event.event_type(),
            source_node = %envelope.source_node,
            "dispatching remote event"
        );
        let handlers = self.registry.handlers_for(event.event_type());
        Some(
            self.dispatcher
                .dispatch(&event, handlers, DispatchMode::Remote)
                .await,
        )
    }

    async fn record(&self, event: &DomainEvent) -> Result<AppendAck, EventError> {
        event.validate()?;
        let store = &self.store;
        self.store_retry
            .run("store append", |_| {
                let candidate = event.clone();
                async move { store.append(candidate).await }
            })
            .await
    }

    async fn broadcast(&self, event: &DomainEvent) -> Result<(), EventError> {
        let publisher = &self.publisher;
        self.transport_retry
            .run("transport publish", |_| async move { publisher.publish(event).await })
            .await
            .map(|_| ())
    }

    /// Broadcasts and dispatches concurrently, records per-handler outcomes
    /// and moves the event to its resulting status.
    async fn deliver(
        &self,
        event: &DomainEvent,
        mode: DispatchMode,
        skip: &HashSet<String>,
    ) -> Delivery {
        let handlers = self
            .registry
            .handlers_for(event.event_type())
            .into_iter()
            .filter(|h| !skip.contains(h.handler_id()))
            .collect();
        let (transport, reports) = tokio::join!(
            self.broadcast(event),
            self.dispatcher.dispatch(event, handlers, mode)
        );

        let mut warnings = Vec::new();
        let transport_error = transport.err().map(|e| {
            warn!(event_id = %event.event_id(), error = %e, "broadcast failed, event stays pending");
            let message = e.to_string();
            warnings.push(message.clone());
            message
        });

        let mut any_failed = false;
        for report in &reports {
            let recorded = match &report.failure {
                None => self.store.mark_processed(event.event_id(), &report.handler_id).await,
                Some(reason) => {
                    any_failed = true;
                    warnings.push(format!("handler {} failed: {reason}", report.handler_id));
                    self.store
                        .mark_failed(event.event_id(), &report.handler_id, reason)
                        .await
                }
            };
            if let Err(e) = recorded {
                warn!(event_id = %event.event_id(), handler_id = %report.handler_id, error = %e, "could not record handler outcome");
                warnings.push(e.to_string());
            }
        }

        let status = if any_failed {
            ProcessingStatus::Failed
        } else if transport_error.is_none() {
            ProcessingStatus::Dispatched
        } else {
            ProcessingStatus::Pending
        };
        if !any_failed && status != event.processing_status() {
            if let Err(e) = self.store.set_status(event.event_id(), status).await {
                warn!(event_id = %event.event_id(), %status, error = %e, "could not update processing status");
                warnings.push(e.to_string());
            }
        }

        Delivery {
            status,
            transport_error,
            handlers: reports,
            warnings,
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("node_id", &self.node_id)
            .field("registry", &self.registry)
            .field("middleware", &self.middleware)
            .finish_non_exhaustive()
    }
}

struct Delivery {
    status: ProcessingStatus,
    transport_error: Option<String>,
    handlers: Vec<HandlerReport>,
    warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use herald_core::clock::SystemClock;
    use herald_core::event::EventData;
    use herald_core::handler::EventHandler;
    use herald_event_store::InMemoryEventStore;
    use herald_test_support::{
        FailingHandler, FixedClock, FlakyHandler, OutageEventStore, RecordingHandler,
        RecordingPublisher, SteppingClock, event_data,
    };

    fn config() -> CoordinatorConfig {
        let fast = RetryPolicy::attempts(3)
            .with_backoff(std::time::Duration::from_millis(1), std::time::Duration::from_millis(5));
        CoordinatorConfig {
            node_id: "node-a".into(),
            handler_timeout: std::time::Duration::from_millis(500),
            handler_retry: fast,
            transport_retry: fast,
            store_retry: fast,
            replay_batch_size: 2,
            ..CoordinatorConfig::default()
        }
    }

    struct Fixture {
        store: Arc<InMemoryEventStore>,
        publisher: Arc<RecordingPublisher>,
        bus: EventBus,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryEventStore::new());
        let publisher = Arc::new(RecordingPublisher::new("node-a"));
        let bus = EventBus::new(
            &config(),
            store.clone(),
            publisher.clone(),
            Arc::new(HandlerRegistry::new()),
        );
        Fixture {
            store,
            publisher,
            bus,
        }
    }

    fn user_registered() -> DomainEvent {
        DomainEvent::new(
            "U1",
            "UserRegistered",
            event_data(serde_json::json!({"email": "a@b.com"})),
            &SystemClock,
        )
    }

    #[tokio::test]
    async fn test_publish_records_broadcasts_and_dispatches() {
        // Arrange
        let f = fixture();
        let handler = Arc::new(RecordingHandler::new("welcome-email"));
        f.bus.registry().register("UserRegistered", handler.clone()).unwrap();
        let event = user_registered();

        // Act
        let report = f.bus.publish(event.clone()).await.unwrap();

        // Assert
        assert_eq!(report.event_id, event.event_id());
        assert_eq!(report.status, ProcessingStatus::Dispatched);
        assert!(report.is_clean());
        assert_eq!(handler.count(), 1);
        assert_eq!(f.publisher.published().len(), 1);
        let stored = f.store.get(event.event_id()).await.unwrap().unwrap();
        assert_eq!(stored.processing_status(), ProcessingStatus::Dispatched);
    }

    #[tokio::test]
    async fn test_publish_without_handlers_is_dispatched_once_broadcast() {
        let f = fixture();

        let report = f.bus.publish(user_registered()).await.unwrap();

        assert_eq!(report.status, ProcessingStatus::Dispatched);
        assert!(report.handlers.is_empty());
    }

    #[tokio::test]
    async fn test_transport_outage_keeps_event_pending() {
        // Arrange
        let f = fixture();
        f.publisher.set_available(false);
        let handler = Arc::new(RecordingHandler::new("analytics"));
        f.bus.registry().register("UserRegistered", handler.clone()).unwrap();

        // Act
        let report = f.bus.publish(user_registered()).await.unwrap();

        // Assert
        assert_eq!(report.status, ProcessingStatus::Pending);
        assert!(report.transport_error.is_some());
        assert_eq!(handler.count(), 1);
        assert_eq!(f.bus.get_unprocessed(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_event_is_rejected_before_append() {
        let f = fixture();
        let event = DomainEvent::new("U1", "", EventData::new(), &SystemClock);

        let result = f.bus.publish(event).await;

        assert!(matches!(result, Err(EventError::Validation(_))));
        assert!(f.store.is_empty().unwrap());
        assert!(f.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_transient_append_failure_is_retried() {
        // Arrange
        let store = Arc::new(OutageEventStore::new(InMemoryEventStore::new()));
        store.fail_next_appends(2);
        let bus = EventBus::new(
            &config(),
            store.clone(),
            Arc::new(RecordingPublisher::new("node-a")),
            Arc::new(HandlerRegistry::new()),
        );

        // Act
        let report = bus.publish(user_registered()).await.unwrap();

        // Assert
        assert_eq!(store.append_calls(), 3);
        assert_eq!(store.inner().len().unwrap(), 1);
        assert!(!report.duplicate);
    }

    #[tokio::test]
    async fn test_republishing_same_event_is_a_duplicate() {
        let f = fixture();
        let handler = Arc::new(RecordingHandler::new("analytics"));
        f.bus.registry().register("UserRegistered", handler.clone()).unwrap();
        let event = user_registered();

        f.bus.publish(event.clone()).await.unwrap();
        let second = f.bus.publish(event).await.unwrap();

        assert!(second.duplicate);
        assert_eq!(second.status, ProcessingStatus::Dispatched);
        assert_eq!(handler.count(), 1);
        assert_eq!(f.store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_reports_each_event() {
        // Arrange
        let f = fixture();
        let good = user_registered();
        let bad = DomainEvent::new("U2", " ", EventData::new(), &SystemClock);
        let later = user_registered();

        // Act
        let report = f
            .bus
            .publish_batch(vec![good.clone(), bad.clone(), later.clone()])
            .await;

        // Assert
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert!(matches!(report.get(bad.event_id()), Some(Err(EventError::Validation(_)))));
        assert!(report.get(later.event_id()).unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_replay_pages_through_window_without_writing() {
        // Arrange
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let clock = Arc::new(SteppingClock::new(start, Duration::minutes(1)));
        let store = Arc::new(InMemoryEventStore::with_clock(clock));
        let bus = EventBus::new(
            &config(),
            store.clone(),
            Arc::new(RecordingPublisher::new("node-a")),
            Arc::new(HandlerRegistry::new()),
        );
        let handler = Arc::new(RecordingHandler::new("projector"));
        bus.registry().register("Tick", handler.clone()).unwrap();
        for _ in 0..5 {
            store
                .append(DomainEvent::new("clock", "Tick", EventData::new(), &FixedClock(start)))
                .await
                .unwrap();
        }
        let before = store.query(&EventFilter::new(100)).await.unwrap();

        // Act
        let report = bus
            .replay(&ReplayRequest::new(start, start + Duration::hours(1)))
            .await
            .unwrap();

        // Assert
        assert_eq!(report.events, 5);
        assert_eq!(report.dispatches, 5);
        assert!(handler.invocations().iter().all(|i| i.mode == DispatchMode::Replay));
        assert_eq!(store.query(&EventFilter::new(100)).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_inverted_replay_window_is_rejected() {
        let f = fixture();
        let now = Utc::now();

        let result = f
            .bus
            .replay(&ReplayRequest::new(now, now - Duration::minutes(1)))
            .await;

        assert!(matches!(result, Err(EventError::Validation(_))));
    }

    #[tokio::test]
    async fn test_redelivery_recovers_after_transport_outage() {
        // Arrange
        let f = fixture();
        let handler = Arc::new(RecordingHandler::new("analytics"));
        f.bus.registry().register("UserRegistered", handler.clone()).unwrap();
        f.publisher.set_available(false);
        let report = f.bus.publish(user_registered()).await.unwrap();
        assert_eq!(report.status, ProcessingStatus::Pending);
        f.publisher.set_available(true);

        // Act
        let redelivery = f.bus.redeliver_unprocessed(10).await.unwrap();

        // Assert
        assert_eq!(redelivery.attempted, 1);
        assert_eq!(redelivery.dispatched, 1);
        assert_eq!(f.publisher.published().len(), 1);
        assert_eq!(handler.count(), 1, "already-processed handler is not re-run");
        assert!(f.bus.get_unprocessed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redelivery_retries_only_failed_handlers() {
        // Arrange
        let f = fixture();
        let ok = Arc::new(RecordingHandler::new("analytics"));
        let flaky = Arc::new(FlakyHandler::new("welcome-email", 3));
        f.bus.registry().register("UserRegistered", ok.clone()).unwrap();
        f.bus
            .registry()
            .register("UserRegistered", flaky.clone() as Arc<dyn EventHandler>)
            .unwrap();
        let report = f.bus.publish(user_registered()).await.unwrap();
        assert_eq!(report.status, ProcessingStatus::Failed);

        // Act
        let redelivery = f.bus.redeliver_unprocessed(10).await.unwrap();

        // Assert
        assert_eq!(redelivery.dispatched, 1);
        assert_eq!(ok.count(), 1);
        assert_eq!(flaky.attempts(), 4);
        let stored = f.store.get(report.event_id).await.unwrap().unwrap();
        assert_eq!(stored.processing_status(), ProcessingStatus::Dispatched);
    }

    #[tokio::test]
    async fn test_fatal_handler_marks_event_failed() {
        let f = fixture();
        f.bus
            .registry()
            .register("UserRegistered", Arc::new(FailingHandler::fatal("welcome-email")))
            .unwrap();

        let report = f.bus.publish(user_registered()).await.unwrap();

        assert_eq!(report.status, ProcessingStatus::Failed);
        let outcomes = f.store.handler_outcomes(report.event_id).await.unwrap();
        assert_eq!(outcomes[0].status, HandlerRecordStatus::Failed);
        assert_eq!(outcomes[0].reason.as_deref(), Some("handler rejected event"));
    }

    #[tokio::test]
    async fn test_remote_envelopes_from_self_are_ignored() {
        let f = fixture();
        let handler = Arc::new(RecordingHandler::new("projector"));
        f.bus.registry().register("UserRegistered", handler.clone()).unwrap();
        let event = user_registered();

        let own = f
            .bus
            .consume_remote(TransportEnvelope {
                source_node: "node-a".into(),
                sent_at: Utc::now(),
                event: event.clone(),
            })
            .await;
        let foreign = f
            .bus
            .consume_remote(TransportEnvelope {
                source_node: "node-b".into(),
                sent_at: Utc::now(),
                event,
            })
            .await;

        assert!(own.is_none());
        assert_eq!(foreign.unwrap().len(), 1);
        assert_eq!(handler.invocations()[0].mode, DispatchMode::Remote);
        assert!(f.store.is_empty().unwrap());
    }
}
