//! Test stores: `EventStore` doubles for failure scenarios.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use herald_core::error::EventError;
use herald_core::event::{DomainEvent, ProcessingStatus};
use herald_core::status::{Health, StatusCounts};
use herald_core::store::{AppendAck, EventFilter, EventStore, HandlerOutcomeRecord};
use uuid::Uuid;

fn outage() -> EventError {
    EventError::Persistence("connection refused".into())
}

/// An event store that always returns a persistence error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventStore;

#[async_trait]
impl EventStore for FailingEventStore {
    async fn append(&self, _event: DomainEvent) -> Result<AppendAck, EventError> {
        Err(outage())
    }

    async fn get(&self, _event_id: Uuid) -> Result<Option<DomainEvent>, EventError> {
        Err(outage())
    }

    async fn get_by_aggregate(&self, _aggregate_id: &str) -> Result<Vec<DomainEvent>, EventError> {
        Err(outage())
    }

    async fn get_by_type(
        &self,
        _event_type: &str,
        _limit: usize,
    ) -> Result<Vec<DomainEvent>, EventError> {
        Err(outage())
    }

    async fn get_unprocessed(&self, _limit: usize) -> Result<Vec<DomainEvent>, EventError> {
        Err(outage())
    }

    async fn query(&self, _filter: &EventFilter) -> Result<Vec<DomainEvent>, EventError> {
        Err(outage())
    }

    async fn mark_processed(&self, _event_id: Uuid, _handler_id: &str) -> Result<(), EventError> {
        Err(outage())
    }

    async fn mark_failed(
        &self,
        _event_id: Uuid,
        _handler_id: &str,
        _reason: &str,
    ) -> Result<(), EventError> {
        Err(outage())
    }

    async fn set_status(
        &self,
        _event_id: Uuid,
        _status: ProcessingStatus,
    ) -> Result<(), EventError> {
        Err(outage())
    }

    async fn handler_outcomes(
        &self,
        _event_id: Uuid,
    ) -> Result<Vec<HandlerOutcomeRecord>, EventError> {
        Err(outage())
    }

    async fn status_counts(&self) -> Result<StatusCounts, EventError> {
        Err(outage())
    }

    async fn health_check(&self) -> Health {
        Health::Unhealthy("connection refused".into())
    }
}

/// Wraps a working store and lets a test switch it off, or fail a number of
/// upcoming appends, to simulate an outage of the durable log.
#[derive(Debug)]
pub struct OutageEventStore<S> {
    inner: S,
    down: AtomicBool,
    failing_appends: AtomicUsize,
    append_calls: AtomicUsize,
}

impl<S: EventStore> OutageEventStore<S> {
    /// Wraps `inner`, initially available.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
            failing_appends: AtomicUsize::new(0),
            append_calls: AtomicUsize::new(0),
        }
    }

    /// Switches every operation off (`true`) or back on.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Fails the next `count` appends, then recovers.
    pub fn fail_next_appends(&self, count: usize) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    /// Number of append calls received, failed or not.
    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check(&self) -> Result<(), EventError> {
        if self.down.load(Ordering::SeqCst) {
            Err(outage())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S: EventStore> EventStore for OutageEventStore<S> {
    async fn append(&self, event: DomainEvent) -> Result<AppendAck, EventError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let consumed = self
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(outage());
        }
        self.inner.append(event).await
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<DomainEvent>, EventError> {
        self.check()?;
        self.inner.get(event_id).await
    }

    async fn get_by_aggregate(&self, aggregate_id: &str) -> Result<Vec<DomainEvent>, EventError> {
        self.check()?;
        self.inner.get_by_aggregate(aggregate_id).await
    }

    async fn get_by_type(
        &self,
        event_type: &str,
        limit: usize,
    ) -> Result<Vec<DomainEvent>, EventError> {
        self.check()?;
        self.inner.get_by_type(event_type, limit).await
    }

    async fn get_unprocessed(&self, limit: usize) -> Result<Vec<DomainEvent>, EventError> {
        self.check()?;
        self.inner.get_unprocessed(limit).await
    }

    async fn query(&self, filter: &EventFilter) -> Result<Vec<DomainEvent>, EventError> {
        self.check()?;
        self.inner.query(filter).await
    }

    async fn mark_processed(&self, event_id: Uuid, handler_id: &str) -> Result<(), EventError> {
        self.check()?;
        self.inner.mark_processed(event_id, handler_id).await
    }

    async fn mark_failed(
        &self,
        event_id: Uuid,
        handler_id: &str,
        reason: &str,
    ) -> Result<(), EventError> {
        self.check()?;
        self.inner.mark_failed(event_id, handler_id, reason).await
    }

    async fn set_status(&self, event_id: Uuid, status: ProcessingStatus) -> Result<(), EventError> {
        self.check()?;
        self.inner.set_status(event_id, status).await
    }

    async fn handler_outcomes(
        &self,
        event_id: Uuid,
    ) -> Result<Vec<HandlerOutcomeRecord>, EventError> {
        self.check()?;
        self.inner.handler_outcomes(event_id).await
    }

    async fn status_counts(&self) -> Result<StatusCounts, EventError> {
        self.check()?;
        self.inner.status_counts().await
    }

    async fn health_check(&self) -> Health {
        if self.down.load(Ordering::SeqCst) {
            Health::Unhealthy("connection refused".into())
        } else {
            self.inner.health_check().await
        }
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
