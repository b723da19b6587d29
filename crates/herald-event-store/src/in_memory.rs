//! In-memory implementation of the `EventStore` trait.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use herald_core::clock::{Clock, SystemClock};
use herald_core::error::EventError;
use herald_core::event::{DomainEvent, ProcessingStatus};
use herald_core::status::{Health, StatusCounts};
use herald_core::store::{
    AppendAck, EventFilter, EventStore, HandlerOutcomeRecord, HandlerRecordStatus,
};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Log {
    /// Recorded events in position order. Positions are contiguous.
    events: VecDeque<DomainEvent>,
    outcomes: HashMap<Uuid, Vec<HandlerOutcomeRecord>>,
    index: HashMap<Uuid, i64>,
    next_position: i64,
}

impl Log {
    fn slot(&self, event_id: Uuid) -> Option<usize> {
        let position = *self.index.get(&event_id)?;
        let first = self.events.front()?.position()?;
        usize::try_from(position - first).ok()
    }

    fn event(&self, event_id: Uuid) -> Option<&DomainEvent> {
        self.slot(event_id).and_then(|i| self.events.get(i))
    }

    fn update_status(&mut self, event_id: Uuid, status: ProcessingStatus) -> Result<(), EventError> {
        let slot = self.slot(event_id).ok_or(EventError::EventNotFound(event_id))?;
        let event = self
            .events
            .get_mut(slot)
            .ok_or(EventError::EventNotFound(event_id))?;
        *event = event.clone().with_status(status);
        Ok(())
    }

    fn upsert_outcome(&mut self, record: HandlerOutcomeRecord) {
        let rows = self.outcomes.entry(record.event_id).or_default();
        match rows.iter_mut().find(|r| r.handler_id == record.handler_id) {
            Some(existing) => {
                let processed_at = record.processed_at.or(existing.processed_at);
                *existing = HandlerOutcomeRecord {
                    processed_at,
                    ..record
                };
            }
            None => rows.push(record),
        }
    }

    fn evict_oldest(&mut self) {
        if let Some(evicted) = self.events.pop_front() {
            self.index.remove(&evicted.event_id());
            self.outcomes.remove(&evicted.event_id());
            warn!(
                event_id = %evicted.event_id(),
                event_type = %evicted.event_type(),
                "ring buffer full, evicted oldest event"
            );
        }
    }
}

/// Event store held in process memory.
///
/// Unbounded by default. A bounded store behaves as a ring: once `capacity`
/// events are held, appending evicts the oldest one.
pub struct InMemoryEventStore {
    log: RwLock<Log>,
    capacity: Option<usize>,
    clock: Arc<dyn Clock>,
}

impl InMemoryEventStore {
    /// Creates an unbounded store using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an unbounded store stamping `recorded_at` from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            log: RwLock::new(Log {
                next_position: 1,
                ..Log::default()
            }),
            capacity: None,
            clock,
        }
    }

    /// Creates a ring-buffer store holding at most `capacity` events.
    #[must_use]
    pub fn bounded(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            ..Self::with_clock(clock)
        }
    }

    /// Number of events currently held.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Persistence` if the internal lock is poisoned.
    pub fn len(&self) -> Result<usize, EventError> {
        Ok(self.read()?.events.len())
    }

    /// True when no events are held.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Persistence` if the internal lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, EventError> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Log>, EventError> {
        self.log
            .read()
            .map_err(|_| EventError::Persistence("event log lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Log>, EventError> {
        self.log
            .write()
            .map_err(|_| EventError::Persistence("event log lock poisoned".into()))
    }

    fn collect<F>(&self, limit: usize, keep: F) -> Result<Vec<DomainEvent>, EventError>
    where
        F: Fn(&DomainEvent) -> bool,
    {
        Ok(self
            .read()?
            .events
            .iter()
            .filter(|e| keep(e))
            .take(limit)
            .cloned()
            .collect())
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventStore")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: DomainEvent) -> Result<AppendAck, EventError> {
        event.validate()?;
        let mut log = self.write()?;

        if let Some(existing) = log.event(event.event_id()) {
            debug!(event_id = %event.event_id(), "duplicate append ignored");
            return Ok(AppendAck {
                event_id: existing.event_id(),
                position: existing.position().unwrap_or_default(),
                recorded_at: existing.recorded_at().unwrap_or_else(|| existing.occurred_at()),
                duplicate: true,
            });
        }

        if self.capacity.is_some_and(|cap| log.events.len() >= cap) {
            log.evict_oldest();
        }

        let position = log.next_position;
        log.next_position += 1;
        let recorded = event.recorded(position, self.clock.now());
        let ack = AppendAck {
            event_id: recorded.event_id(),
            position,
            recorded_at: recorded.recorded_at().unwrap_or_else(|| recorded.occurred_at()),
            duplicate: false,
        };
        log.index.insert(recorded.event_id(), position);
        log.events.push_back(recorded);
        Ok(ack)
    }

    async fn get(&self, event_id: Uuid) -> Result<Option<DomainEvent>, EventError> {
        Ok(self.read()?.event(event_id).cloned())
    }

    async fn get_by_aggregate(&self, aggregate_id: &str) -> Result<Vec<DomainEvent>, EventError> {
        self.collect(usize::MAX, |e| e.aggregate_id() == aggregate_id)
    }

    async fn get_by_type(
        &self,
        event_type: &str,
        limit: usize,
    ) -> Result<Vec<DomainEvent>, EventError> {
        self.collect(limit, |e| e.event_type() == event_type)
    }

    async fn get_unprocessed(&self, limit: usize) -> Result<Vec<DomainEvent>, EventError> {
        self.collect(limit, |e| {
            e.processing_status() != ProcessingStatus::Dispatched
        })
    }

    async fn query(&self, filter: &EventFilter) -> Result<Vec<DomainEvent>, EventError> {
        self.collect(filter.limit, |e| filter.matches(e))
    }

    async fn mark_processed(&self, event_id: Uuid, handler_id: &str) -> Result<(), EventError> {
        let now = self.clock.now();
        let mut log = self.write()?;
        if log.event(event_id).is_none() {
            return Err(EventError::EventNotFound(event_id));
        }
        log.upsert_outcome(HandlerOutcomeRecord {
            event_id,
            handler_id: handler_id.to_owned(),
            status: HandlerRecordStatus::Processed,
            reason: None,
            processed_at: Some(now),
            updated_at: now,
        });
        Ok(())
    }

    async fn mark_failed(
        &self,
        event_id: Uuid,
        handler_id: &str,
        reason: &str,
    ) -> Result<(), EventError> {
        let now = self.clock.now();
        let mut log = self.write()?;
        log.update_status(event_id, ProcessingStatus::Failed)?;
        log.upsert_outcome(HandlerOutcomeRecord {
            event_id,
            handler_id: handler_id.to_owned(),
            status: HandlerRecordStatus::Failed,
            reason: Some(reason.to_owned()),
            processed_at: None,
            updated_at: now,
        });
        Ok(())
    }

    async fn set_status(&self, event_id: Uuid, status: ProcessingStatus) -> Result<(), EventError> {
        self.write()?.update_status(event_id, status)
    }

    async fn handler_outcomes(
        &self,
        event_id: Uuid,
    ) -> Result<Vec<HandlerOutcomeRecord>, EventError> {
        Ok(self
            .read()?
            .outcomes
            .get(&event_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn status_counts(&self) -> Result<StatusCounts, EventError> {
        let log = self.read()?;
        let mut counts = StatusCounts::default();
        for event in &log.events {
            match event.processing_status() {
                ProcessingStatus::Pending => counts.pending += 1,
                ProcessingStatus::Dispatched => counts.dispatched += 1,
                ProcessingStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn health_check(&self) -> Health {
        match self.read() {
            Ok(_) => Health::Healthy,
            Err(e) => Health::Unhealthy(e.to_string()),
        }
    }
}
