//! Event store abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EventError;
use crate::event::{DomainEvent, ProcessingStatus};
use crate::status::{Health, StatusCounts};

/// Default page size for history queries.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Acknowledgement of a durable append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendAck {
    /// The recorded event.
    pub event_id: Uuid,
    /// Store-assigned insertion position.
    pub position: i64,
    /// When the event was recorded.
    pub recorded_at: DateTime<Utc>,
    /// True when the event was already present and nothing was written.
    pub duplicate: bool,
}

/// Read filter over recorded events. All criteria are conjunctive; results
/// come back in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Only this event type.
    pub event_type: Option<String>,
    /// Only this aggregate.
    pub aggregate_id: Option<String>,
    /// Recorded at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Recorded strictly before this instant.
    pub until: Option<DateTime<Utc>>,
    /// Positions strictly greater than this cursor.
    pub after_position: Option<i64>,
    /// Maximum number of events returned.
    pub limit: usize,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_LIMIT)
    }
}

impl EventFilter {
    /// An unconstrained filter returning at most `limit` events.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            event_type: None,
            aggregate_id: None,
            since: None,
            until: None,
            after_position: None,
            limit,
        }
    }

    /// Restricts to one event type.
    #[must_use]
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Restricts to one aggregate.
    #[must_use]
    pub fn aggregate_id(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    /// Restricts to events recorded at or after `since`.
    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Restricts to events recorded before `until`.
    #[must_use]
    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Resumes after a previously seen position.
    #[must_use]
    pub fn after_position(mut self, position: i64) -> Self {
        self.after_position = Some(position);
        self
    }

    /// True if a recorded event satisfies every criterion except `limit`.
    #[must_use]
    pub fn matches(&self, event: &DomainEvent) -> bool {
        if self
            .event_type
            .as_deref()
            .is_some_and(|t| t != event.event_type())
        {
            return false;
        }
        if self
            .aggregate_id
            .as_deref()
            .is_some_and(|a| a != event.aggregate_id())
        {
            return false;
        }
        let Some(recorded_at) = event.recorded_at() else {
            return false;
        };
        if self.since.is_some_and(|since| recorded_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| recorded_at >= until) {
            return false;
        }
        if let Some(cursor) = self.after_position {
            return event.position().is_some_and(|p| p > cursor);
        }
        true
    }
}

/// Outcome of one handler on one event, as recorded by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerRecordStatus {
    /// The handler returned success.
    Processed,
    /// The handler failed fatally or exhausted its retries.
    Failed,
}

impl HandlerRecordStatus {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

/// Per-handler outcome row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerOutcomeRecord {
    /// The event handled.
    pub event_id: Uuid,
    /// The handler.
    pub handler_id: String,
    /// Latest recorded outcome.
    pub status: HandlerRecordStatus,
    /// Failure reason, when failed.
    pub reason: Option<String>,
    /// When the handler last succeeded.
    pub processed_at: Option<DateTime<Utc>>,
    /// When this row last changed.
    pub updated_at: DateTime<Utc>,
}

/// Append-only persistence and query surface over domain events.
///
/// Events for one aggregate come back in insertion order; that is the only
/// ordering guarantee. Events are never deleted through this interface.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Durably records an event with status `pending`. Appending an
    /// `event_id` that already exists writes nothing and returns the
    /// original acknowledgement flagged as a duplicate.
    async fn append(&self, event: DomainEvent) -> Result<AppendAck, EventError>;

    /// Loads one event.
    async fn get(&self, event_id: Uuid) -> Result<Option<DomainEvent>, EventError>;

    /// Loads every event for an aggregate in insertion order.
    async fn get_by_aggregate(&self, aggregate_id: &str) -> Result<Vec<DomainEvent>, EventError>;

    /// Loads up to `limit` events of one type in insertion order.
    async fn get_by_type(
        &self,
        event_type: &str,
        limit: usize,
    ) -> Result<Vec<DomainEvent>, EventError>;

    /// Loads up to `limit` events whose status is not `dispatched`.
    async fn get_unprocessed(&self, limit: usize) -> Result<Vec<DomainEvent>, EventError>;

    /// Loads events matching `filter` in insertion order.
    async fn query(&self, filter: &EventFilter) -> Result<Vec<DomainEvent>, EventError>;

    /// Records that `handler_id` handled the event.
    async fn mark_processed(&self, event_id: Uuid, handler_id: &str) -> Result<(), EventError>;

    /// Records that `handler_id` failed and moves the event to `failed`.
    async fn mark_failed(
        &self,
        event_id: Uuid,
        handler_id: &str,
        reason: &str,
    ) -> Result<(), EventError>;

    /// Moves the event to `status`.
    async fn set_status(&self, event_id: Uuid, status: ProcessingStatus) -> Result<(), EventError>;

    /// Lists the per-handler outcomes recorded for an event.
    async fn handler_outcomes(&self, event_id: Uuid)
    -> Result<Vec<HandlerOutcomeRecord>, EventError>;

    /// Counts events by status.
    async fn status_counts(&self) -> Result<StatusCounts, EventError>;

    /// Reports store connectivity.
    async fn health_check(&self) -> Health;

    /// Releases the store connection.
    async fn close(&self) {}
}
