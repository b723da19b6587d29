//! Domain event record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::EventError;

/// Structurally-typed event payload: field name to value.
pub type EventData = serde_json::Map<String, serde_json::Value>;

/// Longest accepted `event_type`, matching the durable column width.
pub const MAX_EVENT_TYPE_LEN: usize = 255;

/// Dispatch state of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Recorded, not yet fully dispatched.
    Pending,
    /// Delivered to the transport and every local handler succeeded.
    Dispatched,
    /// At least one local handler failed fatally or exhausted its retries.
    Failed,
}

impl ProcessingStatus {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "dispatched" => Ok(Self::Dispatched),
            "failed" => Ok(Self::Failed),
            other => Err(EventError::Validation(format!(
                "unknown processing status: {other}"
            ))),
        }
    }
}

/// Immutable record of something that happened in the business domain.
///
/// Producers build events with [`DomainEvent::new`] (or
/// [`DomainEvent::from_payload`]) and never touch the
/// store-owned fields: `recorded_at`, `position` and `processing_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    event_id: Uuid,
    aggregate_id: String,
    event_type: String,
    event_data: EventData,
    occurred_at: DateTime<Utc>,
    recorded_at: Option<DateTime<Utc>>,
    schema_version: i32,
    processing_status: ProcessingStatus,
    caused_by: Option<Uuid>,
    position: Option<i64>,
}

impl DomainEvent {
    /// Creates a new pending event with a fresh identifier.
    ///
    /// `aggregate_id` may be empty for system-level events.
    #[must_use]
    pub fn new(
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        event_data: EventData,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            event_data,
            occurred_at: clock.now(),
            recorded_at: None,
            schema_version: 1,
            processing_status: ProcessingStatus::Pending,
            caused_by: None,
            position: None,
        }
    }

    /// Overrides the payload schema version (defaults to 1).
    #[must_use]
    pub fn with_schema_version(mut self, schema_version: i32) -> Self {
        self.schema_version = schema_version;
        self
    }

    /// Overrides the domain occurrence time set by the producer.
    #[must_use]
    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    /// Returns a new event carrying `event_data`, a fresh `event_id`, and a
    /// lineage pointer back to this event. The original is left untouched.
    #[must_use]
    pub fn derive_with(&self, event_data: EventData) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            aggregate_id: self.aggregate_id.clone(),
            event_type: self.event_type.clone(),
            event_data,
            occurred_at: self.occurred_at,
            recorded_at: None,
            schema_version: self.schema_version,
            processing_status: ProcessingStatus::Pending,
            caused_by: Some(self.event_id),
            position: None,
        }
    }

    /// Checks the structural rules every event must satisfy before append.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Validation` if `event_type` is blank or too long,
    /// or if `schema_version` is not positive.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.event_type.trim().is_empty() {
            return Err(EventError::Validation("event_type must not be empty".into()));
        }
        if self.event_type.len() > MAX_EVENT_TYPE_LEN {
            return Err(EventError::Validation(format!(
                "event_type exceeds {MAX_EVENT_TYPE_LEN} characters"
            )));
        }
        if self.schema_version < 1 {
            return Err(EventError::Validation(format!(
                "schema_version must be >= 1, got {}",
                self.schema_version
            )));
        }
        Ok(())
    }

    /// Marks the event as durably recorded at `position`. Store backends
    /// call this on append; `recorded_at` never precedes `occurred_at`.
    #[must_use]
    pub fn recorded(mut self, position: i64, recorded_at: DateTime<Utc>) -> Self {
        self.position = Some(position);
        self.recorded_at = Some(recorded_at.max(self.occurred_at));
        self.processing_status = ProcessingStatus::Pending;
        self
    }

    /// Returns a copy carrying `status`. Only the store and the bus move an
    /// event through its processing states.
    #[must_use]
    pub fn with_status(mut self, status: ProcessingStatus) -> Self {
        self.processing_status = status;
        self
    }

    /// Unique event identifier.
    #[must_use]
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// Identifier of the business entity this event concerns.
    #[must_use]
    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    /// Type discriminator used for handler and middleware routing.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The event payload.
    #[must_use]
    pub fn event_data(&self) -> &EventData {
        &self.event_data
    }

    /// When the event happened in the domain.
    #[must_use]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// When the store persisted the event, if it has been recorded.
    #[must_use]
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        self.recorded_at
    }

    /// Payload schema version.
    #[must_use]
    pub fn schema_version(&self) -> i32 {
        self.schema_version
    }

    /// Current dispatch state.
    #[must_use]
    pub fn processing_status(&self) -> ProcessingStatus {
        self.processing_status
    }

    /// The event this one was derived from, if any.
    #[must_use]
    pub fn caused_by(&self) -> Option<Uuid> {
        self.caused_by
    }

    /// Store-assigned insertion position.
    #[must_use]
    pub fn position(&self) -> Option<i64> {
        self.position
    }

    /// True once the store has recorded the event.
    #[must_use]
    pub fn is_recorded(&self) -> bool {
        self.recorded_at.is_some()
    }
}

/// Stored representation of a domain event, as read back from a durable log.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    /// Store-assigned insertion position.
    pub position: i64,
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Aggregate this event belongs to.
    pub aggregate_id: String,
    /// Event type name for routing.
    pub event_type: String,
    /// Serialized event payload.
    pub event_data: EventData,
    /// Payload schema version.
    pub schema_version: i32,
    /// Lineage pointer to the event this one was derived from.
    pub caused_by: Option<Uuid>,
    /// Dispatch state.
    pub processing_status: ProcessingStatus,
    /// Timestamp of domain occurrence.
    pub occurred_at: DateTime<Utc>,
    /// Timestamp of persistence.
    pub recorded_at: DateTime<Utc>,
}

impl From<StoredEvent> for DomainEvent {
    fn from(stored: StoredEvent) -> Self {
        Self {
            event_id: stored.event_id,
            aggregate_id: stored.aggregate_id,
            event_type: stored.event_type,
            event_data: stored.event_data,
            occurred_at: stored.occurred_at,
            recorded_at: Some(stored.recorded_at),
            schema_version: stored.schema_version,
            processing_status: stored.processing_status,
            caused_by: stored.caused_by,
            position: Some(stored.position),
        }
    }
}
