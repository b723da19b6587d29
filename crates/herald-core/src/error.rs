//! Error taxonomy for the coordination core.

use thiserror::Error;
use uuid::Uuid;

/// Top-level error type shared by every component of the core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// The event is malformed and was rejected before it reached the store.
    #[error("validation error: {0}")]
    Validation(String),

    /// The durable log could not append or read. Fatal to the current publish.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// The pub/sub transport could not be reached.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A handler failed to process an event.
    #[error("handler {handler_id} failed on event {event_id}: {reason}")]
    Handler {
        /// The handler that failed.
        handler_id: String,
        /// The event being processed.
        event_id: Uuid,
        /// Whether another attempt may succeed.
        retryable: bool,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The coordinator is not in the `ready` state.
    #[error("coordinator not ready (state: {state})")]
    NotReady {
        /// The lifecycle state at the time of the call.
        state: String,
    },

    /// A before-publish middleware vetoed the event.
    #[error("publish vetoed by {middleware}: {reason}")]
    Vetoed {
        /// Name of the vetoing middleware.
        middleware: String,
        /// Reason given by the middleware.
        reason: String,
    },

    /// No event with this identifier has been recorded.
    #[error("event not found: {0}")]
    EventNotFound(Uuid),
}

impl EventError {
    /// Returns true for transient failures that a bounded retry may recover.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Persistence(_) | Self::Transport(_) => true,
            Self::Handler { retryable, .. } => *retryable,
            Self::Validation(_)
            | Self::NotReady { .. }
            | Self::Vetoed { .. }
            | Self::EventNotFound(_) => false,
        }
    }
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("payload serialization failed: {err}"))
    }
}
