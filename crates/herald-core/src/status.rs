//! Health and lifecycle status types.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Connectivity of one backing component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Health {
    /// Reachable and serving.
    Healthy,
    /// Unreachable or degraded, with a reason.
    Unhealthy(String),
}

impl Health {
    /// True for [`Health::Healthy`].
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Lifecycle of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    /// Constructed, never started.
    Uninitialized,
    /// Acquiring backends.
    Starting,
    /// Accepting publishes and registrations.
    Ready,
    /// Draining in-flight dispatches.
    ShuttingDown,
    /// Backends released; may be started again.
    Stopped,
}

impl CoordinatorState {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event counts by processing status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Events recorded but not yet dispatched.
    pub pending: u64,
    /// Events fully dispatched.
    pub dispatched: u64,
    /// Events with at least one failed handler.
    pub failed: u64,
}

impl StatusCounts {
    /// Total number of recorded events.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.pending + self.dispatched + self.failed
    }
}

/// Read-only snapshot of the coordinator, computed on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    /// Lifecycle state.
    pub state: CoordinatorState,
    /// Identifier of the running instance; changes on every fresh start.
    pub instance_id: Option<Uuid>,
    /// This process's transport identity.
    pub node_id: String,
    /// Durable log connectivity.
    pub store: Health,
    /// Transport connectivity.
    pub publisher: Health,
    /// Number of event types with at least one handler.
    pub registered_event_types: usize,
    /// Number of registered handlers across all types.
    pub registered_handlers: usize,
    /// Events recorded but not yet dispatched.
    pub pending: u64,
    /// Events with failed handlers.
    pub failed: u64,
}

impl CoordinatorStatus {
    /// True when ready and both backends are healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state == CoordinatorState::Ready
            && self.store.is_healthy()
            && self.publisher.is_healthy()
    }
}
