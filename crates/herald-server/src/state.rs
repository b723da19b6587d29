//! Shared application state.

use std::sync::Arc;

use herald_bus::EventDrivenCoordinator;

/// Application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The coordinator owning the store, transport and handlers.
    pub coordinator: Arc<EventDrivenCoordinator>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(coordinator: Arc<EventDrivenCoordinator>) -> Self {
        Self { coordinator }
    }
}
