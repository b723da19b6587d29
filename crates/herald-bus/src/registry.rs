//! Handler registry: event type to an ordered set of handlers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use herald_core::error::EventError;
use herald_core::handler::{EventHandler, PayloadHandler, TypedHandler};
use herald_core::payload::EventPayload;
use tracing::debug;

/// Maps event types to the handlers subscribed to them.
///
/// Handlers for one type are kept in registration order and are unique by
/// `handler_id`, since per-handler outcomes are recorded under that id.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `handler` for `event_type`.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Validation` if `event_type` is blank or a handler
    /// with the same id is already registered for it.
    pub fn register(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), EventError> {
        let event_type = event_type.into();
        if event_type.trim().is_empty() {
            return Err(EventError::Validation("event_type must not be empty".into()));
        }
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let entry = handlers.entry(event_type.clone()).or_default();
        if entry.iter().any(|h| h.handler_id() == handler.handler_id()) {
            return Err(EventError::Validation(format!(
                "handler {} is already registered for {event_type}",
                handler.handler_id()
            )));
        }
        debug!(%event_type, handler_id = %handler.handler_id(), "handler registered");
        entry.push(handler);
        Ok(())
    }

    /// Adds a typed handler under `P::EVENT_TYPE`.
    ///
    /// # Errors
    ///
    /// Same as [`HandlerRegistry::register`].
    pub fn register_payload<P, H>(&self, handler: H) -> Result<(), EventError>
    where
        P: EventPayload + 'static,
        H: PayloadHandler<P> + 'static,
    {
        self.register(P::EVENT_TYPE, Arc::new(TypedHandler::<P, H>::new(handler)))
    }

    /// Removes the handler with `handler_id` from `event_type`. Returns
    /// whether anything was removed.
    pub fn unregister(&self, event_type: &str, handler_id: &str) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = handlers.get_mut(event_type) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|h| h.handler_id() != handler_id);
        let removed = entry.len() != before;
        if entry.is_empty() {
            handlers.remove(event_type);
        }
        if removed {
            debug!(%event_type, %handler_id, "handler unregistered");
        }
        removed
    }

    /// Handlers for `event_type` in registration order.
    #[must_use]
    pub fn handlers_for(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Event types with at least one handler, sorted.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    /// Number of event types with at least one handler.
    #[must_use]
    pub fn event_type_count(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of registrations across all types.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("event_types", &self.event_types())
            .field("handlers", &self.handler_count())
            .finish()
    }
}
