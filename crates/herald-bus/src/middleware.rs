//! Middleware chain and the built-in interceptors.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use herald_core::error::EventError;
use herald_core::event::DomainEvent;
use herald_core::middleware::{BeforePublish, PublishMiddleware, PublishOutcomeView};
use tracing::{debug, warn};

/// Ordered interceptors around publish.
///
/// `before_publish` hooks run in registration order and may veto, which
/// short-circuits the rest of the chain. `after_publish` hooks run in
/// reverse order and their errors are only logged.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn PublishMiddleware>>,
}

impl MiddlewareChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `middleware` to the chain.
    pub fn push(&mut self, middleware: Arc<dyn PublishMiddleware>) {
        self.layers.push(middleware);
    }

    /// Builder form of [`MiddlewareChain::push`].
    #[must_use]
    pub fn with(mut self, middleware: Arc<dyn PublishMiddleware>) -> Self {
        self.push(middleware);
        self
    }

    /// Number of interceptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// True when no interceptors are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Runs every `before_publish` hook and returns the event to record.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Vetoed` naming the first middleware that vetoed,
    /// or any error a hook raised.
    pub async fn before_publish(&self, mut event: DomainEvent) -> Result<DomainEvent, EventError> {
        for layer in &self.layers {
            match layer.before_publish(event).await? {
                BeforePublish::Continue(next) => event = next,
                BeforePublish::Veto(reason) => {
                    debug!(middleware = layer.name(), %reason, "publish vetoed");
                    return Err(EventError::Vetoed {
                        middleware: layer.name().to_owned(),
                        reason,
                    });
                }
            }
        }
        Ok(event)
    }

    /// Runs every `after_publish` hook in reverse order.
    pub async fn after_publish(&self, event: &DomainEvent, outcome: &PublishOutcomeView<'_>) {
        for layer in self.layers.iter().rev() {
            if let Err(e) = layer.after_publish(event, outcome).await {
                warn!(
                    middleware = layer.name(),
                    event_id = %event.event_id(),
                    error = %e,
                    "after-publish hook failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.layers.iter().map(|m| m.name().to_owned()))
            .finish()
    }
}

/// Vetoes events by type.
#[derive(Debug, Clone)]
pub struct TypeFilterMiddleware {
    types: HashSet<String>,
    allow: bool,
}

impl TypeFilterMiddleware {
    /// Lets only the listed types through.
    #[must_use]
    pub fn allow<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
            allow: true,
        }
    }

    /// Blocks the listed types.
    #[must_use]
    pub fn deny<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
            allow: false,
        }
    }
}

#[async_trait]
impl PublishMiddleware for TypeFilterMiddleware {
    fn name(&self) -> &str {
        "type-filter"
    }

    async fn before_publish(&self, event: DomainEvent) -> Result<BeforePublish, EventError> {
        if self.types.contains(event.event_type()) == self.allow {
            Ok(BeforePublish::Continue(event))
        } else {
            Ok(BeforePublish::Veto(format!(
                "event type {} is not accepted",
                event.event_type()
            )))
        }
    }
}

/// Logs each publish as it enters and leaves the chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMiddleware;

#[async_trait]
impl PublishMiddleware for TracingMiddleware {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn before_publish(&self, event: DomainEvent) -> Result<BeforePublish, EventError> {
        debug!(
            event_id = %event.event_id(),
            event_type = %event.event_type(),
            aggregate_id = %event.aggregate_id(),
            "publishing event"
        );
        Ok(BeforePublish::Continue(event))
    }

    async fn after_publish(
        &self,
        event: &DomainEvent,
        outcome: &PublishOutcomeView<'_>,
    ) -> Result<(), EventError> {
        match outcome {
            PublishOutcomeView::Recorded { warnings } if warnings.is_empty() => {
                debug!(event_id = %event.event_id(), "event published");
            }
            PublishOutcomeView::Recorded { warnings } => {
                debug!(event_id = %event.event_id(), warnings = warnings.len(), "event published with warnings");
            }
            PublishOutcomeView::Failed(error) => {
                debug!(event_id = %event.event_id(), %error, "event publish failed");
            }
        }
        Ok(())
    }
}
