//! Publish middleware abstraction.

use async_trait::async_trait;

use crate::error::EventError;
use crate::event::DomainEvent;

/// Decision returned by a before-publish hook.
#[derive(Debug, Clone, PartialEq)]
pub enum BeforePublish {
    /// Continue with this event. A transformed event must come from
    /// [`DomainEvent::derive_with`] so it carries its own `event_id`.
    Continue(DomainEvent),
    /// Abort the publish before anything is stored.
    Veto(String),
}

/// Interceptor around a publish operation.
///
/// Before hooks run in registration order; after hooks run in reverse.
#[async_trait]
pub trait PublishMiddleware: Send + Sync {
    /// Name used in logs and veto errors.
    fn name(&self) -> &str;

    /// Inspects, transforms or vetoes the event. An `Err` aborts the
    /// publish the same way a veto does.
    async fn before_publish(&self, event: DomainEvent) -> Result<BeforePublish, EventError> {
        Ok(BeforePublish::Continue(event))
    }

    /// Observes the outcome. Errors are logged by the chain and never reach
    /// the caller of publish.
    async fn after_publish(
        &self,
        _event: &DomainEvent,
        _outcome: &PublishOutcomeView<'_>,
    ) -> Result<(), EventError> {
        Ok(())
    }
}

/// What after-publish hooks get to see of the outcome.
#[derive(Debug, Clone, Copy)]
pub enum PublishOutcomeView<'a> {
    /// The event was recorded. `warnings` lists transport and handler issues.
    Recorded {
        /// Non-fatal problems encountered after the append.
        warnings: &'a [String],
    },
    /// The publish failed before or at the store.
    Failed(&'a EventError),
}
