//! Event handler abstraction.

use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::event::DomainEvent;
use crate::payload::EventPayload;

/// Result of a single handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The event was handled.
    Success,
    /// Transient failure; the dispatcher may try again.
    Retryable(String),
    /// Permanent failure; no further attempts are made.
    Fatal(String),
}

impl HandlerOutcome {
    /// True for [`HandlerOutcome::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Why a handler is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// First delivery, as part of a publish.
    Live,
    /// Historical re-dispatch; the store is not updated.
    Replay,
    /// Recovery delivery of an event left pending or failed.
    Redelivery,
    /// Delivery of an event broadcast by another process.
    Remote,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Live => "live",
            Self::Replay => "replay",
            Self::Redelivery => "redelivery",
            Self::Remote => "remote",
        })
    }
}

/// Context passed to every handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchContext {
    /// Why this invocation happens.
    pub mode: DispatchMode,
    /// 1-based attempt number for this handler and event.
    pub attempt: u32,
}

impl DispatchContext {
    /// Context for the first attempt in `mode`.
    #[must_use]
    pub fn first(mode: DispatchMode) -> Self {
        Self { mode, attempt: 1 }
    }

    /// True when the event is being replayed from history.
    #[must_use]
    pub fn is_replay(&self) -> bool {
        self.mode == DispatchMode::Replay
    }
}

/// A consumer of domain events.
///
/// Handlers must be idempotent keyed by `event_id`: at-least-once delivery,
/// retries, redelivery and replay may all invoke a handler more than once
/// with the same event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable identifier, unique per event type. Used to record outcomes.
    fn handler_id(&self) -> &str;

    /// Handles one event.
    async fn handle(&self, event: &DomainEvent, ctx: &DispatchContext) -> HandlerOutcome;
}

/// A handler that works on a decoded, typed payload.
#[async_trait]
pub trait PayloadHandler<P: EventPayload>: Send + Sync {
    /// Stable identifier, unique per event type.
    fn handler_id(&self) -> &str;

    /// Handles one decoded payload. `event` carries the envelope fields.
    async fn handle_payload(
        &self,
        payload: P,
        event: &DomainEvent,
        ctx: &DispatchContext,
    ) -> HandlerOutcome;
}

/// Adapts a [`PayloadHandler`] to the untyped [`EventHandler`] interface.
///
/// An event whose data cannot be decoded into `P` is a fatal failure for
/// this handler.
pub struct TypedHandler<P, H> {
    inner: H,
    _payload: PhantomData<fn() -> P>,
}

impl<P, H> TypedHandler<P, H> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<P, H> EventHandler for TypedHandler<P, H>
where
    P: EventPayload + 'static,
    H: PayloadHandler<P>,
{
    fn handler_id(&self) -> &str {
        self.inner.handler_id()
    }

    async fn handle(&self, event: &DomainEvent, ctx: &DispatchContext) -> HandlerOutcome {
        match event.decode::<P>() {
            Ok(payload) => self.inner.handle_payload(payload, event, ctx).await,
            Err(e) => HandlerOutcome::Fatal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::event::EventData;
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    struct TestClock;

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct UserRegistered {
        email: String,
    }

    impl EventPayload for UserRegistered {
        const EVENT_TYPE: &'static str = "UserRegistered";
    }

    struct WelcomeEmail {
        sent_to: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PayloadHandler<UserRegistered> for WelcomeEmail {
        fn handler_id(&self) -> &str {
            "welcome-email"
        }

        async fn handle_payload(
            &self,
            payload: UserRegistered,
            _event: &DomainEvent,
            _ctx: &DispatchContext,
        ) -> HandlerOutcome {
            self.sent_to.lock().unwrap().push(payload.email);
            HandlerOutcome::Success
        }
    }

    #[tokio::test]
    async fn test_typed_handler_decodes_payload() {
        // Arrange
        let handler = TypedHandler::new(WelcomeEmail {
            sent_to: Mutex::new(Vec::new()),
        });
        let event = DomainEvent::from_payload(
            "U1",
            &UserRegistered {
                email: "a@b.com".into(),
            },
            &TestClock,
        )
        .unwrap();

        // Act
        let outcome = handler
            .handle(&event, &DispatchContext::first(DispatchMode::Live))
            .await;

        // Assert
        assert_eq!(outcome, HandlerOutcome::Success);
        assert_eq!(handler.handler_id(), "welcome-email");
        assert_eq!(*handler.inner.sent_to.lock().unwrap(), vec!["a@b.com"]);
    }

    #[tokio::test]
    async fn test_typed_handler_reports_undecodable_data_as_fatal() {
        let handler = TypedHandler::new(WelcomeEmail {
            sent_to: Mutex::new(Vec::new()),
        });
        let event = DomainEvent::new("U1", "UserRegistered", EventData::new(), &TestClock);

        let outcome = handler
            .handle(&event, &DispatchContext::first(DispatchMode::Replay))
            .await;

        assert!(matches!(outcome, HandlerOutcome::Fatal(_)));
        assert!(handler.inner.sent_to.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dispatch_context_flags_replay() {
        assert!(DispatchContext::first(DispatchMode::Replay).is_replay());
        assert!(!DispatchContext::first(DispatchMode::Live).is_replay());
    }
}
