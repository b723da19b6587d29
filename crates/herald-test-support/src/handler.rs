//! Test handlers: `EventHandler` doubles that record or fail on demand.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use herald_core::event::DomainEvent;
use herald_core::handler::{DispatchContext, DispatchMode, EventHandler, HandlerOutcome};
use uuid::Uuid;

/// One recorded handler call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// The event handled.
    pub event_id: Uuid,
    /// Its type.
    pub event_type: String,
    /// Why it was dispatched.
    pub mode: DispatchMode,
    /// Attempt number.
    pub attempt: u32,
}

fn invocation(event: &DomainEvent, ctx: &DispatchContext) -> Invocation {
    Invocation {
        event_id: event.event_id(),
        event_type: event.event_type().to_owned(),
        mode: ctx.mode,
        attempt: ctx.attempt,
    }
}

/// A handler that records every invocation and always succeeds.
#[derive(Debug)]
pub struct RecordingHandler {
    id: String,
    invocations: Mutex<Vec<Invocation>>,
}

impl RecordingHandler {
    /// Creates a recording handler with the given id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Returns a snapshot of all invocations.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Number of invocations so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn handler_id(&self) -> &str {
        &self.id
    }

    async fn handle(&self, event: &DomainEvent, ctx: &DispatchContext) -> HandlerOutcome {
        self.invocations
            .lock()
            .unwrap()
            .push(invocation(event, ctx));
        HandlerOutcome::Success
    }
}

/// A handler that always fails, either retryably or fatally.
#[derive(Debug)]
pub struct FailingHandler {
    id: String,
    retryable: bool,
    attempts: AtomicU32,
}

impl FailingHandler {
    /// A handler that fails fatally on every call.
    #[must_use]
    pub fn fatal(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            retryable: false,
            attempts: AtomicU32::new(0),
        }
    }

    /// A handler that fails retryably on every call.
    #[must_use]
    pub fn retryable(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            retryable: true,
            attempts: AtomicU32::new(0),
        }
    }

    /// Number of calls so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for FailingHandler {
    fn handler_id(&self) -> &str {
        &self.id
    }

    async fn handle(&self, _event: &DomainEvent, _ctx: &DispatchContext) -> HandlerOutcome {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.retryable {
            HandlerOutcome::Retryable("downstream unavailable".into())
        } else {
            HandlerOutcome::Fatal("handler rejected event".into())
        }
    }
}

/// A handler that fails retryably a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyHandler {
    id: String,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl FlakyHandler {
    /// Fails the first `failures` calls.
    #[must_use]
    pub fn new(id: impl Into<String>, failures: u32) -> Self {
        Self {
            id: id.into(),
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    /// Number of calls so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for FlakyHandler {
    fn handler_id(&self) -> &str {
        &self.id
    }

    async fn handle(&self, _event: &DomainEvent, _ctx: &DispatchContext) -> HandlerOutcome {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            HandlerOutcome::Retryable("transient failure".into())
        } else {
            HandlerOutcome::Success
        }
    }
}

/// A handler that sleeps before succeeding. Used for timeout and drain tests.
#[derive(Debug)]
pub struct SlowHandler {
    id: String,
    delay: Duration,
    completed: AtomicU32,
}

impl SlowHandler {
    /// Sleeps for `delay` on every call.
    #[must_use]
    pub fn new(id: impl Into<String>, delay: Duration) -> Self {
        Self {
            id: id.into(),
            delay,
            completed: AtomicU32::new(0),
        }
    }

    /// Number of calls that ran to completion.
    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for SlowHandler {
    fn handler_id(&self) -> &str {
        &self.id
    }

    async fn handle(&self, _event: &DomainEvent, _ctx: &DispatchContext) -> HandlerOutcome {
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        HandlerOutcome::Success
    }
}
