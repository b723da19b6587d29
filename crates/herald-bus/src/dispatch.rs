//! Local fan-out with per-handler timeout and retry.

use std::sync::Arc;
use std::time::Duration;

use herald_core::event::DomainEvent;
use herald_core::handler::{DispatchContext, DispatchMode, EventHandler, HandlerOutcome};
use serde::Serialize;
use tracing::{debug, warn};

use crate::retry::RetryPolicy;

/// Final result of one handler on one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerReport {
    /// The handler.
    pub handler_id: String,
    /// Invocations made, including retries.
    pub attempts: u32,
    /// Failure reason, absent on success.
    pub failure: Option<String>,
}

impl HandlerReport {
    /// True when the handler eventually succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Runs the handlers for one event concurrently, each in its own task.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    timeout: Duration,
    retry: RetryPolicy,
}

impl Dispatcher {
    /// Creates a dispatcher bounding every invocation by `timeout` and
    /// retrying retryable outcomes under `retry`.
    #[must_use]
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self { timeout, retry }
    }

    /// Invokes every handler with `event` and waits for all of them.
    ///
    /// A failing, timed-out or panicking handler never affects its siblings.
    /// Reports come back in the order `handlers` was given.
    pub async fn dispatch(
        &self,
        event: &DomainEvent,
        handlers: Vec<Arc<dyn EventHandler>>,
        mode: DispatchMode,
    ) -> Vec<HandlerReport> {
        if handlers.is_empty() {
            debug!(event_id = %event.event_id(), %mode, "no local handlers");
            return Vec::new();
        }
        let event = Arc::new(event.clone());

        let tasks: Vec<_> = handlers
            .into_iter()
            .map(|handler| {
                let handler_id = handler.handler_id().to_owned();
                let event = Arc::clone(&event);
                let timeout = self.timeout;
                let retry = self.retry;
                let task =
                    tokio::spawn(
                        async move { run_handler(handler, &event, mode, timeout, retry).await },
                    );
                (handler_id, task)
            })
            .collect();

        let mut reports = Vec::with_capacity(tasks.len());
        for (handler_id, task) in tasks {
            let report = match task.await {
                Ok(report) => report,
                Err(e) => {
                    warn!(%handler_id, event_id = %event.event_id(), error = %e, "handler task aborted");
                    HandlerReport {
                        handler_id,
                        attempts: 1,
                        failure: Some(format!("handler panicked: {e}")),
                    }
                }
            };
            reports.push(report);
        }
        reports
    }
}

async fn run_handler(
    handler: Arc<dyn EventHandler>,
    event: &DomainEvent,
    mode: DispatchMode,
    timeout: Duration,
    retry: RetryPolicy,
) -> HandlerReport {
    let handler_id = handler.handler_id().to_owned();
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let ctx = DispatchContext { mode, attempt };
        let reason = match tokio::time::timeout(timeout, handler.handle(event, &ctx)).await {
            Ok(HandlerOutcome::Success) => {
                debug!(%handler_id, event_id = %event.event_id(), %mode, attempt, "handler succeeded");
                return HandlerReport {
                    handler_id,
                    attempts: attempt,
                    failure: None,
                };
            }
            Ok(HandlerOutcome::Fatal(reason)) => {
                warn!(%handler_id, event_id = %event.event_id(), %mode, %reason, "handler failed fatally");
                return HandlerReport {
                    handler_id,
                    attempts: attempt,
                    failure: Some(reason),
                };
            }
            Ok(HandlerOutcome::Retryable(reason)) => reason,
            Err(_) => format!(
                "timed out after {}ms",
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
            ),
        };

        if attempt >= max_attempts {
            warn!(
                %handler_id,
                event_id = %event.event_id(),
                %mode,
                attempts = attempt,
                %reason,
                "handler exhausted retries"
            );
            return HandlerReport {
                handler_id,
                attempts: attempt,
                failure: Some(reason),
            };
        }
        debug!(%handler_id, event_id = %event.event_id(), attempt, %reason, "retrying handler");
        tokio::time::sleep(retry.backoff(attempt)).await;
        attempt += 1;
    }
}
