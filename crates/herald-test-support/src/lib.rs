//! Shared test doubles and utilities for Herald.

pub mod conformance;

mod clock;
mod handler;
mod publisher;
mod store;

pub use clock::{FixedClock, SteppingClock};
pub use handler::{FailingHandler, FlakyHandler, Invocation, RecordingHandler, SlowHandler};
pub use publisher::RecordingPublisher;
pub use store::{FailingEventStore, OutageEventStore};

use herald_core::event::EventData;

/// Builds `EventData` from a `serde_json::json!` object literal.
///
/// # Panics
///
/// Panics if `value` is not a JSON object.
#[must_use]
pub fn event_data(value: serde_json::Value) -> EventData {
    value
        .as_object()
        .cloned()
        .expect("event_data requires a JSON object")
}
