//! Herald Core: shared event abstractions.
//!
//! This crate defines the event record, the error taxonomy, and the narrow
//! traits through which the coordination core talks to its durable log,
//! its pub/sub transport, its handlers and its middleware. It contains no
//! infrastructure code.

pub mod clock;
pub mod error;
pub mod event;
pub mod handler;
pub mod middleware;
pub mod payload;
pub mod publisher;
pub mod status;
pub mod store;
