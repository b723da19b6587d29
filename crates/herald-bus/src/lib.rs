//! Herald event bus and coordinator.
//!
//! The [`EventDrivenCoordinator`] owns one running instance of the
//! [`EventBus`], its [`HandlerRegistry`] and the store and transport handed
//! over by a [`BackendProvider`]. The bus records every event before it is
//! broadcast or dispatched.

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod drain;
pub mod middleware;
pub mod registry;
pub mod retry;

pub use bus::{BatchReport, EventBus, PublishReport, RedeliveryReport, ReplayReport, ReplayRequest};
pub use config::{ConfigError, CoordinatorConfig};
pub use coordinator::{
    BackendProvider, Backends, EventDrivenCoordinator, ShutdownReport, StaticBackends,
};
pub use dispatch::{Dispatcher, HandlerReport};
pub use middleware::{MiddlewareChain, TracingMiddleware, TypeFilterMiddleware};
pub use registry::HandlerRegistry;
pub use retry::RetryPolicy;
