//! Lifecycle owner and system boundary.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use herald_core::error::EventError;
use herald_core::event::DomainEvent;
use herald_core::handler::{EventHandler, PayloadHandler};
use herald_core::middleware::PublishMiddleware;
use herald_core::payload::EventPayload;
use herald_core::publisher::{
    ALL_TOPICS, EventPublisher, SubscriptionHandle, TransportEnvelope, TransportListener,
};
use herald_core::status::{CoordinatorState, CoordinatorStatus, Health, StatusCounts};
use herald_core::store::{EventFilter, EventStore};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::bus::{BatchReport, EventBus, PublishReport, RedeliveryReport, ReplayReport, ReplayRequest};
use crate::config::CoordinatorConfig;
use crate::drain::{InFlight, InFlightGuard};
use crate::middleware::MiddlewareChain;
use crate::registry::HandlerRegistry;

/// Store and transport handed to the coordinator at start.
#[derive(Clone)]
pub struct Backends {
    /// The durable log.
    pub store: Arc<dyn EventStore>,
    /// The transport.
    pub publisher: Arc<dyn EventPublisher>,
}

/// Acquires backends at start. Each start calls `acquire` again, so a
/// provider that opens connections gives every run fresh ones.
#[async_trait]
pub trait BackendProvider: Send + Sync {
    /// Opens or hands out the store and transport.
    async fn acquire(&self) -> Result<Backends, EventError>;
}

/// Hands out the same backends on every start.
///
/// Suited to backends whose `close` is a no-op or to a single start/shutdown
/// cycle.
pub struct StaticBackends(Backends);

impl StaticBackends {
    /// Wraps already-built backends.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self(Backends { store, publisher })
    }
}

#[async_trait]
impl BackendProvider for StaticBackends {
    async fn acquire(&self) -> Result<Backends, EventError> {
        Ok(self.0.clone())
    }
}

/// Outcome of a shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// In-flight operations still running when the drain deadline passed.
    pub abandoned: usize,
}

struct Runtime {
    instance_id: Uuid,
    bus: Arc<EventBus>,
    in_flight: Arc<InFlight>,
    remote: Mutex<Option<SubscriptionHandle>>,
}

struct Lifecycle {
    state: CoordinatorState,
    runtime: Option<Arc<Runtime>>,
}

/// Owns the store, transport, registry and bus for one running instance and
/// is the only surface callers use.
///
/// `start` and `shutdown` are idempotent. Publishing, registration and the
/// read paths are only accepted while the state is `Ready`; otherwise they
/// fail with `EventError::NotReady`. A start after shutdown builds a fresh
/// instance with an empty registry.
pub struct EventDrivenCoordinator {
    config: CoordinatorConfig,
    provider: Arc<dyn BackendProvider>,
    middleware: MiddlewareChain,
    lifecycle: RwLock<Lifecycle>,
    transitions: tokio::sync::Mutex<()>,
}

impl EventDrivenCoordinator {
    /// Creates an uninitialized coordinator.
    #[must_use]
    pub fn new(config: CoordinatorConfig, provider: Arc<dyn BackendProvider>) -> Self {
        Self {
            config,
            provider,
            middleware: MiddlewareChain::new(),
            lifecycle: RwLock::new(Lifecycle {
                state: CoordinatorState::Uninitialized,
                runtime: None,
            }),
            transitions: tokio::sync::Mutex::new(()),
        }
    }

    /// Adds a publish interceptor. Takes effect from the next start.
    #[must_use]
    pub fn with_middleware(mut self, middleware: Arc<dyn PublishMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// The configuration this coordinator runs with.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        self.lifecycle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Identifier of the running instance, if any.
    #[must_use]
    pub fn instance_id(&self) -> Option<Uuid> {
        self.lifecycle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .runtime
            .as_ref()
            .map(|rt| rt.instance_id)
    }

    /// Acquires backends and becomes `Ready`. Returns the instance id; when
    /// already running, returns the running instance's id.
    ///
    /// # Errors
    ///
    /// Returns the provider's error if backends cannot be acquired; the
    /// coordinator then stays in its previous state.
    #[instrument(skip(self), fields(node_id = %self.config.node_id))]
    pub async fn start(&self) -> Result<Uuid, EventError> {
        let _transition = self.transitions.lock().await;
        let previous = {
            let lifecycle = self.lifecycle.read().unwrap_or_else(PoisonError::into_inner);
            if let (CoordinatorState::Ready, Some(runtime)) = (lifecycle.state, &lifecycle.runtime) {
                return Ok(runtime.instance_id);
            }
            lifecycle.state
        };

        self.set_state(CoordinatorState::Starting);
        info!("coordinator starting");

        let backends = match self.provider.acquire().await {
            Ok(backends) => backends,
            Err(e) => {
                error!(error = %e, "could not acquire backends");
                self.set_state(previous);
                return Err(e);
            }
        };

        let registry = Arc::new(HandlerRegistry::new());
        let bus = Arc::new(
            EventBus::new(&self.config, backends.store, backends.publisher, registry)
                .with_middleware(self.middleware.clone()),
        );
        let in_flight = Arc::new(InFlight::new());

        let remote = if self.config.consume_remote {
            let listener = Arc::new(RemoteListener {
                bus: Arc::clone(&bus),
                in_flight: Arc::clone(&in_flight),
            });
            match bus.publisher().subscribe(ALL_TOPICS, listener).await {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!(error = %e, "remote consumption unavailable");
                    None
                }
            }
        } else {
            None
        };

        let runtime = Arc::new(Runtime {
            instance_id: Uuid::new_v4(),
            bus,
            in_flight,
            remote: Mutex::new(remote),
        });
        let instance_id = runtime.instance_id;
        {
            let mut lifecycle = self.lifecycle.write().unwrap_or_else(PoisonError::into_inner);
            lifecycle.state = CoordinatorState::Ready;
            lifecycle.runtime = Some(runtime);
        }
        info!(%instance_id, "coordinator ready");
        Ok(instance_id)
    }

    /// Stops accepting work, waits up to the drain timeout for in-flight
    /// operations, closes the backends and becomes `Stopped`. A no-op when
    /// not running.
    #[instrument(skip(self), fields(node_id = %self.config.node_id))]
    pub async fn shutdown(&self) -> ShutdownReport {
        let _transition = self.transitions.lock().await;
        let runtime = {
            let mut lifecycle = self.lifecycle.write().unwrap_or_else(PoisonError::into_inner);
            if lifecycle.state != CoordinatorState::Ready {
                return ShutdownReport::default();
            }
            lifecycle.state = CoordinatorState::ShuttingDown;
            lifecycle.runtime.take()
        };
        info!("coordinator shutting down");

        let mut report = ShutdownReport::default();
        if let Some(runtime) = runtime {
            let remote = runtime
                .remote
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            drop(remote);

            if !runtime.in_flight.wait_idle(self.config.drain_timeout).await {
                report.abandoned = runtime.in_flight.count();
                warn!(
                    abandoned = report.abandoned,
                    "drain deadline passed, abandoning in-flight dispatches"
                );
            }
            runtime.bus.publisher().close().await;
            runtime.bus.store().close().await;
        }

        self.set_state(CoordinatorState::Stopped);
        info!("coordinator stopped");
        report
    }

    /// Publishes one event. See [`EventBus::publish`].
    ///
    /// # Errors
    ///
    /// `EventError::NotReady` outside `Ready`, otherwise as
    /// [`EventBus::publish`].
    pub async fn publish(&self, event: DomainEvent) -> Result<PublishReport, EventError> {
        let (runtime, _guard) = self.ready()?;
        runtime.bus.publish(event).await
    }

    /// Publishes events one by one with per-event outcomes.
    ///
    /// # Errors
    ///
    /// `EventError::NotReady` outside `Ready`.
    pub async fn publish_batch(&self, events: Vec<DomainEvent>) -> Result<BatchReport, EventError> {
        let (runtime, _guard) = self.ready()?;
        Ok(runtime.bus.publish_batch(events).await)
    }

    /// Subscribes `handler` to `event_type`.
    ///
    /// # Errors
    ///
    /// `EventError::NotReady` outside `Ready`, or `EventError::Validation`
    /// for a blank type or duplicate handler id.
    pub fn register_handler(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), EventError> {
        let (runtime, _guard) = self.ready()?;
        runtime.bus.registry().register(event_type, handler)
    }

    /// Subscribes a typed handler to `P::EVENT_TYPE`.
    ///
    /// # Errors
    ///
    /// Same as [`EventDrivenCoordinator::register_handler`].
    pub fn register_payload_handler<P, H>(&self, handler: H) -> Result<(), EventError>
    where
        P: EventPayload + 'static,
        H: PayloadHandler<P> + 'static,
    {
        let (runtime, _guard) = self.ready()?;
        runtime.bus.registry().register_payload::<P, H>(handler)
    }

    /// Removes a handler. Returns whether it was registered.
    ///
    /// # Errors
    ///
    /// `EventError::NotReady` outside `Ready`.
    pub fn unregister_handler(&self, event_type: &str, handler_id: &str) -> Result<bool, EventError> {
        let (runtime, _guard) = self.ready()?;
        Ok(runtime.bus.registry().unregister(event_type, handler_id))
    }

    /// Reads recorded events.
    ///
    /// # Errors
    ///
    /// `EventError::NotReady` outside `Ready`, or the store's error.
    pub async fn get_history(&self, filter: &EventFilter) -> Result<Vec<DomainEvent>, EventError> {
        let (runtime, _guard) = self.ready()?;
        runtime.bus.get_history(filter).await
    }

    /// Reads events not yet dispatched.
    ///
    /// # Errors
    ///
    /// `EventError::NotReady` outside `Ready`, or the store's error.
    pub async fn get_unprocessed(&self, limit: usize) -> Result<Vec<DomainEvent>, EventError> {
        let (runtime, _guard) = self.ready()?;
        runtime.bus.get_unprocessed(limit).await
    }

    /// Replays a window to local handlers. See [`EventBus::replay`].
    ///
    /// # Errors
    ///
    /// `EventError::NotReady` outside `Ready`, otherwise as
    /// [`EventBus::replay`].
    pub async fn replay(&self, request: &ReplayRequest) -> Result<ReplayReport, EventError> {
        let (runtime, _guard) = self.ready()?;
        runtime.bus.replay(request).await
    }

    /// Re-sends unprocessed events. See [`EventBus::redeliver_unprocessed`].
    ///
    /// # Errors
    ///
    /// `EventError::NotReady` outside `Ready`, or the store's error.
    pub async fn redeliver_unprocessed(&self, limit: usize) -> Result<RedeliveryReport, EventError> {
        let (runtime, _guard) = self.ready()?;
        runtime.bus.redeliver_unprocessed(limit).await
    }

    /// Snapshot of lifecycle, backend health and event counts. Never fails;
    /// unreachable backends are reported as unhealthy.
    pub async fn status(&self) -> CoordinatorStatus {
        let (state, runtime) = {
            let lifecycle = self.lifecycle.read().unwrap_or_else(PoisonError::into_inner);
            (lifecycle.state, lifecycle.runtime.clone())
        };

        let Some(runtime) = runtime else {
            let down = Health::Unhealthy(format!("coordinator is {state}"));
            return CoordinatorStatus {
                state,
                instance_id: None,
                node_id: self.config.node_id.clone(),
                store: down.clone(),
                publisher: down,
                registered_event_types: 0,
                registered_handlers: 0,
                pending: 0,
                failed: 0,
            };
        };

        let bus = &runtime.bus;
        let (store, publisher, counts) = tokio::join!(
            bus.store().health_check(),
            bus.publisher().health_check(),
            bus.store().status_counts()
        );
        let counts = counts.unwrap_or_else(|e| {
            warn!(error = %e, "status counts unavailable");
            StatusCounts::default()
        });

        CoordinatorStatus {
            state,
            instance_id: Some(runtime.instance_id),
            node_id: self.config.node_id.clone(),
            store,
            publisher,
            registered_event_types: bus.registry().event_type_count(),
            registered_handlers: bus.registry().handler_count(),
            pending: counts.pending,
            failed: counts.failed,
        }
    }

    fn ready(&self) -> Result<(Arc<Runtime>, InFlightGuard), EventError> {
        let lifecycle = self.lifecycle.read().unwrap_or_else(PoisonError::into_inner);
        match (&lifecycle.runtime, lifecycle.state) {
            (Some(runtime), CoordinatorState::Ready) => {
                Ok((Arc::clone(runtime), runtime.in_flight.enter()))
            }
            (_, state) => Err(EventError::NotReady {
                state: state.to_string(),
            }),
        }
    }

    fn set_state(&self, state: CoordinatorState) {
        self.lifecycle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .state = state;
    }
}

impl std::fmt::Debug for EventDrivenCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDrivenCoordinator")
            .field("node_id", &self.config.node_id)
            .field("state", &self.state())
            .field("middleware", &self.middleware)
            .finish_non_exhaustive()
    }
}

struct RemoteListener {
    bus: Arc<EventBus>,
    in_flight: Arc<InFlight>,
}

#[async_trait]
impl TransportListener for RemoteListener {
    async fn on_envelope(&self, envelope: TransportEnvelope) {
        let _guard = self.in_flight.enter();
        self.bus.consume_remote(envelope).await;
    }
}
