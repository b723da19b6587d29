//! Tokio broadcast transport.
//!
//! Single-node transport: every subscriber in the process receives every
//! envelope published after it subscribed. Nothing is persisted; a slow
//! subscriber that falls behind the channel capacity loses the oldest
//! envelopes and logs a warning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use herald_core::error::EventError;
use herald_core::event::DomainEvent;
use herald_core::publisher::{
    ALL_TOPICS, EventPublisher, PublishAck, SubscriptionHandle, TransportEnvelope,
    TransportListener,
};
use herald_core::status::Health;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Default channel capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

/// In-process publisher over a tokio broadcast channel.
#[derive(Clone)]
pub struct BroadcastPublisher {
    node_id: String,
    sender: broadcast::Sender<TransportEnvelope>,
    capacity: usize,
    tasks: Arc<Mutex<Vec<AbortHandle>>>,
    closed: Arc<AtomicBool>,
}

impl BroadcastPublisher {
    /// Creates a publisher with the default capacity.
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self::with_capacity(node_id, DEFAULT_CAPACITY)
    }

    /// Creates a publisher buffering at most `capacity` envelopes per
    /// subscriber.
    #[must_use]
    pub fn with_capacity(node_id: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            node_id: node_id.into(),
            sender,
            capacity,
            tasks: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn ensure_open(&self) -> Result<(), EventError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(EventError::Transport("broadcast publisher is closed".into()))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for BroadcastPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastPublisher")
            .field("node_id", &self.node_id)
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<PublishAck, EventError> {
        self.ensure_open()?;
        let envelope = TransportEnvelope {
            source_node: self.node_id.clone(),
            sent_at: Utc::now(),
            event: event.clone(),
        };
        match self.sender.send(envelope) {
            Ok(count) => debug!(event_id = %event.event_id(), subscribers = count, "published event"),
            Err(_) => debug!(event_id = %event.event_id(), "published event but no subscribers"),
        }
        Ok(PublishAck { messages: 1 })
    }

    async fn subscribe(
        &self,
        topic: &str,
        listener: Arc<dyn TransportListener>,
    ) -> Result<SubscriptionHandle, EventError> {
        self.ensure_open()?;
        let mut receiver = self.sender.subscribe();
        let wanted = topic.to_owned();

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) => {
                        if wanted == ALL_TOPICS || wanted == envelope.event.event_type() {
                            listener.on_envelope(envelope).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(topic = %wanted, skipped = n, "subscriber lagged, envelopes dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let abort = task.abort_handle();
        self.tasks
            .lock()
            .map_err(|_| EventError::Transport("subscription registry poisoned".into()))?
            .push(abort.clone());
        Ok(SubscriptionHandle::new(topic, move || abort.abort()))
    }

    async fn health_check(&self) -> Health {
        if self.closed.load(Ordering::SeqCst) {
            Health::Unhealthy("broadcast publisher is closed".into())
        } else {
            Health::Healthy
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}
