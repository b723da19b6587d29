//! Redis pub/sub transport.
//!
//! Each event type maps to one channel, `<prefix>.<event_type>`. Envelopes
//! travel as JSON. A wildcard subscription uses a pattern subscription over
//! the prefix.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use herald_core::error::EventError;
use herald_core::event::DomainEvent;
use herald_core::publisher::{
    ALL_TOPICS, EventPublisher, PublishAck, SubscriptionHandle, TransportEnvelope,
    TransportListener, topic_for,
};
use herald_core::status::Health;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Default channel prefix.
pub const DEFAULT_CHANNEL_PREFIX: &str = "herald";

/// Publisher over Redis pub/sub.
pub struct RedisPublisher {
    client: Client,
    node_id: String,
    prefix: String,
    connection: tokio::sync::Mutex<Option<MultiplexedConnection>>,
    tasks: Mutex<Vec<AbortHandle>>,
    closed: AtomicBool,
}

impl RedisPublisher {
    /// Creates a publisher for the Redis server at `url`. No connection is
    /// made until first use.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Transport` if `url` is not a valid Redis URL.
    pub fn new(url: &str, node_id: impl Into<String>) -> Result<Self, EventError> {
        let client = Client::open(url)
            .map_err(|e| EventError::Transport(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            node_id: node_id.into(),
            prefix: DEFAULT_CHANNEL_PREFIX.to_owned(),
            connection: tokio::sync::Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Overrides the channel prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Channel name for `event_type`.
    #[must_use]
    pub fn channel(&self, event_type: &str) -> String {
        topic_for(&self.prefix, event_type)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, EventError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EventError::Transport("redis publisher is closed".into()));
        }
        let mut cached = self.connection.lock().await;
        if let Some(conn) = cached.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(transport)?;
        info!("connected to redis");
        *cached = Some(conn.clone());
        Ok(conn)
    }

    async fn forget_connection(&self) {
        self.connection.lock().await.take();
    }
}

impl std::fmt::Debug for RedisPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPublisher")
            .field("node_id", &self.node_id)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<PublishAck, EventError> {
        let envelope = TransportEnvelope {
            source_node: self.node_id.clone(),
            sent_at: Utc::now(),
            event: event.clone(),
        };
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| EventError::Transport(format!("envelope encoding failed: {e}")))?;
        let channel = self.channel(event.event_type());

        let mut conn = self.connection().await?;
        let delivered: Result<i64, _> = conn.publish(&channel, payload).await;
        match delivered {
            Ok(receivers) => {
                debug!(event_id = %event.event_id(), %channel, receivers, "published event");
                Ok(PublishAck { messages: 1 })
            }
            Err(e) => {
                self.forget_connection().await;
                Err(transport(e))
            }
        }
    }

    async fn subscribe(
        &self,
        topic: &str,
        listener: Arc<dyn TransportListener>,
    ) -> Result<SubscriptionHandle, EventError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EventError::Transport("redis publisher is closed".into()));
        }
        let mut pubsub = self.client.get_async_pubsub().await.map_err(transport)?;
        if topic == ALL_TOPICS {
            pubsub
                .psubscribe(format!("{}.*", self.prefix))
                .await
                .map_err(transport)?;
        } else {
            pubsub
                .subscribe(self.channel(topic))
                .await
                .map_err(transport)?;
        }

        let task = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(channel = msg.get_channel_name(), error = %e, "unreadable message");
                        continue;
                    }
                };
                match serde_json::from_str::<TransportEnvelope>(&payload) {
                    Ok(envelope) => listener.on_envelope(envelope).await,
                    Err(e) => {
                        warn!(channel = msg.get_channel_name(), error = %e, "malformed envelope");
                    }
                }
            }
            debug!("redis subscription stream ended");
        });

        let abort = task.abort_handle();
        self.tasks
            .lock()
            .map_err(|_| EventError::Transport("subscription registry poisoned".into()))?
            .push(abort.clone());
        Ok(SubscriptionHandle::new(topic, move || abort.abort()))
    }

    async fn health_check(&self) -> Health {
        let mut conn = match self.connection().await {
            Ok(conn) => conn,
            Err(e) => return Health::Unhealthy(e.to_string()),
        };
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        match pong {
            Ok(_) => Health::Healthy,
            Err(e) => {
                self.forget_connection().await;
                Health::Unhealthy(e.to_string())
            }
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.forget_connection().await;
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

fn transport(e: redis::RedisError) -> EventError {
    EventError::Transport(e.to_string())
}
