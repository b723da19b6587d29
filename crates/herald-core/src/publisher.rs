//! Pub/sub transport abstraction.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EventError;
use crate::event::DomainEvent;
use crate::status::Health;

/// Subscription topic matching every event type.
pub const ALL_TOPICS: &str = "*";

/// Returns the transport topic for `event_type` under `prefix`.
#[must_use]
pub fn topic_for(prefix: &str, event_type: &str) -> String {
    format!("{prefix}.{event_type}")
}

/// Wire message carried by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportEnvelope {
    /// Node that broadcast the event.
    pub source_node: String,
    /// When the envelope was sent.
    pub sent_at: DateTime<Utc>,
    /// The recorded event.
    pub event: DomainEvent,
}

/// Acknowledgement from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    /// Number of messages handed to the transport.
    pub messages: usize,
}

/// Receives envelopes delivered by a subscription.
#[async_trait]
pub trait TransportListener: Send + Sync {
    /// Called once per delivered envelope, in topic order.
    async fn on_envelope(&self, envelope: TransportEnvelope);
}

/// Live subscription. Dropping the handle cancels it.
pub struct SubscriptionHandle {
    id: Uuid,
    topic: String,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl SubscriptionHandle {
    /// Creates a handle that runs `cancel` when the subscription ends.
    pub fn new(topic: impl Into<String>, cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Subscription identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The subscribed topic (an event type or [`ALL_TOPICS`]).
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Ends the subscription.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

/// Broadcasts recorded events to a topic-based transport.
///
/// Delivery is at-least-once and order is preserved within a topic.
/// Unavailability is reported as `EventError::Transport`.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one event on the topic for its type.
    async fn publish(&self, event: &DomainEvent) -> Result<PublishAck, EventError>;

    /// Publishes events in order, stopping at the first failure.
    async fn publish_batch(&self, events: &[DomainEvent]) -> Result<PublishAck, EventError> {
        let mut messages = 0;
        for event in events {
            messages += self.publish(event).await?.messages;
        }
        Ok(PublishAck { messages })
    }

    /// Subscribes `listener` to an event type, or to [`ALL_TOPICS`].
    async fn subscribe(
        &self,
        topic: &str,
        listener: Arc<dyn TransportListener>,
    ) -> Result<SubscriptionHandle, EventError>;

    /// Reports transport connectivity.
    async fn health_check(&self) -> Health;

    /// Releases the transport connection.
    async fn close(&self) {}
}
