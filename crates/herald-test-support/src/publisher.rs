//! Test publisher: an `EventPublisher` double with a switchable outage.

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

type Listeners = Arc<Mutex<Vec<(u64, String, Arc<dyn TransportListener>)>>>;

/// A publisher that records every published event and delivers envelopes
/// to in-process listeners. `set_available(false)` simulates a transport
/// outage.
pub struct RecordingPublisher {
    node_id: String,
    available: AtomicBool,
    published: Mutex<Vec<DomainEvent>>,
    listeners: Listeners,
    next_listener: Mutex<u64>,
}

impl RecordingPublisher {
    /// Creates an available publisher identifying as `node_id`.
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            available: AtomicBool::new(true),
            published: Mutex::new(Vec::new()),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener: Mutex::new(0),
        }
    }

    /// Creates a publisher that is down from the start.
    #[must_use]
    pub fn unavailable(node_id: impl Into<String>) -> Self {
        let publisher = Self::new(node_id);
        publisher.set_available(false);
        publisher
    }

    /// Switches the simulated transport up or down.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns a snapshot of all successfully published events.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn published(&self) -> Vec<DomainEvent> {
        self.published.lock().unwrap().clone()
    }

    /// Delivers an envelope as if it came from another node.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub async fn inject(&self, envelope: TransportEnvelope) {
        let targets: Vec<Arc<dyn TransportListener>> = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, topic, _)| {
                topic == ALL_TOPICS || topic == envelope.event.event_type()
            })
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();
        for listener in targets {
            listener.on_envelope(envelope.clone()).await;
        }
    }

    /// Number of live subscriptions.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<PublishAck, EventError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(EventError::Transport("connection refused".into()));
        }
        self.published.lock().unwrap().push(event.clone());
        self.inject(TransportEnvelope {
            source_node: self.node_id.clone(),
            sent_at: Utc::now(),
            event: event.clone(),
        })
        .await;
        Ok(PublishAck { messages: 1 })
    }

    async fn subscribe(
        &self,
        topic: &str,
        listener: Arc<dyn TransportListener>,
    ) -> Result<SubscriptionHandle, EventError> {
        let id = {
            let mut next = self.next_listener.lock().unwrap();
            *next += 1;
            *next
        };
        self.listeners
            .lock()
            .unwrap()
            .push((id, topic.to_owned(), listener));

        let listeners = Arc::clone(&self.listeners);
        Ok(SubscriptionHandle::new(topic, move || {
            if let Ok(mut guard) = listeners.lock() {
                guard.retain(|(listener_id, _, _)| *listener_id != id);
            }
        }))
    }

    async fn health_check(&self) -> Health {
        if self.available.load(Ordering::SeqCst) {
            Health::Healthy
        } else {
            Health::Unhealthy("connection refused".into())
        }
    }
}
