//! Publishing API used by business code to enqueue messages.

use async_trait::async_trait;

use crate::message::{NewOutboxMessage, OutboxId};
use crate::store::OutboxStore;
use crate::Result;

/// The capability to enqueue a message on a topic.
///
/// Consumers of this trait (the saga orchestrator, business services) only
/// learn that the message is durably queued; delivery happens later.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, topic: &str, payload: serde_json::Value) -> Result<OutboxId>;
}

/// Enqueues messages into an [`OutboxStore`].
///
/// Never talks to the network: after a call returns, a PENDING row exists
/// and the outbox worker owns its delivery.
#[derive(Clone)]
pub struct OutboxPublisher<S: OutboxStore> {
    store: S,
}

impl<S: OutboxStore> OutboxPublisher<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Inserts a PENDING row for `topic` and returns its id.
    #[tracing::instrument(skip(self, payload))]
    pub async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<OutboxId> {
        self.publish_message(NewOutboxMessage::new(topic, payload))
            .await
    }

    /// Like [`publish`](Self::publish) but also records an event type.
    #[tracing::instrument(skip(self, payload))]
    pub async fn publish_event(
        &self,
        topic: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<OutboxId> {
        self.publish_message(NewOutboxMessage::new(topic, payload).with_event_type(event_type))
            .await
    }

    /// Inserts one PENDING row per payload, returning ids in input order.
    #[tracing::instrument(skip(self, payloads), fields(count = payloads.len()))]
    pub async fn publish_batch(
        &self,
        topic: &str,
        payloads: Vec<serde_json::Value>,
    ) -> Result<Vec<OutboxId>> {
        let messages = payloads
            .into_iter()
            .map(|payload| NewOutboxMessage::new(topic, payload))
            .collect();
        let ids = self.store.insert_batch(messages).await?;

        metrics::counter!("outbox_messages_published_total", "topic" => topic.to_string())
            .increment(ids.len() as u64);
        tracing::info!(count = ids.len(), topic, "enqueued outbox batch");
        Ok(ids)
    }

    async fn publish_message(&self, message: NewOutboxMessage) -> Result<OutboxId> {
        let topic = message.topic.clone();
        let id = self.store.insert(message).await?;

        metrics::counter!("outbox_messages_published_total", "topic" => topic.clone())
            .increment(1);
        tracing::info!(%id, %topic, "enqueued outbox message");
        Ok(id)
    }
}

#[async_trait]
impl<S: OutboxStore> MessageSink for OutboxPublisher<S> {
    async fn send(&self, topic: &str, payload: serde_json::Value) -> Result<OutboxId> {
        self.publish(topic, payload).await
    }
}
