//! Cross-service events: topics fan out to queues, queues are long-polled.

pub mod bus;
pub mod consumer;
pub mod publisher;

use std::time::Duration;

use async_trait::async_trait;

pub use bus::{BusConfig, SqliteBus};
pub use consumer::{BatchReport, ConsumerConfig, EventHandler, QueueConsumer};
pub use publisher::EventPublisher;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("queue transport error: {0}")]
    Transport(#[from] anyhow::Error),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A message handed out by [`QueueClient::receive`]. It stays hidden from
/// other receivers until its visibility timeout runs out or it is deleted
/// with `receipt_handle`.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub receive_count: u32,
}

#[async_trait]
pub trait TopicPublisher: Send + Sync {
    /// Deliver `message` to every queue subscribed to `topic`. Returns the
    /// notification id.
    async fn publish(&self, topic: &str, message: String) -> Result<String, BusError>;
}

#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Long-poll: wait up to `wait` for at least one message, return at most
    /// `max_messages`.
    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BusError>;

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), BusError>;
}
