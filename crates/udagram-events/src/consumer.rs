use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use udagram_types::events::EventMessage;

use crate::{BusError, QueueClient, ReceivedMessage};

/// Handles one decoded event. Returning `Ok` acknowledges the message (it is
/// deleted from the queue); returning `Err` leaves it for redelivery.
///
/// Delivery is at-least-once, so implementations must be idempotent.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: EventMessage) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue: String,
    /// Long-poll wait per receive call.
    pub wait_time: Duration,
    pub max_messages: usize,
    /// Pause after a failed receive before polling again.
    pub error_backoff: Duration,
}

impl ConsumerConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            wait_time: Duration::from_secs(20),
            max_messages: 10,
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// Outcome of one poll cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub acknowledged: usize,
    pub failed: usize,
}

pub struct QueueConsumer {
    client: Arc<dyn QueueClient>,
    handler: Arc<dyn EventHandler>,
    config: ConsumerConfig,
}

impl QueueConsumer {
    pub fn new(
        client: Arc<dyn QueueClient>,
        handler: Arc<dyn EventHandler>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            client,
            handler,
            config,
        }
    }

    /// Poll until `shutdown` is cancelled. Receive failures back off for
    /// `error_backoff`; handler failures only affect their own message.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Consuming {} (wait {:?}, batch {})",
            self.config.queue, self.config.wait_time, self.config.max_messages
        );

        loop {
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.poll_once() => result,
            };

            if let Err(e) = result {
                error!(
                    "Polling {} failed: {}; retrying in {:?}",
                    self.config.queue, e, self.config.error_backoff
                );
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.error_backoff) => {}
                }
            }
        }

        info!("Consumer for {} stopped", self.config.queue);
    }

    /// One receive call plus sequential processing of everything it returned.
    pub async fn poll_once(&self) -> Result<BatchReport, BusError> {
        let messages = self
            .client
            .receive(&self.config.queue, self.config.max_messages, self.config.wait_time)
            .await?;

        let mut report = BatchReport {
            received: messages.len(),
            ..BatchReport::default()
        };
        for message in messages {
            if self.process(message).await {
                report.acknowledged += 1;
            } else {
                report.failed += 1;
            }
        }
        Ok(report)
    }

    /// Returns true if the message was handled (and a delete was attempted).
    async fn process(&self, message: ReceivedMessage) -> bool {
        let event = match EventMessage::decode(&message.body) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    "Undecodable message {} on {} (attempt {}): {}",
                    message.message_id, self.config.queue, message.receive_count, e
                );
                return false;
            }
        };

        let event_type = event.event_type.clone();
        if let Err(e) = self.handler.handle(event).await {
            error!(
                "Handler failed for {} message {} (attempt {}): {:#}",
                event_type, message.message_id, message.receive_count, e
            );
            return false;
        }

        if let Err(e) = self
            .client
            .delete(&self.config.queue, &message.receipt_handle)
            .await
        {
            // Handled already; the redelivery will be absorbed by idempotency.
            warn!("Failed to delete message {}: {}", message.message_id, e);
        }
        true
    }
}
