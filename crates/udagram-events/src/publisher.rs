use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use udagram_types::events::EventMessage;

use crate::{BusError, TopicPublisher};

/// Publishes typed application events to one topic.
#[derive(Clone)]
pub struct EventPublisher {
    transport: Arc<dyn TopicPublisher>,
    topic: String,
}

impl EventPublisher {
    pub fn new(transport: Arc<dyn TopicPublisher>, topic: impl Into<String>) -> Self {
        Self {
            transport,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wrap `payload` as `{eventType, data, timestamp}` and publish it.
    pub async fn publish<T: Serialize + Sync>(
        &self,
        event_type: &str,
        payload: &T,
    ) -> Result<String, BusError> {
        let event = EventMessage::new(event_type, payload)?;
        let body = serde_json::to_string(&event)?;
        let id = self.transport.publish(&self.topic, body).await?;
        debug!("Published {} to {} as {}", event_type, self.topic, id);
        Ok(id)
    }

    /// Like [`EventPublisher::publish`], but failures are logged and dropped.
    /// Used where the event is a side effect of a request that already
    /// succeeded.
    pub async fn publish_best_effort<T: Serialize + Sync>(&self, event_type: &str, payload: &T) {
        if let Err(e) = self.publish(event_type, payload).await {
            warn!("Failed to publish {} to {}: {}", event_type, self.topic, e);
        }
    }
}
