use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use udagram_events::EventHandler;
use udagram_types::events::{EventMessage, USER_UPDATED, UserUpdated};

use crate::feed_service::{FeedService, UserInfo};

/// Copies profile changes onto the author fields of the user's feeds.
pub struct UserUpdatedHandler {
    feeds: Arc<FeedService>,
}

impl UserUpdatedHandler {
    pub fn new(feeds: Arc<FeedService>) -> Self {
        Self { feeds }
    }
}

#[async_trait]
impl EventHandler for UserUpdatedHandler {
    async fn handle(&self, event: EventMessage) -> anyhow::Result<()> {
        if event.event_type != USER_UPDATED {
            debug!("Ignoring {} event", event.event_type);
            return Ok(());
        }

        let user: UserUpdated = serde_json::from_value(event.data)?;
        self.feeds
            .update_user_info(
                user.id,
                UserInfo {
                    name: user.name,
                    avatar: user.avatar_url,
                },
            )
            .await?;
        Ok(())
    }
}
