//! Feed operations that span the object store and the feed table.
//!
//! The two stores cannot share a transaction, so `create` compensates a
//! failed insert by deleting the object it just uploaded, and `delete`
//! removes the row first and treats the object delete as best-effort.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use udagram_db::models::FeedRow;
use udagram_db::{Database, now_timestamp};
use udagram_storage::{ObjectStore, UploadRequest};
use udagram_types::api::{FeedCursor, FeedPage};
use udagram_types::models::{Feed, PublicUser};

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("User not found")]
    UserNotFound,

    #[error("Feed not found")]
    NotFound,

    #[error("Feed belongs to another user")]
    Forbidden,

    #[error("user lookup failed: {0:#}")]
    UserLookup(anyhow::Error),

    #[error("object upload failed: {0:#}")]
    Upload(anyhow::Error),

    #[error("feed store failed: {0:#}")]
    Database(anyhow::Error),
}

/// Resolves users owned by the user service.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user_by_id(&self, id: Uuid) -> anyhow::Result<Option<PublicUser>>;
}

#[async_trait]
pub trait FeedRepository: Send + Sync {
    async fn insert(&self, feed: FeedRow) -> anyhow::Result<()>;
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<FeedRow>>;
    async fn list(&self, limit: u32, before: Option<FeedCursor>) -> anyhow::Result<Vec<FeedRow>>;
    /// Returns true if a row was removed.
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
    async fn update_user_info(
        &self,
        user_id: Uuid,
        name: String,
        avatar: Option<String>,
    ) -> anyhow::Result<usize>;
}

/// [`FeedRepository`] over the SQLite feed table.
pub struct SqliteFeedRepository {
    db: Arc<Database>,
}

impl SqliteFeedRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn blocking<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
    }
}

#[async_trait]
impl FeedRepository for SqliteFeedRepository {
    async fn insert(&self, feed: FeedRow) -> anyhow::Result<()> {
        self.blocking(move |db| db.insert_feed(&feed)).await
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<FeedRow>> {
        self.blocking(move |db| db.get_feed(&id.to_string())).await
    }

    async fn list(&self, limit: u32, before: Option<FeedCursor>) -> anyhow::Result<Vec<FeedRow>> {
        let before = before.map(|c| {
            (
                c.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                c.id.to_string(),
            )
        });
        self.blocking(move |db| {
            db.list_feeds(limit, before.as_ref().map(|(t, id)| (t.as_str(), id.as_str())))
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        self.blocking(move |db| db.delete_feed(&id.to_string())).await
    }

    async fn update_user_info(
        &self,
        user_id: Uuid,
        name: String,
        avatar: Option<String>,
    ) -> anyhow::Result<usize> {
        self.blocking(move |db| {
            db.update_feed_user_info(&user_id.to_string(), &name, avatar.as_deref(), &now_timestamp())
        })
        .await
    }
}

/// New values for the denormalized author fields.
#[derive(Debug, Clone, PartialEq)]
pub struct UserInfo {
    pub name: String,
    pub avatar: Option<String>,
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

pub struct FeedService {
    repo: Arc<dyn FeedRepository>,
    storage: Arc<dyn ObjectStore>,
    users: Arc<dyn UserDirectory>,
    bucket: String,
}

impl FeedService {
    pub fn new(
        repo: Arc<dyn FeedRepository>,
        storage: Arc<dyn ObjectStore>,
        users: Arc<dyn UserDirectory>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            storage,
            users,
            bucket: bucket.into(),
        }
    }

    /// Resolve the author, upload the image, insert the row. A failed insert
    /// deletes the uploaded object and surfaces the insert error, even when
    /// that cleanup fails too.
    pub async fn create(
        &self,
        user_id: Uuid,
        caption: String,
        upload: UploadRequest,
    ) -> Result<Feed, FeedError> {
        let user = self
            .users
            .get_user_by_id(user_id)
            .await
            .map_err(FeedError::UserLookup)?
            .ok_or(FeedError::UserNotFound)?;

        let object = self
            .storage
            .upload(&self.bucket, upload)
            .await
            .map_err(FeedError::Upload)?;

        let now = now_timestamp();
        let row = FeedRow {
            id: Uuid::new_v4().to_string(),
            caption,
            image_url: object.url.clone(),
            user_id: user.id.to_string(),
            user_name: user.name,
            user_avatar: user.avatar_url,
            created_at: now.clone(),
            updated_at: now,
        };

        if let Err(insert_err) = self.repo.insert(row.clone()).await {
            error!(
                "Feed insert failed for user {}, removing object {}: {:#}",
                user_id, object.key, insert_err
            );
            if let Err(cleanup_err) = self.storage.delete_file(&self.bucket, &object.key).await {
                error!(
                    "Compensating delete of {}/{} failed: {:#}",
                    self.bucket, object.key, cleanup_err
                );
            }
            return Err(FeedError::Database(insert_err));
        }

        info!("Feed {} created by {}", row.id, user_id);
        feed_from_row(row).map_err(FeedError::Database)
    }

    /// Delete the row, then the image. The image delete never fails the call
    /// and is skipped when the row has no image URL.
    pub async fn delete(&self, feed_id: Uuid, caller: Uuid) -> Result<(), FeedError> {
        let row = self
            .repo
            .get(feed_id)
            .await
            .map_err(FeedError::Database)?
            .ok_or(FeedError::NotFound)?;

        if row.user_id != caller.to_string() {
            return Err(FeedError::Forbidden);
        }

        self.repo.delete(feed_id).await.map_err(FeedError::Database)?;
        info!("Feed {} deleted by {}", feed_id, caller);

        if row.image_url.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.storage.delete_file(&self.bucket, &row.image_url).await {
            warn!("Image cleanup for feed {} failed: {:#}", feed_id, e);
        }
        Ok(())
    }

    pub async fn get(&self, feed_id: Uuid) -> Result<Feed, FeedError> {
        let row = self
            .repo
            .get(feed_id)
            .await
            .map_err(FeedError::Database)?
            .ok_or(FeedError::NotFound)?;
        feed_from_row(row).map_err(FeedError::Database)
    }

    /// Newest first. `before` is the `nextCursor` of the previous page.
    pub async fn list(
        &self,
        limit: u32,
        before: Option<FeedCursor>,
    ) -> Result<FeedPage, FeedError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let rows = self
            .repo
            .list(limit, before)
            .await
            .map_err(FeedError::Database)?;

        let full_page = rows.len() as u32 == limit;
        let items = rows
            .into_iter()
            .map(feed_from_row)
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(FeedError::Database)?;
        let next_cursor = if full_page {
            items.last().map(FeedCursor::after)
        } else {
            None
        };

        Ok(FeedPage { items, next_cursor })
    }

    /// Overwrite the author fields on all of a user's feeds. Pure overwrite
    /// keyed by `user_id`, so replaying the same update is harmless.
    pub async fn update_user_info(&self, user_id: Uuid, info: UserInfo) -> Result<usize, FeedError> {
        let n = self
            .repo
            .update_user_info(user_id, info.name, info.avatar)
            .await
            .map_err(FeedError::Database)?;
        info!("Refreshed author info on {} feed(s) of user {}", n, user_id);
        Ok(n)
    }
}

fn feed_from_row(row: FeedRow) -> anyhow::Result<Feed> {
    Ok(Feed {
        id: row.id.parse().context("feed id")?,
        caption: row.caption,
        image_url: row.image_url,
        user_id: row.user_id.parse().context("feed user_id")?,
        user_name: row.user_name,
        user_avatar: row.user_avatar,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
    })
}

pub(crate) fn parse_timestamp(value: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("bad timestamp {:?}", value))?
        .with_timezone(&Utc))
}
