use std::path::PathBuf;
use std::sync::Arc;

use udagram_db::Database;
use udagram_events::EventPublisher;
use udagram_storage::ObjectStore;

use crate::feed_service::FeedService;
use crate::tokens::{JwtKeys, TokenIssuer};

pub type UserState = Arc<UserStateInner>;

pub struct UserStateInner {
    pub db: Arc<Database>,
    pub tokens: TokenIssuer,
    pub storage: Arc<dyn ObjectStore>,
    pub avatar_bucket: String,
    /// Directory served under `/objects`.
    pub storage_dir: PathBuf,
    pub events: EventPublisher,
    pub internal_token: Arc<str>,
}

pub type FeedState = Arc<FeedStateInner>;

pub struct FeedStateInner {
    pub feeds: Arc<FeedService>,
    pub keys: Arc<JwtKeys>,
    /// Directory served under `/objects`.
    pub storage_dir: PathBuf,
}
