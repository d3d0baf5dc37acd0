//! Database row types. These map directly to SQLite rows.
//! Distinct from udagram-types API models to keep the DB layer independent.

#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub avatar: Option<String>,
    /// Object key of `avatar` when it was uploaded to the avatar bucket.
    /// `None` for URLs the user set directly.
    pub avatar_key: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshTokenRow {
    pub token: String,
    pub user_id: String,
    /// Epoch seconds.
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedRow {
    pub id: String,
    pub caption: String,
    pub image_url: String,
    pub user_id: String,
    pub user_name: String,
    pub user_avatar: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}
