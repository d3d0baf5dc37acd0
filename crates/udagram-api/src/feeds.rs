use axum::{
    Extension, Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use udagram_types::api::{FeedCursor, FeedPage};
use udagram_types::models::Feed;

use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiPath, ApiQuery};
use crate::feed_service::DEFAULT_PAGE_SIZE;
use crate::middleware::Claims;
use crate::state::FeedState;
use crate::upload::read_image_form;

const FEED_FOLDER: &str = "feeds";
const MAX_CAPTION_LEN: usize = 2200;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub before: Option<FeedCursor>,
}

pub async fn list_feeds(
    State(state): State<FeedState>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Json<FeedPage>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    Ok(Json(state.feeds.list(limit, query.before).await?))
}

pub async fn get_feed(
    State(state): State<FeedState>,
    ApiPath(feed_id): ApiPath<Uuid>,
) -> ApiResult<Json<Feed>> {
    Ok(Json(state.feeds.get(feed_id).await?))
}

/// POST /feeds: multipart with a `caption` text field and a `file` image.
pub async fn create_feed(
    State(state): State<FeedState>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut form = read_image_form(multipart).await?;

    let caption = form
        .fields
        .remove("caption")
        .map(|c| c.trim().to_string())
        .unwrap_or_default();
    if caption.is_empty() {
        return Err(ApiError::Validation("Caption is required".into()));
    }
    if caption.chars().count() > MAX_CAPTION_LEN {
        return Err(ApiError::Validation(format!(
            "Caption must be at most {} characters",
            MAX_CAPTION_LEN
        )));
    }
    let image = form
        .file
        .ok_or_else(|| ApiError::Validation("Missing file part".into()))?;

    let feed = state
        .feeds
        .create(claims.sub, caption, image.into_upload(FEED_FOLDER))
        .await?;

    Ok((StatusCode::CREATED, Json(feed)))
}

pub async fn delete_feed(
    State(state): State<FeedState>,
    Extension(claims): Extension<Claims>,
    ApiPath(feed_id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    state.feeds.delete(feed_id, claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}
