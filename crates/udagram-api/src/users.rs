use axum::{
    Extension, Json,
    extract::{Multipart, State},
};
use tracing::{error, info, warn};
use uuid::Uuid;

use udagram_db::models::UserRow;
use udagram_db::now_timestamp;
use udagram_types::api::UpdateProfileRequest;
use udagram_types::events::{USER_UPDATED, UserUpdated};
use udagram_types::models::{PublicUser, UserProfile};

use crate::auth::validate_name;
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiPath};
use crate::feed_service::parse_timestamp;
use crate::middleware::Claims;
use crate::state::UserState;
use crate::upload::read_image_form;

const AVATAR_FOLDER: &str = "avatars";

pub async fn get_me(
    State(state): State<UserState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UserProfile>> {
    let user = load_user(&state, claims.sub)?;
    Ok(Json(profile_from_row(user)?))
}

/// PATCH /users/me. Omitted fields are kept; an empty `avatarUrl` clears the
/// avatar. A URL set here is never treated as a stored object.
pub async fn update_me(
    State(state): State<UserState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<UpdateProfileRequest>,
) -> ApiResult<Json<UserProfile>> {
    let current = load_user(&state, claims.sub)?;

    let name = match req.name.as_deref() {
        Some(name) => validate_name(name)?,
        None => current.name.clone(),
    };
    let avatar = match req.avatar_url {
        Some(url) if url.trim().is_empty() => None,
        Some(url) => Some(url.trim().to_string()),
        None => current.avatar.clone(),
    };
    let avatar_changed = avatar != current.avatar;
    let avatar_key = if avatar_changed {
        None
    } else {
        current.avatar_key.clone()
    };

    let updated = state
        .db
        .update_user_profile(
            &current.id,
            &name,
            avatar.as_deref(),
            avatar_key.as_deref(),
            &now_timestamp(),
        )?
        .ok_or(ApiError::UserNotFound)?;

    if avatar_changed {
        release_avatar(&state, current.avatar_key.as_deref()).await;
    }
    publish_user_updated(&state, &updated).await;
    Ok(Json(profile_from_row(updated)?))
}

/// PUT /users/me/avatar: multipart with a single `file` image part.
pub async fn upload_avatar(
    State(state): State<UserState>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> ApiResult<Json<UserProfile>> {
    let current = load_user(&state, claims.sub)?;
    let form = read_image_form(multipart).await?;
    let image = form
        .file
        .ok_or_else(|| ApiError::Validation("Missing file part".into()))?;

    let object = state
        .storage
        .upload(&state.avatar_bucket, image.into_upload(AVATAR_FOLDER))
        .await?;

    let updated = match state.db.update_user_profile(
        &current.id,
        &current.name,
        Some(&object.url),
        Some(&object.key),
        &now_timestamp(),
    ) {
        Ok(Some(row)) => row,
        result => {
            if let Err(e) = state.storage.delete_file(&state.avatar_bucket, &object.key).await {
                error!("Compensating delete of avatar {} failed: {:#}", object.key, e);
            }
            return Err(match result {
                Err(e) => ApiError::Internal(e),
                _ => ApiError::UserNotFound,
            });
        }
    };
    info!("User {} uploaded avatar {}", current.id, object.key);

    release_avatar(&state, current.avatar_key.as_deref()).await;

    publish_user_updated(&state, &updated).await;
    Ok(Json(profile_from_row(updated)?))
}

/// GET /internal/users/{id}: service-to-service lookup.
pub async fn get_user_internal(
    State(state): State<UserState>,
    ApiPath(user_id): ApiPath<Uuid>,
) -> ApiResult<Json<PublicUser>> {
    let user = load_user(&state, user_id)?;
    Ok(Json(PublicUser {
        id: user_id,
        name: user.name,
        avatar_url: user.avatar,
    }))
}

fn load_user(state: &UserState, user_id: Uuid) -> ApiResult<UserRow> {
    state
        .db
        .get_user_by_id(&user_id.to_string())?
        .ok_or(ApiError::UserNotFound)
}

/// Best-effort delete of an avatar object this service uploaded.
async fn release_avatar(state: &UserState, key: Option<&str>) {
    let Some(key) = key.filter(|k| !k.is_empty()) else {
        return;
    };
    if let Err(e) = state.storage.delete_file(&state.avatar_bucket, key).await {
        warn!("Failed to remove previous avatar {}: {:#}", key, e);
    }
}

/// Feed rows carry copies of name and avatar; tell the feed service.
async fn publish_user_updated(state: &UserState, user: &UserRow) {
    let Ok(id) = user.id.parse::<Uuid>() else {
        warn!("Not publishing {} for malformed user id {}", USER_UPDATED, user.id);
        return;
    };
    let payload = UserUpdated {
        id,
        name: user.name.clone(),
        avatar_url: user.avatar.clone(),
    };
    state.events.publish_best_effort(USER_UPDATED, &payload).await;
}

pub(crate) fn profile_from_row(row: UserRow) -> anyhow::Result<UserProfile> {
    Ok(UserProfile {
        id: row.id.parse()?,
        name: row.name,
        email: row.email,
        avatar_url: row.avatar,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
    })
}
