use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use udagram_db::models::{RefreshTokenRow, UserRow};
use udagram_db::now_timestamp;
use udagram_types::api::{
    AuthResponse, RefreshRequest, SigninRequest, SignoutRequest, SignupRequest, TokenPair,
};

use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::state::UserState;
use crate::users::profile_from_row;

const MIN_PASSWORD_LEN: usize = 8;
const MAX_NAME_LEN: usize = 64;

pub async fn signup(
    State(state): State<UserState>,
    ApiJson(req): ApiJson<SignupRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = validate_name(&req.name)?;
    let email = normalize_email(&req.email)?;
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    if state.db.get_user_by_email(&email)?.is_some() {
        return Err(ApiError::EmailTaken);
    }

    let password = req.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password)).await??;

    let now = now_timestamp();
    let user = UserRow {
        id: Uuid::new_v4().to_string(),
        name,
        email,
        password: password_hash,
        avatar: None,
        avatar_key: None,
        created_at: now.clone(),
        updated_at: now,
    };
    // The unique index still guards against a concurrent signup.
    state.db.create_user(&user).map_err(|e| {
        if state.db.get_user_by_email(&user.email).ok().flatten().is_some() {
            ApiError::EmailTaken
        } else {
            ApiError::Internal(e)
        }
    })?;

    let tokens = start_session(&state, &user)?;
    info!("User {} signed up", user.id);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            tokens,
            user: profile_from_row(user)?,
        }),
    ))
}

pub async fn signin(
    State(state): State<UserState>,
    ApiJson(req): ApiJson<SigninRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let email = req.email.trim().to_lowercase();
    let user = state
        .db
        .get_user_by_email(&email)?
        .ok_or(ApiError::InvalidCredentials)?;

    let stored = user.password.clone();
    let password = req.password;
    let matches = tokio::task::spawn_blocking(move || verify_password(&password, &stored)).await??;
    if !matches {
        return Err(ApiError::InvalidCredentials);
    }

    let tokens = start_session(&state, &user)?;
    info!("User {} signed in", user.id);

    Ok(Json(AuthResponse {
        tokens,
        user: profile_from_row(user)?,
    }))
}

/// Rotate a refresh token: the presented token is consumed and a new pair is
/// issued.
pub async fn refresh(
    State(state): State<UserState>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> ApiResult<Json<TokenPair>> {
    let digest = crate::tokens::refresh_digest(&req.refresh_token);
    let record = state
        .db
        .consume_refresh_token(&digest, Utc::now().timestamp())?
        .ok_or(ApiError::InvalidRefreshToken)?;

    let user = state
        .db
        .get_user_by_id(&record.user_id)?
        .ok_or(ApiError::InvalidRefreshToken)?;

    Ok(Json(start_session(&state, &user)?))
}

pub async fn signout(
    State(state): State<UserState>,
    ApiJson(req): ApiJson<SignoutRequest>,
) -> ApiResult<StatusCode> {
    let digest = crate::tokens::refresh_digest(&req.refresh_token);
    if state.db.delete_refresh_token(&digest)? {
        info!("Refresh token revoked");
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Argon2id PHC string. CPU-heavy; call from `spawn_blocking`.
fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, stored_hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| anyhow::anyhow!("stored password hash is unreadable: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Issue a token pair for `user` and persist the refresh-token record.
fn start_session(state: &UserState, user: &UserRow) -> ApiResult<TokenPair> {
    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("bad user id {}: {}", user.id, e))?;
    let issued = state.tokens.issue(user_id, &user.email)?;

    state.db.insert_refresh_token(&RefreshTokenRow {
        token: issued.refresh_digest,
        user_id: user.id.clone(),
        expires_at: issued.pair.refresh_token_expiry,
    })?;

    Ok(issued.pair)
}

pub(crate) fn validate_name(name: &str) -> ApiResult<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::Validation(format!(
            "Name must be 1 to {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

fn normalize_email(email: &str) -> ApiResult<String> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid {
        return Err(ApiError::Validation("Email address is invalid".into()));
    }
    Ok(email)
}
