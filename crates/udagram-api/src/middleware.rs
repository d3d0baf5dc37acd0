use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::tokens::JwtKeys;
use crate::user_client::INTERNAL_TOKEN_HEADER;

pub use udagram_types::models::Claims;

/// Extract and validate the JWT from the Authorization header; the claims
/// are stored as a request extension.
pub async fn require_auth(
    State(keys): State<Arc<JwtKeys>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized("Missing bearer token"))?;

    let claims = keys
        .verify(token)
        .map_err(|_| ApiError::Unauthorized("Invalid or expired access token"))?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Guard for service-to-service routes.
pub async fn require_internal_token(
    State(expected): State<Arc<str>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = req
        .headers()
        .get(INTERNAL_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());

    match presented {
        Some(token) if token == &*expected => Ok(next.run(req).await),
        _ => Err(ApiError::Unauthorized("Invalid internal token")),
    }
}
