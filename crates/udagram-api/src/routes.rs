use axum::http::{
    Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::middleware::{require_auth, require_internal_token};
use crate::state::{FeedState, UserState};
use crate::upload::MAX_IMAGE_SIZE;
use crate::{auth, feeds, users};

/// Multipart framing on top of the image itself.
const BODY_LIMIT: usize = MAX_IMAGE_SIZE + 64 * 1024;

pub fn user_router(state: UserState) -> Router {
    let keys = state.tokens.keys();

    let protected = Router::new()
        .route("/users/me", get(users::get_me).patch(users::update_me))
        .route("/users/me/avatar", put(users::upload_avatar))
        .layer(middleware::from_fn_with_state(keys, require_auth));

    let internal = Router::new()
        .route("/internal/users/{id}", get(users::get_user_internal))
        .layer(middleware::from_fn_with_state(
            state.internal_token.clone(),
            require_internal_token,
        ));

    Router::new()
        .route("/signup", post(auth::signup))
        .route("/signin", post(auth::signin))
        .route("/refresh", post(auth::refresh))
        .route("/signout", delete(auth::signout))
        .route("/health", get(health))
        .merge(protected)
        .merge(internal)
        .nest_service("/objects", ServeDir::new(&state.storage_dir))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn feed_router(state: FeedState) -> Router {
    let protected = Router::new()
        .route("/feeds", post(feeds::create_feed))
        .route("/feeds/{id}", delete(feeds::delete_feed))
        .layer(middleware::from_fn_with_state(
            state.keys.clone(),
            require_auth,
        ));

    Router::new()
        .route("/feeds", get(feeds::list_feeds))
        .route("/feeds/{id}", get(feeds::get_feed))
        .route("/health", get(health))
        .merge(protected)
        .nest_service("/objects", ServeDir::new(&state.storage_dir))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Browser clients call both services directly.
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(false)
}

async fn health() -> &'static str {
    "ok"
}
