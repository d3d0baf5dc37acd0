pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod feed_service;
pub mod feeds;
pub mod middleware;
pub mod propagation;
pub mod routes;
pub mod state;
pub mod tokens;
pub mod upload;
pub mod user_client;
pub mod users;

pub use error::{ApiError, ApiResult};
pub use routes::{feed_router, user_router};
