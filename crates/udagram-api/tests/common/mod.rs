#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response, header};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use udagram_api::feed_service::{FeedService, SqliteFeedRepository, UserDirectory};
use udagram_api::routes::{feed_router, user_router};
use udagram_api::state::{FeedState, FeedStateInner, UserState, UserStateInner};
use udagram_api::tokens::{JwtKeys, TokenIssuer};
use udagram_api::user_client::INTERNAL_TOKEN_HEADER;
use udagram_db::Database;
use udagram_events::{BusConfig, EventPublisher, SqliteBus};
use udagram_storage::DiskObjectStore;
use udagram_types::models::PublicUser;

pub const JWT_SECRET: &str = "integration-test-jwt-secret";
pub const INTERNAL_TOKEN: &str = "integration-test-internal-token";
pub const USER_TOPIC: &str = "user-events";
pub const FEED_QUEUE: &str = "feed-user-updates";

pub fn temp_path(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}_{}", prefix, Uuid::new_v4()))
}

pub fn test_keys() -> Arc<JwtKeys> {
    Arc::new(JwtKeys::new(JWT_SECRET))
}

/// Access token for `user_id` signed with the shared test secret.
pub fn access_token_for(user_id: Uuid) -> String {
    TokenIssuer::new(test_keys(), 900, 3600)
        .issue(user_id, "someone@example.com")
        .unwrap()
        .pair
        .access_token
}

// ── User service ────────────────────────────────────────────────────────

pub struct UserApp {
    pub router: Router,
    pub state: UserState,
    /// The bus the service publishes to, with `FEED_QUEUE` subscribed.
    pub bus: SqliteBus,
}

pub async fn user_app() -> UserApp {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let storage_dir = temp_path("udagram_user_objects");
    let storage = Arc::new(
        DiskObjectStore::new(storage_dir.clone(), "http://localhost:8081/objects")
            .await
            .unwrap(),
    );
    let bus = SqliteBus::open(&temp_path("udagram_user_bus"), BusConfig::default()).unwrap();
    bus.subscribe(USER_TOPIC, FEED_QUEUE).await.unwrap();

    let state: UserState = Arc::new(UserStateInner {
        db,
        tokens: TokenIssuer::new(test_keys(), 900, 3600),
        storage,
        avatar_bucket: "avatars".into(),
        storage_dir,
        events: EventPublisher::new(Arc::new(bus.clone()), USER_TOPIC),
        internal_token: Arc::from(INTERNAL_TOKEN),
    });

    UserApp {
        router: user_router(state.clone()),
        state,
        bus,
    }
}

// ── Feed service ────────────────────────────────────────────────────────

pub struct FeedApp {
    pub router: Router,
    pub state: FeedState,
    pub db: Arc<Database>,
    pub storage_dir: PathBuf,
}

pub async fn feed_app(users: Arc<dyn UserDirectory>) -> FeedApp {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let storage_dir = temp_path("udagram_feed_objects");
    let storage = Arc::new(
        DiskObjectStore::new(storage_dir.clone(), "http://localhost:8082/objects")
            .await
            .unwrap(),
    );
    let feeds = Arc::new(FeedService::new(
        Arc::new(SqliteFeedRepository::new(db.clone())),
        storage,
        users,
        "feeds",
    ));

    let state: FeedState = Arc::new(FeedStateInner {
        feeds,
        keys: test_keys(),
        storage_dir: storage_dir.clone(),
    });

    FeedApp {
        router: feed_router(state.clone()),
        state,
        db,
        storage_dir,
    }
}

/// In-memory [`UserDirectory`].
#[derive(Default)]
pub struct StubUsers {
    users: Mutex<HashMap<Uuid, PublicUser>>,
}

impl StubUsers {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(users: impl IntoIterator<Item = PublicUser>) -> Arc<Self> {
        let stub = Self::default();
        stub.users
            .lock()
            .unwrap()
            .extend(users.into_iter().map(|u| (u.id, u)));
        Arc::new(stub)
    }
}

#[async_trait]
impl UserDirectory for StubUsers {
    async fn get_user_by_id(&self, id: Uuid) -> anyhow::Result<Option<PublicUser>> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }
}

pub fn public_user(name: &str) -> PublicUser {
    PublicUser {
        id: Uuid::new_v4(),
        name: name.into(),
        avatar_url: Some(format!("http://localhost:8081/objects/avatars/{}.png", name)),
    }
}

// ── Requests ────────────────────────────────────────────────────────────

pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

pub fn json_request(method: Method, uri: &str, bearer: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn internal_request(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(INTERNAL_TOKEN_HEADER, token)
        .body(Body::empty())
        .unwrap()
}

/// A file part for [`multipart_request`].
pub struct FilePart<'a> {
    pub file_name: &'a str,
    pub mime_type: &'a str,
    pub bytes: &'a [u8],
}

pub fn png_part(bytes: &[u8]) -> FilePart<'_> {
    FilePart {
        file_name: "photo.png",
        mime_type: "image/png",
        bytes,
    }
}

pub fn multipart_request(
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    fields: &[(&str, &str)],
    file: Option<FilePart<'_>>,
) -> Request<Body> {
    const BOUNDARY: &str = "udagram-test-boundary";

    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(file) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                file.file_name, file.mime_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(file.bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let mut builder = Request::builder().method(method).uri(uri).header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={BOUNDARY}"),
    );
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body)).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
