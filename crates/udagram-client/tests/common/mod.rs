#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use udagram_client::{
    ApiClient, ClientConfig, Clock, ManualClock, MemorySessionStore, Navigator, Session,
};
use udagram_types::api::{
    AuthResponse, ErrorBody, FeedPage, RefreshRequest, SigninRequest, SignoutRequest,
};
use udagram_types::models::{Feed, UserProfile};

pub const PASSWORD: &str = "correct-horse";

/// In-process stand-in for the user and feed services. Access tokens are
/// checked against its own clock, which tests can skew from the client's.
pub struct MockServer {
    pub clock: Arc<ManualClock>,
    pub access_ttl: i64,
    pub refresh_delay: Duration,
    pub reject_refresh: AtomicBool,
    refreshes: AtomicU64,
    tokens: Mutex<Tokens>,
    seen: Mutex<Vec<Option<String>>>,
}

#[derive(Default)]
struct Tokens {
    next: u64,
    access: HashMap<String, i64>,
    refresh: HashSet<String>,
}

impl MockServer {
    pub fn new(clock: Arc<ManualClock>, access_ttl: i64, refresh_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            clock,
            access_ttl,
            refresh_delay,
            reject_refresh: AtomicBool::new(false),
            refreshes: AtomicU64::new(0),
            tokens: Mutex::new(Tokens::default()),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Mint a token pair the server will accept.
    pub fn issue(&self) -> Session {
        let now = self.clock.now().timestamp();
        let mut tokens = self.tokens.lock();
        tokens.next += 1;
        let n = tokens.next;
        let access = format!("access-{n}");
        let refresh = format!("refresh-{n}");
        tokens.access.insert(access.clone(), now + self.access_ttl);
        tokens.refresh.insert(refresh.clone());
        Session {
            access_token: access,
            access_token_expiry: now + self.access_ttl,
            refresh_token: refresh,
            refresh_token_expiry: now + 86_400,
        }
    }

    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Bearer tokens presented to protected endpoints, in arrival order.
    pub fn seen_tokens(&self) -> Vec<Option<String>> {
        self.seen.lock().clone()
    }

    pub fn live_refresh_tokens(&self) -> usize {
        self.tokens.lock().refresh.len()
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string);
        self.seen.lock().push(token.clone());

        let now = self.clock.now().timestamp();
        let valid = token
            .and_then(|t| self.tokens.lock().access.get(&t).copied())
            .is_some_and(|expiry| expiry > now);
        if valid {
            Ok(())
        } else {
            Err(error(StatusCode::UNAUTHORIZED, "Invalid or expired token", "UNAUTHORIZED"))
        }
    }

    pub async fn spawn(self: &Arc<Self>) -> String {
        let app = Router::new()
            .route("/signin", post(signin))
            .route("/refresh", post(refresh))
            .route("/signout", delete(signout))
            .route("/users/me", get(me))
            .route("/feeds", get(list_feeds).post(create_feed))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }
}

fn error(status: StatusCode, message: &str, code: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
            code: code.into(),
        }),
    )
        .into_response()
}

pub fn profile() -> UserProfile {
    UserProfile {
        id: Uuid::nil(),
        name: "Ada".into(),
        email: "ada@example.com".into(),
        avatar_url: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

async fn signin(State(server): State<Arc<MockServer>>, Json(req): Json<SigninRequest>) -> Response {
    if req.password != PASSWORD {
        return error(StatusCode::UNAUTHORIZED, "Invalid email or password", "INVALID_CREDENTIALS");
    }
    Json(AuthResponse {
        tokens: server.issue(),
        user: profile(),
    })
    .into_response()
}

async fn refresh(State(server): State<Arc<MockServer>>, Json(req): Json<RefreshRequest>) -> Response {
    server.refreshes.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(server.refresh_delay).await;

    let known = server.tokens.lock().refresh.remove(&req.refresh_token);
    if !known || server.reject_refresh.load(Ordering::SeqCst) {
        return error(StatusCode::UNAUTHORIZED, "Invalid refresh token", "INVALID_REFRESH_TOKEN");
    }
    Json(server.issue()).into_response()
}

async fn signout(State(server): State<Arc<MockServer>>, Json(req): Json<SignoutRequest>) -> StatusCode {
    server.tokens.lock().refresh.remove(&req.refresh_token);
    StatusCode::NO_CONTENT
}

async fn me(State(server): State<Arc<MockServer>>, headers: HeaderMap) -> Response {
    match server.authorize(&headers) {
        Ok(()) => Json(profile()).into_response(),
        Err(response) => response,
    }
}

async fn list_feeds() -> Json<FeedPage> {
    Json(FeedPage {
        items: Vec::new(),
        next_cursor: None,
    })
}

async fn create_feed(
    State(server): State<Arc<MockServer>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if let Err(response) = server.authorize(&headers) {
        return response;
    }
    let mut caption = None;
    let mut image_len = 0;
    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name() {
            Some("caption") => caption = field.text().await.ok(),
            Some("file") => image_len = field.bytes().await.map(|b| b.len()).unwrap_or(0),
            _ => {}
        }
    }
    let (Some(caption), true) = (caption, image_len > 0) else {
        return error(StatusCode::BAD_REQUEST, "caption and file are required", "VALIDATION_ERROR");
    };
    let now = Utc::now();
    (
        StatusCode::CREATED,
        Json(Feed {
            id: Uuid::new_v4(),
            caption,
            image_url: "http://localhost/objects/feeds/x.png".into(),
            user_id: Uuid::nil(),
            user_name: "Ada".into(),
            user_avatar: None,
            created_at: now,
            updated_at: now,
        }),
    )
        .into_response()
}

/// Records redirects instead of navigating.
pub struct RecordingNavigator {
    current: Mutex<String>,
    redirects: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn at(path: &str) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(path.to_string()),
            redirects: Mutex::new(Vec::new()),
        })
    }

    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn current_path(&self) -> String {
        self.current.lock().clone()
    }

    fn redirect(&self, to: &str) {
        self.redirects.lock().push(to.to_string());
        *self.current.lock() = to.to_string();
    }
}

pub struct Harness {
    pub server: Arc<MockServer>,
    pub client: Arc<ApiClient>,
    pub sessions: Arc<MemorySessionStore>,
    pub navigator: Arc<RecordingNavigator>,
    pub client_clock: Arc<ManualClock>,
}

pub struct HarnessBuilder {
    server_clock: Arc<ManualClock>,
    client_clock: Arc<ManualClock>,
    access_ttl: i64,
    refresh_delay: Duration,
    page: String,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            server_clock: Arc::new(ManualClock::new(now)),
            client_clock: Arc::new(ManualClock::new(now)),
            access_ttl: 900,
            refresh_delay: Duration::from_millis(0),
            page: "/feeds".to_string(),
        }
    }

    /// Start the client clock `secs` ahead of the server's (negative: behind).
    pub fn client_skew(self, secs: i64) -> Self {
        self.client_clock
            .set(self.server_clock.now() + chrono::Duration::seconds(secs));
        self
    }

    pub fn access_ttl(mut self, secs: i64) -> Self {
        self.access_ttl = secs;
        self
    }

    pub fn refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn on_page(mut self, path: &str) -> Self {
        self.page = path.to_string();
        self
    }

    pub async fn build(self) -> Harness {
        let server = MockServer::new(self.server_clock, self.access_ttl, self.refresh_delay);
        let base = server.spawn().await;

        let sessions = Arc::new(MemorySessionStore::new());
        let navigator = RecordingNavigator::at(&self.page);
        let client = ApiClient::builder(ClientConfig::new(&base, &base))
            .sessions(sessions.clone())
            .navigator(navigator.clone())
            .clock(self.client_clock.clone())
            .build()
            .unwrap();

        Harness {
            server,
            client: Arc::new(client),
            sessions,
            navigator,
            client_clock: self.client_clock,
        }
    }
}

impl Harness {
    /// Move both clocks forward together.
    pub fn advance(&self, secs: i64) {
        let by = chrono::Duration::seconds(secs);
        self.server.clock.advance(by);
        self.client_clock.advance(by);
    }
}
