use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use udagram_types::api::{
    AuthResponse, ErrorBody, FeedCursor, FeedPage, RefreshRequest, SigninRequest, SignoutRequest,
    SignupRequest, UpdateProfileRequest,
};
use udagram_types::models::{Feed, UserProfile};

use crate::clock::{Clock, SystemClock};
use crate::coordinator::{RefreshCoordinator, RefreshResult, TokenRefresher};
use crate::error::{ClientError, RefreshError};
use crate::navigation::{Navigator, NoopNavigator, is_auth_page, signin_redirect};
use crate::policy::EndpointPolicy;
use crate::session::{MemorySessionStore, SessionStore};

/// Which service a request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Users,
    Feeds,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user_service_url: String,
    pub feed_service_url: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(user_service_url: impl Into<String>, feed_service_url: impl Into<String>) -> Self {
        Self {
            user_service_url: user_service_url.into(),
            feed_service_url: feed_service_url.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// An image for `create_feed` or `upload_avatar`.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

/// Multipart body kept as data so a retried request can rebuild it.
#[derive(Debug, Clone, Default)]
pub struct MultipartBody {
    pub fields: Vec<(String, String)>,
    pub file: Option<FileUpload>,
}

impl MultipartBody {
    fn to_form(&self) -> Result<Form, ClientError> {
        let mut form = Form::new();
        for (name, value) in &self.fields {
            form = form.text(name.clone(), value.clone());
        }
        if let Some(file) = &self.file {
            let part = Part::bytes(file.bytes.to_vec())
                .file_name(file.file_name.clone())
                .mime_str(&file.mime_type)?;
            form = form.part("file", part);
        }
        Ok(form)
    }
}

enum Payload {
    Empty,
    Json(serde_json::Value),
    Multipart(MultipartBody),
}

/// `POST /refresh` against the user service.
pub struct HttpTokenRefresher {
    http: Client,
    url: Url,
}

impl HttpTokenRefresher {
    pub fn new(http: Client, user_service_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            http,
            url: Url::parse(&format!("{}/refresh", user_service_url.trim_end_matches('/')))?,
        })
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> RefreshResult {
        let response = self
            .http
            .post(self.url.clone())
            .json(&RefreshRequest {
                refresh_token: refresh_token.to_string(),
            })
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Rejected(status.as_u16()));
        }
        response
            .json()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))
    }
}

/// HTTP client for both services. Attaches the access token, refreshes it
/// through a [`RefreshCoordinator`], and retries a request once after a 401.
pub struct ApiClient {
    http: Client,
    user_base: String,
    feed_base: String,
    coordinator: RefreshCoordinator,
    navigator: Arc<dyn Navigator>,
    policy: EndpointPolicy,
}

pub struct ApiClientBuilder {
    config: ClientConfig,
    sessions: Option<Arc<dyn SessionStore>>,
    navigator: Option<Arc<dyn Navigator>>,
    clock: Option<Arc<dyn Clock>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    policy: EndpointPolicy,
}

impl ApiClientBuilder {
    pub fn sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the HTTP refresh call, e.g. to share one refresher between
    /// clients.
    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn policy(mut self, policy: EndpointPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Result<ApiClient, ClientError> {
        let user_base = base_url(&self.config.user_service_url)?;
        let feed_base = base_url(&self.config.feed_service_url)?;
        let http = Client::builder().timeout(self.config.timeout).build()?;

        let refresher = match self.refresher {
            Some(refresher) => refresher,
            None => Arc::new(HttpTokenRefresher::new(http.clone(), &user_base)?),
        };
        let coordinator = RefreshCoordinator::new(
            refresher,
            self.sessions
                .unwrap_or_else(|| Arc::new(MemorySessionStore::new())),
            self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        );

        Ok(ApiClient {
            http,
            user_base,
            feed_base,
            coordinator,
            navigator: self.navigator.unwrap_or_else(|| Arc::new(NoopNavigator)),
            policy: self.policy,
        })
    }
}

impl ApiClient {
    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            sessions: None,
            navigator: None,
            clock: None,
            refresher: None,
            policy: EndpointPolicy::default(),
        }
    }

    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::builder(config).build()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        self.coordinator.sessions()
    }

    pub fn is_signed_in(&self) -> bool {
        self.sessions().get().is_some()
    }

    // -- Auth --

    pub async fn sign_up(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, ClientError> {
        let body = SignupRequest {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let auth: AuthResponse = self.post_json(Service::Users, "/signup", &body).await?;
        self.sessions().set(auth.tokens.clone());
        info!("Signed up as {}", auth.user.id);
        Ok(auth)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResponse, ClientError> {
        let body = SigninRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let auth: AuthResponse = self.post_json(Service::Users, "/signin", &body).await?;
        self.sessions().set(auth.tokens.clone());
        info!("Signed in as {}", auth.user.id);
        Ok(auth)
    }

    /// Revoke the refresh token on the server if possible; the local
    /// session is cleared either way.
    pub async fn sign_out(&self) {
        if let Some(session) = self.sessions().get() {
            let body = SignoutRequest {
                refresh_token: session.refresh_token,
            };
            let result = match serde_json::to_value(&body) {
                Ok(json) => self
                    .send(Service::Users, Method::DELETE, "/signout", &Payload::Json(json))
                    .await
                    .and_then(|r| ok_or_api_error(r.status(), Bytes::new())),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                warn!("Sign-out request failed: {}", e);
            }
        }
        self.sessions().clear();
    }

    // -- Users --

    pub async fn me(&self) -> Result<UserProfile, ClientError> {
        self.get_json(Service::Users, "/users/me").await
    }

    pub async fn update_profile(&self, update: &UpdateProfileRequest) -> Result<UserProfile, ClientError> {
        self.patch_json(Service::Users, "/users/me", update).await
    }

    pub async fn upload_avatar(&self, file: FileUpload) -> Result<UserProfile, ClientError> {
        let body = MultipartBody {
            fields: Vec::new(),
            file: Some(file),
        };
        self.request_json(Service::Users, Method::PUT, "/users/me/avatar", Payload::Multipart(body))
            .await
    }

    // -- Feeds --

    pub async fn list_feeds(
        &self,
        limit: Option<u32>,
        before: Option<FeedCursor>,
    ) -> Result<FeedPage, ClientError> {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        if let Some(limit) = limit {
            query.append_pair("limit", &limit.to_string());
        }
        if let Some(before) = before {
            query.append_pair("before", &before.to_string());
        }
        let query = query.finish();
        let path = if query.is_empty() {
            "/feeds".to_string()
        } else {
            format!("/feeds?{}", query)
        };
        self.get_json(Service::Feeds, &path).await
    }

    pub async fn get_feed(&self, id: Uuid) -> Result<Feed, ClientError> {
        self.get_json(Service::Feeds, &format!("/feeds/{}", id)).await
    }

    pub async fn create_feed(&self, caption: &str, file: FileUpload) -> Result<Feed, ClientError> {
        let body = MultipartBody {
            fields: vec![("caption".to_string(), caption.to_string())],
            file: Some(file),
        };
        self.post_multipart(Service::Feeds, "/feeds", body).await
    }

    pub async fn delete_feed(&self, id: Uuid) -> Result<(), ClientError> {
        self.delete(Service::Feeds, &format!("/feeds/{}", id)).await
    }

    // -- Generic requests --

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
    ) -> Result<T, ClientError> {
        self.request_json(service, Method::GET, path, Payload::Empty).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let json = serde_json::to_value(body)?;
        self.request_json(service, Method::POST, path, Payload::Json(json)).await
    }

    pub async fn patch_json<B: Serialize, T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let json = serde_json::to_value(body)?;
        self.request_json(service, Method::PATCH, path, Payload::Json(json)).await
    }

    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        body: MultipartBody,
    ) -> Result<T, ClientError> {
        self.request_json(service, Method::POST, path, Payload::Multipart(body)).await
    }

    pub async fn delete(&self, service: Service, path: &str) -> Result<(), ClientError> {
        let response = self.send(service, Method::DELETE, path, &Payload::Empty).await?;
        let status = response.status();
        let body = response.bytes().await?;
        ok_or_api_error(status, body)
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        service: Service,
        method: Method,
        path: &str,
        payload: Payload,
    ) -> Result<T, ClientError> {
        let response = self.send(service, method, path, &payload).await?;
        let status = response.status();
        let body = response.bytes().await?;
        ok_or_api_error(status, body.clone())?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Proactive refresh before sending, one refresh-and-retry on 401.
    async fn send(
        &self,
        service: Service,
        method: Method,
        path: &str,
        payload: &Payload,
    ) -> Result<Response, ClientError> {
        let token = if self.policy.requires_auth(&method, path) {
            match self.coordinator.ensure_fresh_access_token().await {
                Ok(token) => token,
                Err(e) => return Err(self.auth_failure(e)),
            }
        } else {
            None
        };

        let response = self
            .dispatch(service, &method, path, payload, token.as_deref())
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED || self.policy.is_auth_endpoint(path) {
            return Ok(response);
        }

        match self
            .coordinator
            .refresh_after_unauthorized(token.as_deref())
            .await
        {
            Ok(session) => {
                self.dispatch(service, &method, path, payload, Some(&session.access_token))
                    .await
            }
            Err(e) => Err(self.auth_failure(e)),
        }
    }

    async fn dispatch(
        &self,
        service: Service,
        method: &Method,
        path: &str,
        payload: &Payload,
        token: Option<&str>,
    ) -> Result<Response, ClientError> {
        let base = match service {
            Service::Users => &self.user_base,
            Service::Feeds => &self.feed_base,
        };
        let url = Url::parse(&format!("{}{}", base, path))?;

        let mut request = self.http.request(method.clone(), url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request = match payload {
            Payload::Empty => request,
            Payload::Json(json) => request.json(json),
            Payload::Multipart(body) => request.multipart(body.to_form()?),
        };
        Ok(request.send().await?)
    }

    /// Clear the session and send the user to sign in, unless they are
    /// already on a sign-in or sign-up page.
    fn auth_failure(&self, err: RefreshError) -> ClientError {
        self.sessions().clear();
        let current = self.navigator.current_path();
        if !is_auth_page(&current) {
            let target = signin_redirect(&current);
            info!("Session ended ({}), redirecting to {}", err, target);
            self.navigator.redirect(&target);
        }
        ClientError::Unauthenticated(err)
    }
}

fn base_url(raw: &str) -> Result<String, ClientError> {
    let trimmed = raw.trim_end_matches('/');
    Url::parse(trimmed)?;
    Ok(trimmed.to_string())
}

fn ok_or_api_error(status: StatusCode, body: Bytes) -> Result<(), ClientError> {
    if status.is_success() {
        return Ok(());
    }
    let (code, message) = match serde_json::from_slice::<ErrorBody>(&body) {
        Ok(err) => (err.code, err.error),
        Err(_) => (
            format!("HTTP_{}", status.as_u16()),
            String::from_utf8_lossy(&body).into_owned(),
        ),
    };
    Err(ClientError::Api {
        status,
        code,
        message,
    })
}
