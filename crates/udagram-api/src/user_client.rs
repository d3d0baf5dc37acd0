use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use uuid::Uuid;

use udagram_types::models::PublicUser;

use crate::feed_service::UserDirectory;

/// Header carrying the shared secret on service-to-service calls.
pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

/// Internal RPC client for the user service. Built once at startup from
/// config and handed to whoever needs it.
#[derive(Clone)]
pub struct HttpUserDirectory {
    client: Client,
    base_url: String,
    internal_token: String,
}

impl HttpUserDirectory {
    pub fn new(base_url: &str, internal_token: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("building user service client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            internal_token: internal_token.into(),
        })
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn get_user_by_id(&self, id: Uuid) -> anyhow::Result<Option<PublicUser>> {
        let url = format!("{}/internal/users/{}", self.base_url, id);
        let resp = self
            .client
            .get(&url)
            .header(INTERNAL_TOKEN_HEADER, &self.internal_token)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?;

        match resp.status() {
            StatusCode::OK => Ok(Some(resp.json::<PublicUser>().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => bail!("user service answered {} for user {}", status, id),
        }
    }
}
