use std::path::PathBuf;

use anyhow::{Context, bail};

/// Secrets copied from sample env files that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me",
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

/// Settings shared by both services.
#[derive(Debug, Clone)]
pub struct CommonConfig {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub internal_token: String,
    pub bus_path: PathBuf,
    pub storage_dir: PathBuf,
    pub public_object_url: String,
    pub user_topic: String,
}

#[derive(Debug, Clone)]
pub struct UserServiceConfig {
    pub common: CommonConfig,
    pub db_path: PathBuf,
    pub avatar_bucket: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
}

#[derive(Debug, Clone)]
pub struct FeedServiceConfig {
    pub common: CommonConfig,
    pub db_path: PathBuf,
    pub feed_bucket: String,
    pub feed_queue: String,
    pub user_service_url: String,
}

impl UserServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let env = Env(&lookup);
        Ok(Self {
            common: CommonConfig::read(&env, "UDAGRAM_USER_PORT", 8081)?,
            db_path: env.or("UDAGRAM_USER_DB_PATH", "udagram-users.db").into(),
            avatar_bucket: env.or("UDAGRAM_AVATAR_BUCKET", "avatars"),
            access_ttl_secs: env.parsed("UDAGRAM_ACCESS_TTL_SECS", 900)?,
            refresh_ttl_secs: env.parsed("UDAGRAM_REFRESH_TTL_SECS", 7 * 24 * 3600)?,
        })
    }
}

impl FeedServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let env = Env(&lookup);
        Ok(Self {
            common: CommonConfig::read(&env, "UDAGRAM_FEED_PORT", 8082)?,
            db_path: env.or("UDAGRAM_FEED_DB_PATH", "udagram-feeds.db").into(),
            feed_bucket: env.or("UDAGRAM_FEED_BUCKET", "feeds"),
            feed_queue: env.or("UDAGRAM_FEED_QUEUE", "feed-user-updates"),
            user_service_url: env.or("UDAGRAM_USER_SERVICE_URL", "http://localhost:8081"),
        })
    }
}

impl CommonConfig {
    fn read(env: &Env<'_>, port_key: &str, default_port: u16) -> anyhow::Result<Self> {
        let port = env.parsed(port_key, default_port)?;
        Ok(Self {
            host: env.or("UDAGRAM_HOST", "0.0.0.0"),
            port,
            jwt_secret: env.secret("UDAGRAM_JWT_SECRET")?,
            internal_token: env.secret("UDAGRAM_INTERNAL_TOKEN")?,
            bus_path: env.or("UDAGRAM_BUS_PATH", "udagram-bus.db").into(),
            storage_dir: env.or("UDAGRAM_STORAGE_DIR", "./object-storage").into(),
            public_object_url: env.or(
                "UDAGRAM_PUBLIC_OBJECT_URL",
                &format!("http://localhost:{}/objects", port),
            ),
            user_topic: env.or("UDAGRAM_USER_TOPIC", "user-events"),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, key: &str, default: T) -> anyhow::Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("{} has an invalid value {:?}", key, raw)),
            None => Ok(default),
        }
    }

    fn secret(&self, key: &str) -> anyhow::Result<String> {
        match self.get(key) {
            Some(value) if !PLACEHOLDER_SECRETS.contains(&value.as_str()) => Ok(value),
            _ => bail!("{} is unset or still a placeholder", key),
        }
    }
}
