//! Object storage for uploaded images.
//!
//! Services talk to [`ObjectStore`]; [`DiskObjectStore`] keeps objects as flat
//! files under `{dir}/{bucket}/{key}` and hands out URLs below a public base
//! URL that the owning service serves.

use std::path::{Component, Path, PathBuf};

use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

/// A file to store.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file: Bytes,
    pub file_name: String,
    pub mime_type: String,
    /// Key prefix, e.g. `feeds` or `avatars`.
    pub folder: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    pub url: String,
    pub key: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, bucket: &str, req: UploadRequest) -> Result<UploadedObject>;

    /// Delete by key or by the URL returned from [`ObjectStore::upload`].
    /// Deleting an object that is already gone succeeds.
    async fn delete_file(&self, bucket: &str, key_or_url: &str) -> Result<()>;
}

pub struct DiskObjectStore {
    dir: PathBuf,
    public_base_url: String,
}

impl DiskObjectStore {
    pub async fn new(dir: PathBuf, public_base_url: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Object storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, bucket, key)
    }

    /// Path to the file backing `key`. Rejects keys that would escape the bucket.
    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        validate_segment(bucket)?;
        let key_path = Path::new(key);
        if key.is_empty()
            || !key_path
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            bail!("Invalid object key: {:?}", key);
        }
        Ok(self.dir.join(bucket).join(key_path))
    }

    /// The key behind `url` if it is one of this store's object URLs for
    /// `bucket`.
    pub fn key_from_url<'a>(&self, bucket: &str, url: &'a str) -> Option<&'a str> {
        let prefix = self.object_url(bucket, "");
        url.strip_prefix(prefix.as_str()).filter(|key| !key.is_empty())
    }

    fn resolve_key<'a>(&self, bucket: &str, key_or_url: &'a str) -> Result<&'a str> {
        if !key_or_url.contains("://") {
            return Ok(key_or_url);
        }
        match self.key_from_url(bucket, key_or_url) {
            Some(key) => Ok(key),
            None => bail!("URL {} is not an object in bucket {}", key_or_url, bucket),
        }
    }
}

#[async_trait]
impl ObjectStore for DiskObjectStore {
    async fn upload(&self, bucket: &str, req: UploadRequest) -> Result<UploadedObject> {
        validate_segment(&req.folder)?;
        let key = match extension(&req.file_name, &req.mime_type) {
            Some(ext) => format!("{}/{}.{}", req.folder, Uuid::new_v4(), ext),
            None => format!("{}/{}", req.folder, Uuid::new_v4()),
        };

        let path = self.object_path(bucket, &key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&path).await?;
        file.write_all(&req.file).await?;
        file.flush().await?;

        info!(
            "Stored {} ({} bytes, {}) as {}/{}",
            req.file_name,
            req.file.len(),
            req.mime_type,
            bucket,
            key
        );

        Ok(UploadedObject {
            url: self.object_url(bucket, &key),
            key,
        })
    }

    async fn delete_file(&self, bucket: &str, key_or_url: &str) -> Result<()> {
        let key = self.resolve_key(bucket, key_or_url)?;
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted object {}/{}", bucket, key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Object {}/{} already gone", bucket, key);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty()
        || !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("Invalid bucket or folder name: {:?}", segment);
    }
    Ok(())
}

/// File extension for the stored key: taken from the file name when it looks
/// sane, else derived from the MIME type.
fn extension(file_name: &str, mime_type: &str) -> Option<String> {
    let from_name = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase());

    from_name.or_else(|| {
        let ext = match mime_type {
            "image/jpeg" => "jpg",
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => return None,
        };
        Some(ext.to_string())
    })
}
