//! Content-addressed payload objects
//!
//! Extracted text and raw bytes are written under keys derived from their
//! SHA-256, so repeated content for a job maps to one object. Readers get
//! time-limited presigned URLs instead of direct access.

use crate::extract::bytes_extension;
use crate::storage::traits::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// A time-limited download URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Presigned {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Blob storage for result payloads
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` under `key`, replacing any previous object
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> StorageResult<()>;

    /// Reads the object stored under `key`
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Issues a download URL for `key` valid for `ttl`
    fn presign_get(&self, key: &str, ttl: Duration) -> StorageResult<Presigned>;
}

/// Hex SHA-256 of a payload
pub fn content_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Key for an extracted text payload
pub fn text_key(tenant_id: &str, job_id: &str, sha256: &str) -> String {
    format!("{}/{}/content/{}.txt", tenant_id, job_id, sha256)
}

/// Key for a raw byte payload; the extension follows the content type
pub fn bytes_key(tenant_id: &str, job_id: &str, sha256: &str, content_type: &str) -> String {
    format!(
        "{}/{}/bytes/{}.{}",
        tenant_id,
        job_id,
        sha256,
        bytes_extension(content_type)
    )
}

/// Object store backed by a local directory
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: String,
    signing_secret: String,
}

impl FsObjectStore {
    /// Creates a store rooted at `root`
    ///
    /// # Arguments
    ///
    /// * `root` - Directory objects are written under (created on first write)
    /// * `public_base_url` - Prefix of presigned URLs
    /// * `signing_secret` - Secret mixed into URL signatures
    pub fn new(
        root: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        signing_secret: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            signing_secret: signing_secret.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Checks a signature produced by [`ObjectStore::presign_get`]
    ///
    /// Expired signatures are rejected even when they match.
    pub fn verify_signature(&self, key: &str, expires: i64, signature: &str) -> bool {
        if expires < Utc::now().timestamp() {
            return false;
        }
        self.sign(key, expires) == signature
    }

    fn sign(&self, key: &str, expires: i64) -> String {
        content_sha256(format!("{}|{}|{}", self.signing_secret, key, expires).as_bytes())
    }

    /// Maps a key to a path below the root, refusing keys that would escape it
    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));

        if !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> StorageResult<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        tracing::debug!("Stored {} ({} bytes, {})", key, bytes.len(), content_type);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.object_path(key)?;
        Ok(tokio::fs::read(path).await?)
    }

    fn presign_get(&self, key: &str, ttl: Duration) -> StorageResult<Presigned> {
        self.object_path(key)?;

        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let expires_at = Utc
            .timestamp_opt(expires, 0)
            .single()
            .ok_or_else(|| StorageError::InvalidKey(format!("expiry out of range for {}", key)))?;

        Ok(Presigned {
            url: format!(
                "{}/{}?expires={}&signature={}",
                self.public_base_url,
                key,
                expires,
                self.sign(key, expires)
            ),
            expires_at,
        })
    }
}
