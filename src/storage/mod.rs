//! Durable object storage for generated media.
//!
//! `ObjectStore` backends only move bytes by key. `Storage` owns the naming
//! and visibility policy: where an object lives, which URL callers get back,
//! and how a URL maps back to its key for deletion.

pub mod fs;
pub mod memory;

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::error::SketchbookError;

/// Errors emitted by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

/// Trait abstracting over object storage backends.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` under `key`, replacing any existing object.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError>;

    /// Delete the object if present. Returns Ok(true) if deleted, Ok(false) if
    /// it did not exist.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;
}

/// Reject keys that could escape a backend's root or address nothing.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Lifetime class of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Long-lived outputs handed to callers.
    Permanent,
    /// Short-lived staging (e.g. caller uploads a provider must fetch).
    Temporary,
}

/// How URLs for a namespace are built.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// `{public_base_url}/{key}`
    #[default]
    Direct,
    /// `https://{cdn_domain}/{key}`; requires a CDN domain.
    Cdn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePolicy {
    /// Base URL of the bucket/directory as served to the public.
    pub public_base_url: String,
    pub cdn_domain: Option<String>,
    /// Key prefix for the temporary namespace.
    pub temp_prefix: String,
    pub permanent_delivery: Delivery,
    pub temporary_delivery: Delivery,
}

impl Default for StoragePolicy {
    fn default() -> Self {
        Self {
            public_base_url: "http://127.0.0.1:8000/media".to_string(),
            cdn_domain: None,
            temp_prefix: "temp".to_string(),
            permanent_delivery: Delivery::Direct,
            temporary_delivery: Delivery::Direct,
        }
    }
}

impl StoragePolicy {
    fn delivery(&self, namespace: Namespace) -> Delivery {
        match namespace {
            Namespace::Permanent => self.permanent_delivery,
            Namespace::Temporary => self.temporary_delivery,
        }
    }

    fn cdn_base(&self) -> Option<String> {
        self.cdn_domain
            .as_deref()
            .map(|d| d.trim().trim_end_matches('/'))
            .filter(|d| !d.is_empty())
            .map(|d| {
                if d.starts_with("http://") || d.starts_with("https://") {
                    d.to_string()
                } else {
                    format!("https://{d}")
                }
            })
    }

    fn direct_base(&self) -> &str {
        self.public_base_url.trim_end_matches('/')
    }
}

/// Where a stored object goes: namespace plus a logical directory
/// (e.g. "videos", "characters").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub namespace: Namespace,
    pub directory: String,
}

impl Placement {
    pub fn permanent(directory: impl Into<String>) -> Self {
        Self {
            namespace: Namespace::Permanent,
            directory: directory.into(),
        }
    }

    pub fn temporary(directory: impl Into<String>) -> Self {
        Self {
            namespace: Namespace::Temporary,
            directory: directory.into(),
        }
    }
}

/// Durable handle returned to callers. `backing_key` is all that is needed to
/// delete the object later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub url: String,
    pub backing_key: String,
}

pub struct Storage {
    backend: Arc<dyn ObjectStore>,
    policy: StoragePolicy,
}

impl Storage {
    /// Fails when a namespace mandates CDN delivery and no CDN domain is set.
    pub fn new(
        backend: Arc<dyn ObjectStore>,
        policy: StoragePolicy,
    ) -> Result<Self, SketchbookError> {
        for namespace in [Namespace::Permanent, Namespace::Temporary] {
            if policy.delivery(namespace) == Delivery::Cdn && policy.cdn_base().is_none() {
                return Err(SketchbookError::Config(format!(
                    "{namespace:?} storage is served through a CDN but no CDN domain is configured"
                )));
            }
        }
        if policy.public_base_url.trim().is_empty() {
            return Err(SketchbookError::Config(
                "storage public base URL is empty".to_string(),
            ));
        }
        Ok(Self { backend, policy })
    }

    /// Fresh, collision-free key for a new object.
    pub fn object_key(&self, placement: &Placement, ext: &str) -> String {
        let directory = placement.directory.trim_matches('/');
        let name = format!("{}.{ext}", uuid::Uuid::new_v4().simple());
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        if placement.namespace == Namespace::Temporary {
            parts.push(self.policy.temp_prefix.trim_matches('/'));
        }
        if !directory.is_empty() {
            parts.push(directory);
        }
        parts.retain(|p| !p.is_empty());
        let mut key = parts.join("/");
        if !key.is_empty() {
            key.push('/');
        }
        key.push_str(&name);
        key
    }

    /// Public URL for `key` under the namespace's delivery style.
    pub fn url_for(&self, namespace: Namespace, key: &str) -> Result<String, SketchbookError> {
        match self.policy.delivery(namespace) {
            Delivery::Direct => Ok(format!("{}/{key}", self.policy.direct_base())),
            Delivery::Cdn => self
                .policy
                .cdn_base()
                .map(|base| format!("{base}/{key}"))
                .ok_or_else(|| SketchbookError::Config("no CDN domain configured".to_string())),
        }
    }

    /// Recover the backing key from a URL this storage handed out, by
    /// stripping the direct or CDN prefix. Query strings are ignored.
    pub fn key_from_url(&self, url: &str) -> Option<String> {
        let url = url.trim();
        let url = url.split(['?', '#']).next().unwrap_or(url);

        let mut bases = vec![self.policy.direct_base().to_string()];
        if let Some(cdn) = self.policy.cdn_base() {
            bases.push(cdn);
        }

        bases.iter().find_map(|base| {
            url.strip_prefix(base.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .filter(|key| validate_key(key).is_ok())
                .map(|key| key.to_string())
        })
    }

    /// Upload `bytes` under a fresh key for `placement`.
    pub async fn store(
        &self,
        bytes: Vec<u8>,
        placement: &Placement,
        ext: &str,
        content_type: &str,
    ) -> Result<StoredAsset, SketchbookError> {
        let key = self.object_key(placement, ext);
        let url = self.url_for(placement.namespace, &key)?;
        let size = bytes.len();

        self.backend
            .put(&key, bytes, content_type)
            .await
            .map_err(|e| SketchbookError::Upload(e.to_string()))?;

        tracing::info!(key, size, content_type, "stored object");
        Ok(StoredAsset {
            url,
            backing_key: key,
        })
    }

    /// Delete an object by the URL it was published under. Never raises:
    /// returns false when the URL is foreign, the object is already gone, or
    /// the backend fails, so callers can log and continue.
    pub async fn delete_by_url(&self, url: &str) -> bool {
        let Some(key) = self.key_from_url(url) else {
            tracing::warn!(url, "delete skipped: URL does not belong to this storage");
            return false;
        };

        match self.backend.delete(&key).await {
            Ok(true) => {
                tracing::info!(key, "deleted object");
                true
            }
            Ok(false) => {
                tracing::warn!(key, "delete skipped: object does not exist");
                false
            }
            Err(e) => {
                tracing::error!(key, "delete failed: {e}");
                false
            }
        }
    }
}
