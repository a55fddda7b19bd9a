//! Object store abstraction
//!
//! The pipeline only needs two operations: upload a byte blob and mint a
//! time-limited URL for it. Production deployments plug an S3-compatible
//! backend in behind this trait; the in-memory store backs the mock
//! provider and the test suites.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Byte-blob store with presigned download URLs
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a blob and return a presigned URL for it
    async fn upload(&self, key: &str, data: Vec<u8>, content_type: &str) -> WorkerResult<String>;

    /// Mint a presigned URL for an existing object
    async fn presigned_url(&self, key: &str, expiry: Duration) -> WorkerResult<String>;
}

/// In-memory object store
pub struct InMemoryObjectStore {
    bucket: String,
    presign_expiry: Duration,
    objects: DashMap<String, Vec<u8>>,
}

impl InMemoryObjectStore {
    pub fn new(bucket: impl Into<String>, presign_expiry: Duration) -> Self {
        Self {
            bucket: bucket.into(),
            presign_expiry,
            objects: DashMap::new(),
        }
    }

    /// Stored object bytes (test support)
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.get(key).map(|v| v.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new("notegen-artifacts", Duration::from_secs(3600))
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn upload(&self, key: &str, data: Vec<u8>, _content_type: &str) -> WorkerResult<String> {
        self.objects.insert(key.to_string(), data);
        self.presigned_url(key, self.presign_expiry).await
    }

    async fn presigned_url(&self, key: &str, expiry: Duration) -> WorkerResult<String> {
        if !self.objects.contains_key(key) {
            return Err(WorkerError::storage(format!("object not found: {}", key)));
        }
        let expires_at = Utc::now().timestamp() + expiry.as_secs() as i64;
        Ok(format!(
            "https://storage.invalid/{}/{}?expires={}",
            self.bucket, key, expires_at
        ))
    }
}
