//! Storage abstraction trait
//!
//! This module defines the Storage trait that all blob backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use upstage_core::AppError;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Stream of content chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Timeout(after) => {
                AppError::Timeout(format!("storage operation timed out after {:?}", after))
            }
            StorageError::NotFound(key) => AppError::Storage(format!("object missing: {}", key)),
            other => AppError::Storage(other.to_string()),
        }
    }
}

/// Size and type reported by the backend for a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size_bytes: u64,
    /// Not every backend records a content type (the local filesystem does not)
    pub content_type: Option<String>,
}

/// Target for a direct-to-backend upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUpload {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

/// Blob storage abstraction trait
///
/// Keys are tenant-scoped, `tenants/{tenant_id}/assets/{asset_id}/...`. See the crate
/// root documentation.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `data` under `storage_key`, replacing any existing object.
    async fn put(&self, storage_key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    /// Object metadata, or `None` when the key does not exist
    async fn head(&self, storage_key: &str) -> StorageResult<Option<ObjectInfo>>;

    /// Stream the object content
    async fn download_stream(&self, storage_key: &str) -> StorageResult<ByteStream>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    /// Presigned direct-upload target, or `None` when clients upload through the API
    async fn presign_put(
        &self,
        storage_key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<Option<PresignedUpload>>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
