//! Deadline decorator for storage backends.

use crate::traits::{ByteStream, ObjectInfo, PresignedUpload, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Wraps a backend so every call fails with [`StorageError::Timeout`] instead of hanging.
///
/// For `download_stream` the deadline covers opening the stream, not consuming it.
#[derive(Clone)]
pub struct TimeoutStorage {
    inner: Arc<dyn Storage>,
    timeout: Duration,
}

impl TimeoutStorage {
    pub fn new(inner: Arc<dyn Storage>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        key: &str,
        fut: impl Future<Output = StorageResult<T>> + Send,
    ) -> StorageResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation,
                    key = %key,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Storage operation timed out"
                );
                Err(StorageError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl Storage for TimeoutStorage {
    async fn put(&self, storage_key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        self.bounded(
            "put",
            storage_key,
            self.inner.put(storage_key, data, content_type),
        )
        .await
    }

    async fn head(&self, storage_key: &str) -> StorageResult<Option<ObjectInfo>> {
        self.bounded("head", storage_key, self.inner.head(storage_key))
            .await
    }

    async fn download_stream(&self, storage_key: &str) -> StorageResult<ByteStream> {
        self.bounded(
            "download_stream",
            storage_key,
            self.inner.download_stream(storage_key),
        )
        .await
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        self.bounded("delete", storage_key, self.inner.delete(storage_key))
            .await
    }

    async fn presign_put(
        &self,
        storage_key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<Option<PresignedUpload>> {
        self.bounded(
            "presign_put",
            storage_key,
            self.inner.presign_put(storage_key, content_type, expires_in),
        )
        .await
    }

    fn backend_type(&self) -> StorageBackend {
        self.inner.backend_type()
    }
}
