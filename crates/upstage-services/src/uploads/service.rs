//! Staged upload orchestration
//!
//! create → (client sends bytes) → complete, over an [`AssetStore`] and a blob
//! [`Storage`]. Every asset lookup is tenant-scoped; the store provides the
//! atomicity (ledger + rate limit + row in one step, row-locked receipts and a
//! compare-and-swap to `ready`).

use super::body::{hash_stream, read_limited};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use upstage_core::constants::API_PREFIX;
use upstage_core::models::{
    Asset, AssetPurpose, AssetStatus, BeginOutcome, CompleteUploadResponse, ContentReceipt,
    CreateUploadRequest, CreateUploadResponse, IdempotencyClaim, NewAsset, UploadDescriptor,
    Visibility, UPLOAD_COMPLETE_OPERATION, UPLOAD_CREATE_OPERATION,
};
use upstage_core::validation::{
    content_key, is_allowed_content_type, normalize_content_type, normalize_idempotency_key,
    object_key, request_fingerprint, sha256_hex,
};
use upstage_core::{Admission, AppError, Config, ContentVerifier, RateLimitPolicy};
use upstage_db::{AssetStore, ContentRecorded, StageOutcome, StageRequest};
use upstage_storage::{ByteStream, Storage};
use uuid::Uuid;
use validator::Validate;

/// Verification re-runs at most this many times when concurrent uploads keep
/// replacing the content during completion.
const READY_SWAP_ATTEMPTS: usize = 3;

/// Upload protocol settings, taken from [`Config`]
#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Externally reachable base URL, without a trailing slash
    pub public_base_url: String,
    pub max_upload_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub rate_limit: RateLimitPolicy,
    pub complete_rate_limit: RateLimitPolicy,
    pub upload_expiry: Duration,
    pub verify_timeout: Duration,
}

impl UploadSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            public_base_url: config.public_base_url().trim_end_matches('/').to_string(),
            max_upload_bytes: config.max_upload_bytes(),
            allowed_content_types: config.allowed_content_types().to_vec(),
            rate_limit: config.upload_rate_limit(),
            complete_rate_limit: config.complete_rate_limit(),
            upload_expiry: config.upload_expiry(),
            verify_timeout: config.verify_timeout(),
        }
    }
}

fn asset_not_found(asset_id: Uuid) -> AppError {
    AppError::NotFound(format!("Asset {} not found", asset_id))
}

/// Unfinished uploads accept content and completion up to and including the expiry instant
fn ensure_upload_open(asset: &Asset, now: DateTime<Utc>) -> Result<(), AppError> {
    if now > asset.upload_expires_at {
        return Err(AppError::UploadExpired {
            expired_at: asset.upload_expires_at,
        });
    }
    Ok(())
}

#[derive(Clone)]
pub struct AssetUploadService {
    store: Arc<dyn AssetStore>,
    storage: Arc<dyn Storage>,
    settings: Arc<UploadSettings>,
}

impl AssetUploadService {
    pub fn new(
        store: Arc<dyn AssetStore>,
        storage: Arc<dyn Storage>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            store,
            storage,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// True when clients send content through the API instead of a presigned URL
    pub fn accepts_proxied_content(&self) -> bool {
        self.storage.backend_type().accepts_proxied_content()
    }

    pub fn public_url(&self, asset_id: Uuid) -> String {
        format!(
            "{}{}/public/assets/{}",
            self.settings.public_base_url, API_PREFIX, asset_id
        )
    }

    fn content_url(&self, asset: &Asset) -> String {
        format!(
            "{}{}/assets/uploads/{}/content/{}",
            self.settings.public_base_url, API_PREFIX, asset.id, asset.purpose
        )
    }

    /// Stage a new upload, or replay the one recorded under the same idempotency key.
    #[tracing::instrument(
        skip(self, request),
        fields(tenant_id = %tenant_id, purpose = %purpose, operation = UPLOAD_CREATE_OPERATION)
    )]
    pub async fn create_upload(
        &self,
        tenant_id: Uuid,
        purpose: AssetPurpose,
        request: CreateUploadRequest,
    ) -> Result<CreateUploadResponse, AppError> {
        request.validate()?;

        let idempotency_key = normalize_idempotency_key(request.idempotency_key.as_deref())?;
        let file_name = request.file_name.trim().to_string();
        if file_name.is_empty() {
            return Err(AppError::Validation("fileName is required".to_string()));
        }

        // the allow-list and fingerprint see the normalized type; the asset keeps
        // the declared one, which uploaded content must match
        let content_type = request.content_type.trim().to_string();
        let normalized_type = normalize_content_type(&content_type);
        if !is_allowed_content_type(&normalized_type, &self.settings.allowed_content_types) {
            return Err(AppError::Validation(format!(
                "contentType '{}' is not allowed",
                request.content_type.trim()
            )));
        }

        let max = i64::try_from(self.settings.max_upload_bytes).unwrap_or(i64::MAX);
        if request.size_bytes > max {
            return Err(AppError::Validation(format!(
                "sizeBytes must be at most {}",
                max
            )));
        }

        let visibility = Visibility::Public;
        let claim = idempotency_key.map(|key| IdempotencyClaim {
            key,
            fingerprint: request_fingerprint(
                purpose,
                visibility,
                &file_name,
                &normalized_type,
                request.size_bytes,
            ),
        });

        // replays are reads: answer them before the rate limiter sees the request
        if let Some(ref claim) = claim {
            let existing = self
                .store
                .find_idempotency_record(tenant_id, UPLOAD_CREATE_OPERATION, &claim.key)
                .await?;
            match BeginOutcome::classify(existing.as_ref(), &claim.fingerprint) {
                BeginOutcome::Fresh => {}
                BeginOutcome::Conflict => return Err(AppError::IdempotencyConflict),
                BeginOutcome::Replayed(asset_id) => {
                    if let Some(asset) = self.store.get(tenant_id, asset_id).await? {
                        tracing::debug!(asset_id = %asset.id, "Replaying staged upload");
                        return self.creation_response(&asset).await;
                    }
                }
            }
        }

        let now = Utc::now();
        let asset_id = Uuid::new_v4();
        let expiry = chrono::Duration::from_std(self.settings.upload_expiry)
            .map_err(|e| AppError::Internal(format!("invalid upload expiry: {}", e)))?;
        let new_asset = NewAsset {
            id: asset_id,
            tenant_id,
            purpose,
            visibility,
            object_key: object_key(tenant_id, asset_id, &file_name),
            file_name,
            content_type,
            size_bytes: request.size_bytes,
            upload_expires_at: now + expiry,
            created_at: now,
        };

        let outcome = self
            .store
            .stage(StageRequest {
                operation: UPLOAD_CREATE_OPERATION.to_string(),
                claim,
                asset: new_asset,
                policy: self.settings.rate_limit,
                now,
            })
            .await?;

        match outcome {
            StageOutcome::Created(asset) => {
                tracing::info!(
                    asset_id = %asset.id,
                    size_bytes = asset.size_bytes,
                    content_type = %asset.content_type,
                    "Staged upload created"
                );
                self.creation_response(&asset).await
            }
            StageOutcome::Replayed(asset) => {
                tracing::debug!(asset_id = %asset.id, "Replaying staged upload");
                self.creation_response(&asset).await
            }
            StageOutcome::Conflict => Err(AppError::IdempotencyConflict),
            StageOutcome::RateLimited { retry_after } => {
                tracing::debug!(retry_after_ms = retry_after.as_millis() as u64, "Upload creation rate limited");
                Err(AppError::RateLimited { retry_after })
            }
        }
    }

    async fn creation_response(&self, asset: &Asset) -> Result<CreateUploadResponse, AppError> {
        Ok(CreateUploadResponse {
            asset_id: asset.id,
            status: asset.status,
            upload: self.upload_descriptor(asset).await?,
            public_url: self.public_url(asset.id),
            expires_at: asset.upload_expires_at,
        })
    }

    async fn upload_descriptor(&self, asset: &Asset) -> Result<UploadDescriptor, AppError> {
        let valid_for = (asset.upload_expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .max(Duration::from_secs(1));

        if let Some(presigned) = self
            .storage
            .presign_put(&asset.object_key, &asset.content_type, valid_for)
            .await?
        {
            return Ok(UploadDescriptor {
                method: presigned.method,
                url: presigned.url,
                headers: presigned.headers,
            });
        }

        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), asset.content_type.clone());
        Ok(UploadDescriptor {
            method: "PUT".to_string(),
            url: self.content_url(asset),
            headers,
        })
    }

    /// Tenant-scoped lookup that also enforces the route purpose
    async fn owned_asset(
        &self,
        tenant_id: Uuid,
        asset_id: Uuid,
        purpose: AssetPurpose,
    ) -> Result<Asset, AppError> {
        let asset = self
            .store
            .get(tenant_id, asset_id)
            .await?
            .ok_or_else(|| asset_not_found(asset_id))?;

        if asset.purpose != purpose {
            return Err(AppError::Forbidden(format!(
                "Asset was staged for {}, not {}",
                asset.purpose, purpose
            )));
        }
        Ok(asset)
    }

    /// Accept content bytes proxied through the API.
    ///
    /// The content type is checked before the body is read. The body is read up
    /// to one byte past the declared size, stored under a key derived from its
    /// digest, and only then recorded on the asset. A body read that fails or is
    /// cancelled leaves the asset untouched.
    #[tracing::instrument(skip(self, body), fields(tenant_id = %tenant_id, asset_id = %asset_id))]
    pub async fn receive_content<S>(
        &self,
        tenant_id: Uuid,
        asset_id: Uuid,
        purpose: AssetPurpose,
        content_type: &str,
        body: S,
    ) -> Result<Asset, AppError>
    where
        S: Stream<Item = Result<Bytes, AppError>> + Send + Unpin,
    {
        let asset = self.owned_asset(tenant_id, asset_id, purpose).await?;
        if asset.status == AssetStatus::Ready {
            tracing::debug!("Content upload for ready asset ignored");
            return Ok(asset);
        }
        ensure_upload_open(&asset, Utc::now())?;

        let verifier = ContentVerifier::for_asset(&asset);
        verifier.verify_type(content_type)?;

        let limit = u64::try_from(asset.size_bytes).unwrap_or(0) + 1;
        let data = read_limited(body, limit).await?;
        verifier.verify_size(data.len() as i64)?;

        let digest = sha256_hex(&data);
        let key = content_key(&asset.object_key, &digest);
        self.storage.put(&key, data, &asset.content_type).await?;

        let receipt = ContentReceipt {
            content_key: key.clone(),
            size_bytes: asset.size_bytes,
            content_type: asset.content_type.clone(),
            digest,
            received_at: Utc::now(),
        };

        let recorded = match self.store.record_content(tenant_id, asset_id, receipt).await {
            Ok(recorded) => recorded,
            Err(err) => {
                self.discard_blob(&key).await;
                return Err(err);
            }
        };

        match recorded {
            ContentRecorded::Recorded {
                asset,
                superseded_key,
            } => {
                if let Some(old_key) = superseded_key {
                    self.discard_blob(&old_key).await;
                }
                tracing::info!(
                    content_key = %key,
                    size_bytes = asset.size_bytes,
                    "Upload content received"
                );
                Ok(asset)
            }
            ContentRecorded::AlreadyReady(ready) => {
                if ready.content_key.as_deref() != Some(key.as_str()) {
                    self.discard_blob(&key).await;
                }
                Ok(ready)
            }
            ContentRecorded::NotFound => {
                self.discard_blob(&key).await;
                Err(asset_not_found(asset_id))
            }
        }
    }

    /// Verify the received content and mark the asset ready.
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant_id, asset_id = %asset_id))]
    pub async fn complete_upload(
        &self,
        tenant_id: Uuid,
        asset_id: Uuid,
        purpose: AssetPurpose,
    ) -> Result<CompleteUploadResponse, AppError> {
        let mut asset = self.owned_asset(tenant_id, asset_id, purpose).await?;
        if asset.status == AssetStatus::Ready {
            return self.completion_response(asset);
        }
        ensure_upload_open(&asset, Utc::now())?;
        self.throttle_completion(tenant_id).await?;

        for _ in 0..READY_SWAP_ATTEMPTS {
            if asset.status != AssetStatus::Ready {
                ensure_upload_open(&asset, Utc::now())?;
            }
            match asset.status {
                AssetStatus::Ready => return self.completion_response(asset),
                AssetStatus::Pending => {
                    asset = self.ingest_direct_upload(&asset).await?;
                    continue;
                }
                AssetStatus::ContentReceived => {}
            }

            let receipt = match self.verify_receipt(&asset).await {
                Ok(receipt) => receipt,
                Err(err) => {
                    let current = self.reload(tenant_id, asset_id).await?;
                    if current.status == AssetStatus::Ready
                        || current.content_digest != asset.content_digest
                    {
                        asset = current;
                        continue;
                    }
                    return Err(err);
                }
            };

            let public_url = self.public_url(asset_id);
            match self
                .store
                .mark_ready(tenant_id, asset_id, &receipt.digest, &public_url, Utc::now())
                .await?
            {
                Some(ready) => {
                    tracing::info!(content_key = %receipt.content_key, "Upload completed");
                    return self.completion_response(ready);
                }
                None => {
                    tracing::debug!("Content changed before completion, re-verifying");
                    asset = self.reload(tenant_id, asset_id).await?;
                }
            }
        }

        if asset.status == AssetStatus::Ready {
            return self.completion_response(asset);
        }
        Err(AppError::Timeout(
            "upload content kept changing during completion".to_string(),
        ))
    }

    async fn throttle_completion(&self, tenant_id: Uuid) -> Result<(), AppError> {
        match self
            .store
            .admit(
                tenant_id,
                UPLOAD_COMPLETE_OPERATION,
                &self.settings.complete_rate_limit,
                Utc::now(),
            )
            .await?
        {
            Admission::Allowed(_) => Ok(()),
            Admission::Denied { retry_after } => {
                tracing::debug!(
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Upload completion rate limited"
                );
                Err(AppError::RateLimited { retry_after })
            }
        }
    }

    async fn reload(&self, tenant_id: Uuid, asset_id: Uuid) -> Result<Asset, AppError> {
        self.store
            .get(tenant_id, asset_id)
            .await?
            .ok_or_else(|| asset_not_found(asset_id))
    }

    fn completion_response(&self, asset: Asset) -> Result<CompleteUploadResponse, AppError> {
        let public_url = asset
            .public_url
            .clone()
            .unwrap_or_else(|| self.public_url(asset.id));
        Ok(CompleteUploadResponse {
            asset_id: asset.id,
            status: asset.status,
            public_url,
        })
    }

    async fn with_verify_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        match tokio::time::timeout(self.settings.verify_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.settings.verify_timeout.as_millis() as u64,
                    "Content verification timed out"
                );
                Err(AppError::Timeout(format!(
                    "content verification timed out after {:?}",
                    self.settings.verify_timeout
                )))
            }
        }
    }

    /// Check the recorded receipt against the declaration and the stored blob.
    async fn verify_receipt(&self, asset: &Asset) -> Result<ContentReceipt, AppError> {
        let receipt = asset.receipt().ok_or(AppError::NotUploaded)?;
        let verifier = ContentVerifier::for_asset(asset);
        verifier.verify(receipt.size_bytes, &receipt.content_type)?;

        let stored = self
            .with_verify_timeout(async {
                self.storage
                    .head(&receipt.content_key)
                    .await
                    .map_err(AppError::from)
            })
            .await?;
        let info = stored.ok_or(AppError::NotUploaded)?;
        verifier.verify_size(i64::try_from(info.size_bytes).unwrap_or(i64::MAX))?;

        Ok(receipt)
    }

    /// Record a direct-to-bucket upload found at the object key.
    async fn ingest_direct_upload(&self, asset: &Asset) -> Result<Asset, AppError> {
        if self.accepts_proxied_content() {
            return Err(AppError::NotUploaded);
        }

        let Some(info) = self.storage.head(&asset.object_key).await? else {
            return Err(AppError::NotUploaded);
        };

        let verifier = ContentVerifier::for_asset(asset);
        let actual_type = info
            .content_type
            .as_deref()
            .map(|value| value.trim().to_string())
            .unwrap_or_else(|| asset.content_type.clone());
        verifier.verify(
            i64::try_from(info.size_bytes).unwrap_or(i64::MAX),
            &actual_type,
        )?;

        let limit = u64::try_from(asset.size_bytes).unwrap_or(0) + 1;
        let (size, digest) = self
            .with_verify_timeout(async {
                let stream = self.storage.download_stream(&asset.object_key).await?;
                hash_stream(stream, limit).await
            })
            .await?;
        verifier.verify_size(size)?;

        let receipt = ContentReceipt {
            content_key: asset.object_key.clone(),
            size_bytes: size,
            content_type: actual_type,
            digest,
            received_at: Utc::now(),
        };

        match self
            .store
            .record_content(asset.tenant_id, asset.id, receipt)
            .await?
        {
            ContentRecorded::Recorded {
                asset,
                superseded_key,
            } => {
                if let Some(old_key) = superseded_key {
                    self.discard_blob(&old_key).await;
                }
                tracing::info!(size_bytes = size, "Direct upload recorded");
                Ok(asset)
            }
            ContentRecorded::AlreadyReady(ready) => Ok(ready),
            ContentRecorded::NotFound => Err(asset_not_found(asset.id)),
        }
    }

    /// Best-effort removal of a blob no row references any more
    async fn discard_blob(&self, key: &str) {
        if let Err(e) = self.storage.delete(key).await {
            tracing::warn!(error = %e, key = %key, "Failed to delete unreferenced blob");
        }
    }

    /// A ready public asset, for unauthenticated reads
    pub async fn public_asset(&self, asset_id: Uuid) -> Result<Asset, AppError> {
        self.store
            .get_public(asset_id)
            .await?
            .ok_or_else(|| asset_not_found(asset_id))
    }

    /// Stream the stored content of a ready asset
    pub async fn open_content(&self, asset: &Asset) -> Result<ByteStream, AppError> {
        let key = asset
            .content_key
            .as_deref()
            .ok_or_else(|| asset_not_found(asset.id))?;
        Ok(self.storage.download_stream(key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use upstage_core::models::IdempotencyRecord;
    use upstage_db::InMemoryAssetStore;
    use upstage_storage::{LocalStorage, ObjectInfo, PresignedUpload, StorageError, StorageResult};
    use upstage_core::StorageBackend;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nabcd";

    fn settings(min_spacing: Duration) -> UploadSettings {
        UploadSettings {
            public_base_url: "http://localhost:3000".to_string(),
            max_upload_bytes: 1024,
            allowed_content_types: vec!["image/png".to_string(), "image/jpeg".to_string()],
            rate_limit: RateLimitPolicy {
                min_spacing,
                window: Duration::from_secs(60),
                max_in_window: 100,
            },
            complete_rate_limit: RateLimitPolicy {
                min_spacing: Duration::ZERO,
                window: Duration::from_secs(60),
                max_in_window: 100,
            },
            upload_expiry: Duration::from_secs(600),
            verify_timeout: Duration::from_secs(5),
        }
    }

    async fn local_service() -> (AssetUploadService, InMemoryAssetStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let store = InMemoryAssetStore::new();
        let service = AssetUploadService::new(
            Arc::new(store.clone()),
            Arc::new(storage),
            settings(Duration::ZERO),
        );
        (service, store, dir)
    }

    fn request(key: Option<&str>, size: i64) -> CreateUploadRequest {
        CreateUploadRequest {
            idempotency_key: key.map(str::to_string),
            file_name: "logo.png".to_string(),
            content_type: "image/png".to_string(),
            size_bytes: size,
        }
    }

    fn body(data: &'static [u8]) -> impl Stream<Item = Result<Bytes, AppError>> + Send + Unpin {
        stream::iter(vec![Ok(Bytes::from_static(data))])
    }

    #[tokio::test]
    async fn create_returns_local_descriptor_and_public_url() {
        let (service, _store, _dir) = local_service().await;
        let tenant = Uuid::new_v4();

        let created = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, request(Some("idem_1"), 12))
            .await
            .unwrap();

        assert_eq!(created.upload.method, "PUT");
        assert_eq!(
            created.upload.url,
            format!(
                "http://localhost:3000/api/v0/assets/uploads/{}/content/business_logo",
                created.asset_id
            )
        );
        assert_eq!(created.upload.headers["Content-Type"], "image/png");
        assert_eq!(created.status, AssetStatus::Pending);
        assert!(created.expires_at > Utc::now());
        assert_eq!(
            created.public_url,
            format!("http://localhost:3000/api/v0/public/assets/{}", created.asset_id)
        );
    }

    #[tokio::test]
    async fn same_key_replays_and_different_parameters_conflict() {
        let (service, store, _dir) = local_service().await;
        let tenant = Uuid::new_v4();

        let first = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, request(Some("idem_1"), 12))
            .await
            .unwrap();
        let again = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, request(Some("  idem_1 "), 12))
            .await
            .unwrap();
        assert_eq!(first.asset_id, again.asset_id);

        let err = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, request(Some("idem_1"), 13))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::IdempotencyConflict));
        assert_eq!(store.asset_count().await, 1);
    }

    #[tokio::test]
    async fn create_rejects_disallowed_type_and_oversized_declaration() {
        let (service, _store, _dir) = local_service().await;
        let tenant = Uuid::new_v4();

        let mut gif = request(None, 12);
        gif.content_type = "image/gif".to_string();
        assert!(matches!(
            service.create_upload(tenant, AssetPurpose::BusinessLogo, gif).await,
            Err(AppError::Validation(_))
        ));

        assert!(matches!(
            service
                .create_upload(tenant, AssetPurpose::BusinessLogo, request(None, 4096))
                .await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn second_creation_inside_spacing_is_rate_limited() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let service = AssetUploadService::new(
            Arc::new(InMemoryAssetStore::new()),
            Arc::new(storage),
            settings(Duration::from_secs(30)),
        );
        let tenant = Uuid::new_v4();

        let first = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, request(Some("a"), 12))
            .await
            .unwrap();
        let err = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, request(Some("b"), 12))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RateLimited { retry_after } if retry_after > Duration::ZERO));

        // a replay is not a new creation
        let replay = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, request(Some("a"), 12))
            .await
            .unwrap();
        assert_eq!(replay.asset_id, first.asset_id);
    }

    #[tokio::test]
    async fn full_flow_serves_exact_bytes() {
        let (service, _store, _dir) = local_service().await;
        let tenant = Uuid::new_v4();
        let created = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, request(Some("idem_1"), 12))
            .await
            .unwrap();

        let received = service
            .receive_content(tenant, created.asset_id, AssetPurpose::BusinessLogo, "image/png", body(PNG))
            .await
            .unwrap();
        assert_eq!(received.status, AssetStatus::ContentReceived);
        assert_eq!(received.content_digest.as_deref(), Some(sha256_hex(PNG).as_str()));

        let completed = service
            .complete_upload(tenant, created.asset_id, AssetPurpose::BusinessLogo)
            .await
            .unwrap();
        assert_eq!(completed.status, AssetStatus::Ready);
        assert_eq!(completed.public_url, created.public_url);

        let asset = service.public_asset(created.asset_id).await.unwrap();
        let mut content = service.open_content(&asset).await.unwrap();
        let mut served = Vec::new();
        while let Some(chunk) = futures::StreamExt::next(&mut content).await {
            served.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(served, PNG);
        assert_eq!(asset.content_type, "image/png");

        // retries after completion are no-ops
        let again = service
            .complete_upload(tenant, created.asset_id, AssetPurpose::BusinessLogo)
            .await
            .unwrap();
        assert_eq!(again.public_url, completed.public_url);
    }

    #[tokio::test]
    async fn complete_before_upload_is_not_uploaded() {
        let (service, _store, _dir) = local_service().await;
        let tenant = Uuid::new_v4();
        let created = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, request(None, 12))
            .await
            .unwrap();

        let err = service
            .complete_upload(tenant, created.asset_id, AssetPurpose::BusinessLogo)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotUploaded));
        assert!(matches!(
            service.public_asset(created.asset_id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn mismatched_content_leaves_asset_pending() {
        let (service, store, _dir) = local_service().await;
        let tenant = Uuid::new_v4();
        let created = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, request(None, 12))
            .await
            .unwrap();

        let short = service
            .receive_content(tenant, created.asset_id, AssetPurpose::BusinessLogo, "image/png", body(b"abc"))
            .await
            .unwrap_err();
        assert!(matches!(short, AppError::SizeMismatch { expected: 12, actual: 3 }));

        let long = service
            .receive_content(
                tenant,
                created.asset_id,
                AssetPurpose::BusinessLogo,
                "image/png",
                body(b"0123456789abcdef"),
            )
            .await
            .unwrap_err();
        assert!(matches!(long, AppError::SizeMismatch { expected: 12, actual: 13 }));

        let wrong_type = service
            .receive_content(tenant, created.asset_id, AssetPurpose::BusinessLogo, "image/jpeg", body(PNG))
            .await
            .unwrap_err();
        assert!(matches!(wrong_type, AppError::ContentTypeMismatch { .. }));

        let asset = store.get(tenant, created.asset_id).await.unwrap().unwrap();
        assert_eq!(asset.status, AssetStatus::Pending);
        assert!(matches!(
            service
                .complete_upload(tenant, created.asset_id, AssetPurpose::BusinessLogo)
                .await,
            Err(AppError::NotUploaded)
        ));
    }

    #[tokio::test]
    async fn foreign_tenant_and_wrong_purpose_are_rejected() {
        let (service, _store, _dir) = local_service().await;
        let owner = Uuid::new_v4();
        let created = service
            .create_upload(owner, AssetPurpose::BusinessLogo, request(None, 12))
            .await
            .unwrap();

        let foreign = service
            .receive_content(Uuid::new_v4(), created.asset_id, AssetPurpose::BusinessLogo, "image/png", body(PNG))
            .await
            .unwrap_err();
        assert!(matches!(foreign, AppError::NotFound(_)));

        let wrong_purpose = service
            .complete_upload(owner, created.asset_id, AssetPurpose::ProductPhoto)
            .await
            .unwrap_err();
        assert!(matches!(wrong_purpose, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn reupload_replaces_previous_content_blob() {
        let (service, _store, dir) = local_service().await;
        let tenant = Uuid::new_v4();
        let created = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, request(None, 4))
            .await
            .unwrap();

        let first = service
            .receive_content(tenant, created.asset_id, AssetPurpose::BusinessLogo, "image/png", body(b"aaaa"))
            .await
            .unwrap();
        let second = service
            .receive_content(tenant, created.asset_id, AssetPurpose::BusinessLogo, "image/png", body(b"bbbb"))
            .await
            .unwrap();

        let first_key = first.content_key.unwrap();
        let second_key = second.content_key.unwrap();
        assert_ne!(first_key, second_key);
        assert!(!dir.path().join(&first_key).exists());
        assert!(dir.path().join(&second_key).exists());
    }

    /// Bucket-like backend: clients PUT directly to a presigned URL.
    #[derive(Default)]
    struct DirectBucket {
        objects: Mutex<HashMap<String, (Bytes, String)>>,
    }

    impl DirectBucket {
        fn client_put(&self, key: &str, data: &'static [u8], content_type: &str) {
            self.objects.lock().unwrap().insert(
                key.to_string(),
                (Bytes::from_static(data), content_type.to_string()),
            );
        }
    }

    #[async_trait]
    impl Storage for DirectBucket {
        async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), (data, content_type.to_string()));
            Ok(())
        }

        async fn head(&self, key: &str) -> StorageResult<Option<ObjectInfo>> {
            Ok(self.objects.lock().unwrap().get(key).map(|(data, ct)| ObjectInfo {
                size_bytes: data.len() as u64,
                content_type: Some(ct.clone()),
            }))
        }

        async fn download_stream(&self, key: &str) -> StorageResult<ByteStream> {
            let data = self
                .objects
                .lock()
                .unwrap()
                .get(key)
                .map(|(data, _)| data.clone())
                .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
            Ok(Box::pin(stream::iter(vec![Ok(data)])))
        }

        async fn delete(&self, key: &str) -> StorageResult<()> {
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }

        async fn presign_put(
            &self,
            key: &str,
            content_type: &str,
            _expires_in: Duration,
        ) -> StorageResult<Option<PresignedUpload>> {
            let mut headers = BTreeMap::new();
            headers.insert("Content-Type".to_string(), content_type.to_string());
            Ok(Some(PresignedUpload {
                method: "PUT".to_string(),
                url: format!("https://bucket.example/{}?sig=1", key),
                headers,
            }))
        }

        fn backend_type(&self) -> StorageBackend {
            StorageBackend::S3
        }
    }

    #[tokio::test]
    async fn direct_upload_is_verified_at_completion() {
        let bucket = Arc::new(DirectBucket::default());
        let store = InMemoryAssetStore::new();
        let service = AssetUploadService::new(
            Arc::new(store.clone()),
            bucket.clone(),
            settings(Duration::ZERO),
        );
        let tenant = Uuid::new_v4();
        let created = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, request(None, 12))
            .await
            .unwrap();
        assert!(created.upload.url.starts_with("https://bucket.example/tenants/"));

        assert!(matches!(
            service
                .complete_upload(tenant, created.asset_id, AssetPurpose::BusinessLogo)
                .await,
            Err(AppError::NotUploaded)
        ));

        let asset = store.get(tenant, created.asset_id).await.unwrap().unwrap();
        bucket.client_put(&asset.object_key, PNG, "image/png");

        let completed = service
            .complete_upload(tenant, created.asset_id, AssetPurpose::BusinessLogo)
            .await
            .unwrap();
        assert_eq!(completed.status, AssetStatus::Ready);

        let ready = store.get(tenant, created.asset_id).await.unwrap().unwrap();
        assert_eq!(ready.content_key.as_deref(), Some(asset.object_key.as_str()));
        assert_eq!(ready.content_digest.as_deref(), Some(sha256_hex(PNG).as_str()));
    }

    #[tokio::test]
    async fn direct_upload_with_wrong_size_fails_verification() {
        let bucket = Arc::new(DirectBucket::default());
        let store = InMemoryAssetStore::new();
        let service = AssetUploadService::new(
            Arc::new(store.clone()),
            bucket.clone(),
            settings(Duration::ZERO),
        );
        let tenant = Uuid::new_v4();
        let created = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, request(None, 12))
            .await
            .unwrap();
        let asset = store.get(tenant, created.asset_id).await.unwrap().unwrap();
        bucket.client_put(&asset.object_key, b"abc", "image/png");

        let err = service
            .complete_upload(tenant, created.asset_id, AssetPurpose::BusinessLogo)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SizeMismatch { expected: 12, actual: 3 }));
    }

    #[tokio::test]
    async fn declared_jpg_rejects_jpeg_content() {
        let (service, store, _dir) = local_service().await;
        let tenant = Uuid::new_v4();
        let mut jpg = request(None, 12);
        jpg.content_type = " image/jpg ".to_string();

        let created = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, jpg)
            .await
            .unwrap();
        assert_eq!(created.upload.headers["Content-Type"], "image/jpg");

        let err = service
            .receive_content(tenant, created.asset_id, AssetPurpose::BusinessLogo, "image/jpeg", body(PNG))
            .await
            .unwrap_err();
        match err {
            AppError::ContentTypeMismatch { expected, actual } => {
                assert_eq!(expected, "image/jpg");
                assert_eq!(actual, "image/jpeg");
            }
            other => panic!("unexpected {:?}", other),
        }
        let asset = store.get(tenant, created.asset_id).await.unwrap().unwrap();
        assert_eq!(asset.status, AssetStatus::Pending);

        service
            .receive_content(tenant, created.asset_id, AssetPurpose::BusinessLogo, "IMAGE/JPG", body(PNG))
            .await
            .unwrap();
    }

    async fn age_upload(store: &InMemoryAssetStore, tenant: Uuid, asset_id: Uuid) {
        let mut asset = store.get(tenant, asset_id).await.unwrap().unwrap();
        asset.upload_expires_at = Utc::now() - chrono::Duration::seconds(1);
        store.put_asset(asset).await;
    }

    #[tokio::test]
    async fn expired_upload_rejects_content_and_completion() {
        let (service, store, _dir) = local_service().await;
        let tenant = Uuid::new_v4();
        let created = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, request(None, 12))
            .await
            .unwrap();
        service
            .receive_content(tenant, created.asset_id, AssetPurpose::BusinessLogo, "image/png", body(PNG))
            .await
            .unwrap();
        age_upload(&store, tenant, created.asset_id).await;

        let complete = service
            .complete_upload(tenant, created.asset_id, AssetPurpose::BusinessLogo)
            .await
            .unwrap_err();
        assert!(matches!(complete, AppError::UploadExpired { .. }));

        let content = service
            .receive_content(tenant, created.asset_id, AssetPurpose::BusinessLogo, "image/png", body(PNG))
            .await
            .unwrap_err();
        assert!(matches!(content, AppError::UploadExpired { .. }));

        let asset = store.get(tenant, created.asset_id).await.unwrap().unwrap();
        assert_eq!(asset.status, AssetStatus::ContentReceived);
        assert!(service.public_asset(created.asset_id).await.is_err());
    }

    #[tokio::test]
    async fn ready_asset_stays_ready_after_expiry() {
        let (service, store, _dir) = local_service().await;
        let tenant = Uuid::new_v4();
        let created = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, request(None, 12))
            .await
            .unwrap();
        service
            .receive_content(tenant, created.asset_id, AssetPurpose::BusinessLogo, "image/png", body(PNG))
            .await
            .unwrap();
        service
            .complete_upload(tenant, created.asset_id, AssetPurpose::BusinessLogo)
            .await
            .unwrap();
        age_upload(&store, tenant, created.asset_id).await;

        let again = service
            .complete_upload(tenant, created.asset_id, AssetPurpose::BusinessLogo)
            .await
            .unwrap();
        assert_eq!(again.status, AssetStatus::Ready);
    }

    #[tokio::test]
    async fn completion_inside_spacing_is_rate_limited() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let mut throttled = settings(Duration::ZERO);
        throttled.complete_rate_limit.min_spacing = Duration::from_secs(30);
        let service = AssetUploadService::new(
            Arc::new(InMemoryAssetStore::new()),
            Arc::new(storage),
            throttled,
        );
        let tenant = Uuid::new_v4();

        let mut ids = Vec::new();
        for _ in 0..2 {
            let created = service
                .create_upload(tenant, AssetPurpose::BusinessLogo, request(None, 12))
                .await
                .unwrap();
            service
                .receive_content(tenant, created.asset_id, AssetPurpose::BusinessLogo, "image/png", body(PNG))
                .await
                .unwrap();
            ids.push(created.asset_id);
        }

        service
            .complete_upload(tenant, ids[0], AssetPurpose::BusinessLogo)
            .await
            .unwrap();
        let err = service
            .complete_upload(tenant, ids[1], AssetPurpose::BusinessLogo)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RateLimited { retry_after } if retry_after > Duration::ZERO));

        // repeat completion of a ready asset is a read
        let ready = service
            .complete_upload(tenant, ids[0], AssetPurpose::BusinessLogo)
            .await
            .unwrap();
        assert_eq!(ready.status, AssetStatus::Ready);

        // other tenants have their own window
        let other = Uuid::new_v4();
        let created = service
            .create_upload(other, AssetPurpose::BusinessLogo, request(None, 12))
            .await
            .unwrap();
        service
            .receive_content(other, created.asset_id, AssetPurpose::BusinessLogo, "image/png", body(PNG))
            .await
            .unwrap();
        service
            .complete_upload(other, created.asset_id, AssetPurpose::BusinessLogo)
            .await
            .unwrap();
    }

    /// In-memory store with hooks into the receipt and swap steps.
    #[derive(Default)]
    struct HookedStore {
        inner: InMemoryAssetStore,
        /// Recorded right before the next swap attempt, as if a concurrent upload landed
        interleaved: Mutex<Option<ContentReceipt>>,
        lose_every_swap: bool,
        fail_receipts: bool,
        swap_attempts: AtomicUsize,
    }

    #[async_trait]
    impl AssetStore for HookedStore {
        async fn find_idempotency_record(
            &self,
            tenant_id: Uuid,
            operation: &str,
            idempotency_key: &str,
        ) -> Result<Option<IdempotencyRecord>, AppError> {
            self.inner
                .find_idempotency_record(tenant_id, operation, idempotency_key)
                .await
        }

        async fn stage(&self, request: StageRequest) -> Result<StageOutcome, AppError> {
            self.inner.stage(request).await
        }

        async fn get(&self, tenant_id: Uuid, asset_id: Uuid) -> Result<Option<Asset>, AppError> {
            self.inner.get(tenant_id, asset_id).await
        }

        async fn get_public(&self, asset_id: Uuid) -> Result<Option<Asset>, AppError> {
            self.inner.get_public(asset_id).await
        }

        async fn record_content(
            &self,
            tenant_id: Uuid,
            asset_id: Uuid,
            receipt: ContentReceipt,
        ) -> Result<ContentRecorded, AppError> {
            if self.fail_receipts {
                return Err(AppError::Internal("receipt write failed".to_string()));
            }
            self.inner.record_content(tenant_id, asset_id, receipt).await
        }

        async fn mark_ready(
            &self,
            tenant_id: Uuid,
            asset_id: Uuid,
            expected_digest: &str,
            public_url: &str,
            now: DateTime<Utc>,
        ) -> Result<Option<Asset>, AppError> {
            self.swap_attempts.fetch_add(1, Ordering::SeqCst);
            if self.lose_every_swap {
                return Ok(None);
            }
            let interleaved = self.interleaved.lock().unwrap().take();
            if let Some(receipt) = interleaved {
                self.inner.record_content(tenant_id, asset_id, receipt).await?;
            }
            self.inner
                .mark_ready(tenant_id, asset_id, expected_digest, public_url, now)
                .await
        }

        async fn admit(
            &self,
            tenant_id: Uuid,
            operation: &str,
            policy: &RateLimitPolicy,
            now: DateTime<Utc>,
        ) -> Result<Admission, AppError> {
            self.inner.admit(tenant_id, operation, policy, now).await
        }

        async fn list_expired_unfinished(
            &self,
            now: DateTime<Utc>,
            limit: i64,
        ) -> Result<Vec<Asset>, AppError> {
            self.inner.list_expired_unfinished(now, limit).await
        }

        async fn delete_expired_unfinished(
            &self,
            tenant_id: Uuid,
            asset_id: Uuid,
            now: DateTime<Utc>,
        ) -> Result<bool, AppError> {
            self.inner
                .delete_expired_unfinished(tenant_id, asset_id, now)
                .await
        }

        async fn ping(&self) -> Result<(), AppError> {
            Ok(())
        }
    }

    async fn hooked_service(
        store: Arc<HookedStore>,
    ) -> (AssetUploadService, Arc<LocalStorage>, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let service = AssetUploadService::new(store, storage.clone(), settings(Duration::ZERO));
        (service, storage, dir)
    }

    #[tokio::test]
    async fn failed_receipt_write_discards_stored_blob() {
        let store = Arc::new(HookedStore {
            fail_receipts: true,
            ..HookedStore::default()
        });
        let (service, _storage, dir) = hooked_service(store.clone()).await;
        let tenant = Uuid::new_v4();
        let created = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, request(None, 12))
            .await
            .unwrap();

        let err = service
            .receive_content(tenant, created.asset_id, AssetPurpose::BusinessLogo, "image/png", body(PNG))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));

        let asset = store.get(tenant, created.asset_id).await.unwrap().unwrap();
        assert_eq!(asset.status, AssetStatus::Pending);
        let key = content_key(&asset.object_key, &sha256_hex(PNG));
        assert!(!dir.path().join(&key).exists());
    }

    #[tokio::test]
    async fn completion_reverifies_content_replaced_mid_swap() {
        const REPLACEMENT: &[u8] = b"0123456789ab";

        let store = Arc::new(HookedStore::default());
        let (service, storage, _dir) = hooked_service(store.clone()).await;
        let tenant = Uuid::new_v4();
        let created = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, request(None, 12))
            .await
            .unwrap();
        let first = service
            .receive_content(tenant, created.asset_id, AssetPurpose::BusinessLogo, "image/png", body(PNG))
            .await
            .unwrap();

        let digest = sha256_hex(REPLACEMENT);
        let key = content_key(&first.object_key, &digest);
        storage
            .put(&key, Bytes::from_static(REPLACEMENT), "image/png")
            .await
            .unwrap();
        *store.interleaved.lock().unwrap() = Some(ContentReceipt {
            content_key: key.clone(),
            size_bytes: 12,
            content_type: "image/png".to_string(),
            digest: digest.clone(),
            received_at: Utc::now(),
        });

        let completed = service
            .complete_upload(tenant, created.asset_id, AssetPurpose::BusinessLogo)
            .await
            .unwrap();
        assert_eq!(completed.status, AssetStatus::Ready);
        assert_eq!(store.swap_attempts.load(Ordering::SeqCst), 2);

        let ready = store.get(tenant, created.asset_id).await.unwrap().unwrap();
        assert_eq!(ready.content_digest.as_deref(), Some(digest.as_str()));
        assert_eq!(ready.content_key.as_deref(), Some(key.as_str()));
    }

    #[tokio::test]
    async fn completion_gives_up_when_every_swap_loses() {
        let store = Arc::new(HookedStore {
            lose_every_swap: true,
            ..HookedStore::default()
        });
        let (service, _storage, _dir) = hooked_service(store.clone()).await;
        let tenant = Uuid::new_v4();
        let created = service
            .create_upload(tenant, AssetPurpose::BusinessLogo, request(None, 12))
            .await
            .unwrap();
        service
            .receive_content(tenant, created.asset_id, AssetPurpose::BusinessLogo, "image/png", body(PNG))
            .await
            .unwrap();

        let err = service
            .complete_upload(tenant, created.asset_id, AssetPurpose::BusinessLogo)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
        assert_eq!(store.swap_attempts.load(Ordering::SeqCst), READY_SWAP_ATTEMPTS);

        let asset = store.get(tenant, created.asset_id).await.unwrap().unwrap();
        assert_eq!(asset.status, AssetStatus::ContentReceived);
    }
}
