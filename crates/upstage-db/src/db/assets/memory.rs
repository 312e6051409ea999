//! In-memory [`AssetStore`] for tests and single-process local runs.

use super::{superseded_key, AssetStore, ContentRecorded, StageOutcome, StageRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use upstage_core::models::{
    Asset, AssetStatus, BeginOutcome, ContentReceipt, IdempotencyRecord,
};
use upstage_core::{Admission, AppError, RateLimitPolicy, RateLimitWindow};
use uuid::Uuid;

type LedgerKey = (Uuid, String, String);

#[derive(Default)]
struct State {
    assets: HashMap<Uuid, Asset>,
    ledger: HashMap<LedgerKey, IdempotencyRecord>,
    windows: HashMap<(Uuid, String), RateLimitWindow>,
}

impl State {
    fn replay(&self, tenant_id: Uuid, operation: &str, key: &str, fingerprint: &str) -> Option<StageOutcome> {
        let record = self
            .ledger
            .get(&(tenant_id, operation.to_string(), key.to_string()))?;
        match BeginOutcome::classify(Some(record), fingerprint) {
            BeginOutcome::Replayed(asset_id) => self
                .assets
                .get(&asset_id)
                .cloned()
                .map(StageOutcome::Replayed),
            BeginOutcome::Conflict => Some(StageOutcome::Conflict),
            BeginOutcome::Fresh => None,
        }
    }

    fn owned_mut(&mut self, tenant_id: Uuid, asset_id: Uuid) -> Option<&mut Asset> {
        self.assets
            .get_mut(&asset_id)
            .filter(|asset| asset.tenant_id == tenant_id)
    }
}

/// All state sits behind one mutex, so each operation is atomic.
#[derive(Clone, Default)]
pub struct InMemoryAssetStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored assets across all tenants
    pub async fn asset_count(&self) -> usize {
        self.state.lock().await.assets.len()
    }

    /// Overwrite an asset row; used to age uploads in tests
    pub async fn put_asset(&self, asset: Asset) {
        self.state.lock().await.assets.insert(asset.id, asset);
    }
}

#[async_trait]
impl AssetStore for InMemoryAssetStore {
    async fn find_idempotency_record(
        &self,
        tenant_id: Uuid,
        operation: &str,
        idempotency_key: &str,
    ) -> Result<Option<IdempotencyRecord>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .ledger
            .get(&(tenant_id, operation.to_string(), idempotency_key.to_string()))
            .cloned())
    }

    async fn stage(&self, request: StageRequest) -> Result<StageOutcome, AppError> {
        let mut state = self.state.lock().await;
        let tenant_id = request.tenant_id();

        if let Some(ref claim) = request.claim {
            if let Some(outcome) =
                state.replay(tenant_id, &request.operation, &claim.key, &claim.fingerprint)
            {
                return Ok(outcome);
            }
        }

        let window_key = (tenant_id, request.operation.clone());
        let next_window = match request
            .policy
            .admit(state.windows.get(&window_key), request.now)
        {
            Admission::Allowed(window) => window,
            Admission::Denied { retry_after } => {
                return Ok(StageOutcome::RateLimited { retry_after })
            }
        };

        let asset = request.asset.into_asset();
        if state.assets.contains_key(&asset.id) {
            return Err(AppError::Internal(format!(
                "asset id collision: {}",
                asset.id
            )));
        }

        state.windows.insert(window_key, next_window);
        if let Some(claim) = request.claim {
            state.ledger.insert(
                (tenant_id, request.operation.clone(), claim.key.clone()),
                IdempotencyRecord {
                    tenant_id,
                    operation: request.operation,
                    idempotency_key: claim.key,
                    request_fingerprint: claim.fingerprint,
                    resource_id: asset.id,
                    created_at: request.now,
                },
            );
        }
        state.assets.insert(asset.id, asset.clone());

        Ok(StageOutcome::Created(asset))
    }

    async fn get(&self, tenant_id: Uuid, asset_id: Uuid) -> Result<Option<Asset>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .assets
            .get(&asset_id)
            .filter(|asset| asset.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_public(&self, asset_id: Uuid) -> Result<Option<Asset>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .assets
            .get(&asset_id)
            .filter(|asset| asset.is_publicly_servable())
            .cloned())
    }

    async fn record_content(
        &self,
        tenant_id: Uuid,
        asset_id: Uuid,
        receipt: ContentReceipt,
    ) -> Result<ContentRecorded, AppError> {
        let mut state = self.state.lock().await;
        let Some(asset) = state.owned_mut(tenant_id, asset_id) else {
            return Ok(ContentRecorded::NotFound);
        };

        if asset.status == AssetStatus::Ready {
            return Ok(ContentRecorded::AlreadyReady(asset.clone()));
        }

        let previous = asset.content_key.replace(receipt.content_key.clone());
        asset.status = AssetStatus::ContentReceived;
        asset.received_size_bytes = Some(receipt.size_bytes);
        asset.received_content_type = Some(receipt.content_type);
        asset.content_digest = Some(receipt.digest);
        asset.content_received_at = Some(receipt.received_at);
        asset.updated_at = receipt.received_at;

        Ok(ContentRecorded::Recorded {
            asset: asset.clone(),
            superseded_key: superseded_key(previous, &receipt.content_key),
        })
    }

    async fn mark_ready(
        &self,
        tenant_id: Uuid,
        asset_id: Uuid,
        expected_digest: &str,
        public_url: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Asset>, AppError> {
        let mut state = self.state.lock().await;
        let Some(asset) = state.owned_mut(tenant_id, asset_id) else {
            return Ok(None);
        };

        if asset.status != AssetStatus::ContentReceived
            || asset.content_digest.as_deref() != Some(expected_digest)
            || asset.upload_expires_at < now
        {
            return Ok(None);
        }

        asset.status = AssetStatus::Ready;
        asset.public_url = Some(public_url.to_string());
        asset.completed_at = Some(now);
        asset.updated_at = now;
        Ok(Some(asset.clone()))
    }

    async fn admit(
        &self,
        tenant_id: Uuid,
        operation: &str,
        policy: &RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> Result<Admission, AppError> {
        let mut state = self.state.lock().await;
        let window_key = (tenant_id, operation.to_string());
        let admission = policy.admit(state.windows.get(&window_key), now);
        if let Admission::Allowed(window) = &admission {
            state.windows.insert(window_key, *window);
        }
        Ok(admission)
    }

    async fn list_expired_unfinished(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Asset>, AppError> {
        let state = self.state.lock().await;
        let mut expired: Vec<Asset> = state
            .assets
            .values()
            .filter(|asset| asset.status != AssetStatus::Ready && asset.upload_expires_at < now)
            .cloned()
            .collect();
        expired.sort_by_key(|asset| asset.upload_expires_at);
        expired.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(expired)
    }

    async fn delete_expired_unfinished(
        &self,
        tenant_id: Uuid,
        asset_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        let deletable = state.assets.get(&asset_id).is_some_and(|asset| {
            asset.tenant_id == tenant_id
                && asset.status != AssetStatus::Ready
                && asset.upload_expires_at < now
        });
        if !deletable {
            return Ok(false);
        }

        state.assets.remove(&asset_id);
        state.ledger.retain(|_, record| record.resource_id != asset_id);
        Ok(true)
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}
