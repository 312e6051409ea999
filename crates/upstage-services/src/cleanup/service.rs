use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use upstage_core::constants::GC_PENDING_LIMIT;
use upstage_core::models::Asset;
use upstage_core::AppError;
use upstage_db::AssetStore;
use upstage_storage::Storage;

#[derive(Debug, Clone)]
pub struct GcOptions {
    pub now: DateTime<Utc>,
    /// Maximum expired uploads examined in one run
    pub pending_limit: i64,
    /// Count candidates without deleting anything
    pub dry_run: bool,
}

impl Default for GcOptions {
    fn default() -> Self {
        Self {
            now: Utc::now(),
            pending_limit: GC_PENDING_LIMIT,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcResult {
    pub expired_pending_candidates: usize,
    pub deleted_assets: usize,
    pub deleted_blobs: usize,
    pub errors: Vec<String>,
}

/// Removes uploads that were staged but never completed before their window closed.
#[derive(Clone)]
pub struct AssetGarbageCollector {
    store: Arc<dyn AssetStore>,
    storage: Arc<dyn Storage>,
}

impl AssetGarbageCollector {
    pub fn new(store: Arc<dyn AssetStore>, storage: Arc<dyn Storage>) -> Self {
        Self { store, storage }
    }

    #[tracing::instrument(skip(self), fields(gc.operation = "expired_uploads"))]
    pub async fn run(&self, options: GcOptions) -> Result<GcResult, AppError> {
        let candidates = self
            .store
            .list_expired_unfinished(options.now, options.pending_limit)
            .await?;

        let mut result = GcResult {
            expired_pending_candidates: candidates.len(),
            ..GcResult::default()
        };

        if options.dry_run {
            tracing::info!(
                candidates = result.expired_pending_candidates,
                "Dry run, nothing deleted"
            );
            return Ok(result);
        }

        for asset in candidates {
            self.collect(&asset, options.now, &mut result).await;
        }

        tracing::info!(
            candidates = result.expired_pending_candidates,
            deleted_assets = result.deleted_assets,
            deleted_blobs = result.deleted_blobs,
            errors = result.errors.len(),
            "Expired upload cleanup completed"
        );

        Ok(result)
    }

    async fn collect(&self, asset: &Asset, now: DateTime<Utc>, result: &mut GcResult) {
        tracing::info!(
            asset_id = %asset.id,
            tenant_id = %asset.tenant_id,
            status = %asset.status,
            expires_at = %asset.upload_expires_at,
            "Deleting expired upload"
        );

        for key in asset.storage_keys() {
            match self.storage.delete(&key).await {
                Ok(()) => result.deleted_blobs += 1,
                Err(e) => {
                    tracing::warn!(error = %e, key = %key, "Failed to delete blob");
                    result
                        .errors
                        .push(format!("asset {}: delete blob {}: {}", asset.id, key, e));
                    // keep the row so the next run retries the blob
                    return;
                }
            }
        }

        match self
            .store
            .delete_expired_unfinished(asset.tenant_id, asset.id, now)
            .await
        {
            Ok(true) => result.deleted_assets += 1,
            Ok(false) => {
                tracing::debug!(asset_id = %asset.id, "Upload completed or removed concurrently");
            }
            Err(e) => {
                tracing::error!(error = %e, asset_id = %asset.id, "Failed to delete expired upload");
                result
                    .errors
                    .push(format!("asset {}: delete row: {}", asset.id, e));
            }
        }
    }
}
