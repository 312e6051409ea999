//! Staged asset persistence
//!
//! [`AssetStore`] owns three tables that must change together: the staged
//! assets, the idempotency ledger and the rate-limit windows. Creation applies
//! the rate limit, inserts the asset and records the ledger entry as one atomic
//! step, so a resource never exists without its ledger entry when a key was
//! supplied.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use upstage_core::models::{Asset, ContentReceipt, IdempotencyClaim, IdempotencyRecord, NewAsset};
use upstage_core::{Admission, AppError, RateLimitPolicy};
use uuid::Uuid;

pub use memory::InMemoryAssetStore;
pub use postgres::PgAssetStore;

/// Everything needed to create one staged asset.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub operation: String,
    /// Normalized idempotency key and request fingerprint, when the client sent a key
    pub claim: Option<IdempotencyClaim>,
    pub asset: NewAsset,
    pub policy: RateLimitPolicy,
    pub now: DateTime<Utc>,
}

impl StageRequest {
    pub fn tenant_id(&self) -> Uuid {
        self.asset.tenant_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// New asset created and, when keyed, recorded in the ledger
    Created(Asset),
    /// The key was already recorded with the same fingerprint
    Replayed(Asset),
    /// The key was already recorded with a different fingerprint
    Conflict,
    RateLimited { retry_after: Duration },
}

/// Result of recording uploaded content against an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentRecorded {
    /// Receipt stored. `superseded_key` is the previous content blob, now unreferenced.
    Recorded {
        asset: Asset,
        superseded_key: Option<String>,
    },
    /// The asset is already ready; nothing changed
    AlreadyReady(Asset),
    NotFound,
}

/// Persistence seam for the staged upload protocol.
///
/// Every lookup that takes a `tenant_id` is scoped by it; a foreign asset id
/// behaves exactly like a missing one.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Read the ledger entry for a key, if any
    async fn find_idempotency_record(
        &self,
        tenant_id: Uuid,
        operation: &str,
        idempotency_key: &str,
    ) -> Result<Option<IdempotencyRecord>, AppError>;

    /// Rate-limit, create and record one asset atomically
    async fn stage(&self, request: StageRequest) -> Result<StageOutcome, AppError>;

    async fn get(&self, tenant_id: Uuid, asset_id: Uuid) -> Result<Option<Asset>, AppError>;

    /// A ready, public asset by id, regardless of tenant
    async fn get_public(&self, asset_id: Uuid) -> Result<Option<Asset>, AppError>;

    /// Store a content receipt under a row lock and move the asset to `content_received`.
    ///
    /// Ready assets are left untouched.
    async fn record_content(
        &self,
        tenant_id: Uuid,
        asset_id: Uuid,
        receipt: ContentReceipt,
    ) -> Result<ContentRecorded, AppError>;

    /// Compare-and-swap `content_received` to `ready`.
    ///
    /// Applies only while the stored digest still equals `expected_digest` and
    /// the upload window is still open at `now`. Returns `None` when the row no
    /// longer matches.
    async fn mark_ready(
        &self,
        tenant_id: Uuid,
        asset_id: Uuid,
        expected_digest: &str,
        public_url: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Asset>, AppError>;

    /// Apply a rate limit for one (tenant, operation) pair outside of creation
    async fn admit(
        &self,
        tenant_id: Uuid,
        operation: &str,
        policy: &RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> Result<Admission, AppError>;

    /// Unfinished assets whose upload window closed before `now`, oldest expiry first
    async fn list_expired_unfinished(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Asset>, AppError>;

    /// Delete an asset if it is still unfinished and expired. Its ledger entry goes with it.
    async fn delete_expired_unfinished(
        &self,
        tenant_id: Uuid,
        asset_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Connectivity probe for readiness checks
    async fn ping(&self) -> Result<(), AppError>;
}

/// Superseded blob key, unless the new receipt reuses it
pub(crate) fn superseded_key(previous: Option<String>, current: &str) -> Option<String> {
    previous.filter(|key| key != current)
}
