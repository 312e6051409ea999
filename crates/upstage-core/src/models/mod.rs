//! Data models for the upload service
//!
//! Staged assets, idempotency ledger records, tenants and the HTTP DTOs of the
//! upload protocol.

mod asset;
mod idempotency;
mod tenant;
mod upload;

pub use asset::{
    Asset, AssetPurpose, AssetStatus, ContentReceipt, NewAsset, Visibility,
};
pub use idempotency::{
    BeginOutcome, IdempotencyClaim, IdempotencyRecord, UPLOAD_COMPLETE_OPERATION,
    UPLOAD_CREATE_OPERATION,
};
pub use tenant::{ApiKey, Tenant, TenantStatus, API_KEY_PREFIX};
pub use upload::{
    CompleteUploadResponse, CreateUploadRequest, CreateUploadResponse, UploadDescriptor,
};
