//! Database repositories for data access layer
//!
//! `assets/` holds the staged upload store (assets, idempotency ledger and rate
//! limit windows, which change together). `control/` holds tenant and API key
//! lookup.
//
// Staged asset store
pub mod assets;
//
// Tenants and API keys
pub mod control;
//
pub mod factory;
pub mod pool;
//
// Transaction utilities
pub mod transaction;

pub use assets::{
    AssetStore, ContentRecorded, InMemoryAssetStore, PgAssetStore, StageOutcome, StageRequest,
};
pub use control::{InMemoryTenantDirectory, PgTenantDirectory, TenantDirectory};
pub use factory::{create_stores, Stores};
pub use transaction::TransactionGuard;
