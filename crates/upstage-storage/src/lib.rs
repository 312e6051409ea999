//! Upstage Storage Library
//!
//! Blob storage abstraction with S3 and local filesystem implementations.
//!
//! # Storage key format
//!
//! Keys are tenant-scoped and shared by every backend:
//!
//! - **Declared location**: `tenants/{tenant_id}/assets/{asset_id}/{sanitized_file_name}`
//! - **Received content**: `{declared location}.{first 16 hex chars of the sha256 digest}`
//!
//! Keys must not contain `..` or a leading `/`. Key generation lives in
//! `upstage_core::validation` so the service and every backend agree.

pub mod factory;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod timeout;
pub mod traits;

pub use factory::create_storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use timeout::TimeoutStorage;
pub use traits::{ByteStream, ObjectInfo, PresignedUpload, Storage, StorageError, StorageResult};
pub use upstage_core::StorageBackend;
