//! upstage Services Layer
//!
//! Orchestration of the staged upload protocol over the store and blob storage
//! seams, plus garbage collection of abandoned uploads. HTTP handling stays in
//! upstage-api; this crate has no web dependencies.

pub mod cleanup;
pub mod uploads;

pub use cleanup::{AssetGarbageCollector, GcOptions, GcResult};
pub use upstage_storage::{
    create_storage, Storage, StorageBackend, StorageError, StorageResult, TimeoutStorage,
};
#[cfg(feature = "storage-local")]
pub use upstage_storage::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use upstage_storage::S3Storage;
pub use uploads::{AssetUploadService, UploadSettings};
