//! upstage Core Library
//!
//! Domain models, error types, configuration, validation and the pure parts of
//! the staged upload protocol (ledger classification, rate-limit decisions,
//! content verification) shared by every upstage crate.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod rate_limit;
pub mod storage_types;
pub mod validation;
pub mod verifier;

// Re-export commonly used types
pub use config::{BaseConfig, Config, UploadServiceConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use rate_limit::{Admission, RateLimitPolicy, RateLimitWindow};
pub use storage_types::{StorageBackend, StoreBackend};
pub use verifier::{ContentVerifier, VerificationError};
