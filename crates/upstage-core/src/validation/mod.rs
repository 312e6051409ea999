//! Validation modules

pub mod fingerprint;
pub mod upload;

pub use fingerprint::{normalize_idempotency_key, request_fingerprint, sha256_hex, MAX_IDEMPOTENCY_KEY_LENGTH};
pub use upload::{
    content_key, is_allowed_content_type, normalize_content_type, object_key, sanitize_filename,
    MAX_SANITIZED_FILENAME_LENGTH,
};
