//! Idempotency key normalization and request fingerprints.

use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::models::{AssetPurpose, Visibility};

pub const MAX_IDEMPOTENCY_KEY_LENGTH: usize = 128;

/// Trim a client key. `None` or a blank key means the request is not idempotent.
pub fn normalize_idempotency_key(key: Option<&str>) -> Result<Option<String>, AppError> {
    let Some(key) = key.map(str::trim).filter(|k| !k.is_empty()) else {
        return Ok(None);
    };
    if key.chars().count() > MAX_IDEMPOTENCY_KEY_LENGTH {
        return Err(AppError::Validation(format!(
            "idempotencyKey must be at most {} characters",
            MAX_IDEMPOTENCY_KEY_LENGTH
        )));
    }
    Ok(Some(key.to_string()))
}

/// Lowercase hex SHA-256.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Fingerprint of the client-controlled creation parameters.
///
/// `content_type` is expected to be normalized already; both text fields are trimmed
/// so that whitespace-only differences replay instead of conflicting.
pub fn request_fingerprint(
    purpose: AssetPurpose,
    visibility: Visibility,
    file_name: &str,
    content_type: &str,
    size_bytes: i64,
) -> String {
    let canonical = format!(
        "{}|{}|{}|{}|{}",
        purpose.as_str(),
        visibility.as_str(),
        file_name.trim(),
        content_type.trim(),
        size_bytes
    );
    sha256_hex(canonical.as_bytes())
}
