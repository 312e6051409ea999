//! Content verification against staged metadata.

use crate::error::AppError;
use crate::models::Asset;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: i64, actual: i64 },
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
}

impl From<VerificationError> for AppError {
    fn from(err: VerificationError) -> Self {
        match err {
            VerificationError::SizeMismatch { expected, actual } => {
                AppError::SizeMismatch { expected, actual }
            }
            VerificationError::TypeMismatch { expected, actual } => {
                AppError::ContentTypeMismatch { expected, actual }
            }
        }
    }
}

/// Declared expectations for one asset. Both dimensions must match exactly.
///
/// Types compare as trimmed strings, ignoring ASCII case only. Parameters and
/// subtype aliases are significant: `image/jpg` does not match `image/jpeg`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentVerifier {
    declared_size: i64,
    declared_type: String,
}

impl ContentVerifier {
    pub fn new(declared_size: i64, declared_type: &str) -> Self {
        Self {
            declared_size,
            declared_type: declared_type.trim().to_string(),
        }
    }

    pub fn for_asset(asset: &Asset) -> Self {
        Self::new(asset.size_bytes, &asset.content_type)
    }

    /// Type is checked before size so a wrong-typed body can be rejected
    /// before it is read.
    pub fn verify_type(&self, actual_type: &str) -> Result<(), VerificationError> {
        let actual = actual_type.trim();
        if !actual.eq_ignore_ascii_case(&self.declared_type) {
            return Err(VerificationError::TypeMismatch {
                expected: self.declared_type.clone(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    pub fn verify_size(&self, actual_size: i64) -> Result<(), VerificationError> {
        if actual_size != self.declared_size {
            return Err(VerificationError::SizeMismatch {
                expected: self.declared_size,
                actual: actual_size,
            });
        }
        Ok(())
    }

    pub fn verify(&self, actual_size: i64, actual_type: &str) -> Result<(), VerificationError> {
        self.verify_type(actual_type)?;
        self.verify_size(actual_size)
    }
}
