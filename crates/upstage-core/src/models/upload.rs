use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::asset::AssetStatus;

/// Request to stage a new upload
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadRequest {
    /// Client-chosen idempotency key (trimmed; at most 128 characters)
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Original file name
    #[validate(length(
        min = 1,
        max = 255,
        message = "fileName must be between 1 and 255 characters"
    ))]
    pub file_name: String,
    /// Declared content type (MIME type)
    #[validate(length(
        min = 1,
        max = 128,
        message = "contentType must be between 1 and 128 characters"
    ))]
    pub content_type: String,
    /// Declared size in bytes
    #[validate(range(min = 1, message = "sizeBytes must be > 0"))]
    pub size_bytes: i64,
}

/// Where and how the client must send the content bytes
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct UploadDescriptor {
    /// HTTP method (always `PUT`)
    pub method: String,
    pub url: String,
    /// Headers the client must send with the content
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadResponse {
    pub asset_id: Uuid,
    /// Current status; a replay of a finished upload reports `ready`
    pub status: AssetStatus,
    pub upload: UploadDescriptor,
    /// URL that serves the content once the upload is complete
    pub public_url: String,
    /// End of the upload window
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    pub asset_id: Uuid,
    pub status: AssetStatus,
    pub public_url: String,
}
