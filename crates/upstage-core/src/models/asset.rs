use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle state of a staged upload.
///
/// `pending` → `content_received` → `ready`. `ready` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Pending,
    ContentReceived,
    Ready,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Pending => "pending",
            AssetStatus::ContentReceived => "content_received",
            AssetStatus::Ready => "ready",
        }
    }

    /// Content may be (re)uploaded until the asset is ready.
    pub fn accepts_content(&self) -> bool {
        !matches!(self, AssetStatus::Ready)
    }
}

impl FromStr for AssetStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AssetStatus::Pending),
            "content_received" => Ok(AssetStatus::ContentReceived),
            "ready" => Ok(AssetStatus::Ready),
            _ => Err(anyhow::anyhow!("Invalid asset status: {}", s)),
        }
    }
}

impl Display for AssetStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// What an uploaded asset is for; part of the route and of the request fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssetPurpose {
    BusinessLogo,
    ProductPhoto,
    VariantPhoto,
}

impl AssetPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetPurpose::BusinessLogo => "business_logo",
            AssetPurpose::ProductPhoto => "product_photo",
            AssetPurpose::VariantPhoto => "variant_photo",
        }
    }
}

impl FromStr for AssetPurpose {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "business_logo" => Ok(AssetPurpose::BusinessLogo),
            "product_photo" => Ok(AssetPurpose::ProductPhoto),
            "variant_photo" => Ok(AssetPurpose::VariantPhoto),
            _ => Err(anyhow::anyhow!("Invalid asset purpose: {}", s)),
        }
    }
}

impl Display for AssetPurpose {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl FromStr for Visibility {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            _ => Err(anyhow::anyhow!("Invalid visibility: {}", s)),
        }
    }
}

/// Metadata recorded when content bytes are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentReceipt {
    /// Storage key holding these exact bytes
    pub content_key: String,
    pub size_bytes: i64,
    pub content_type: String,
    /// Lowercase hex SHA-256 of the content
    pub digest: String,
    pub received_at: DateTime<Utc>,
}

/// A staged upload row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub purpose: AssetPurpose,
    pub visibility: Visibility,
    pub file_name: String,
    /// Declared (normalized) content type
    pub content_type: String,
    /// Declared size
    pub size_bytes: i64,
    pub object_key: String,
    pub status: AssetStatus,
    pub content_key: Option<String>,
    pub received_size_bytes: Option<i64>,
    pub received_content_type: Option<String>,
    pub content_digest: Option<String>,
    pub content_received_at: Option<DateTime<Utc>>,
    pub public_url: Option<String>,
    pub upload_expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Asset {
    /// The recorded receipt, if content has been accepted.
    pub fn receipt(&self) -> Option<ContentReceipt> {
        Some(ContentReceipt {
            content_key: self.content_key.clone()?,
            size_bytes: self.received_size_bytes?,
            content_type: self.received_content_type.clone()?,
            digest: self.content_digest.clone()?,
            received_at: self.content_received_at?,
        })
    }

    /// Ready public assets may be served without authentication.
    pub fn is_publicly_servable(&self) -> bool {
        self.status == AssetStatus::Ready && self.visibility == Visibility::Public
    }

    /// Storage keys that may hold bytes for this asset.
    pub fn storage_keys(&self) -> Vec<String> {
        let mut keys = vec![self.object_key.clone()];
        if let Some(ref content_key) = self.content_key {
            if content_key != &self.object_key {
                keys.push(content_key.clone());
            }
        }
        keys
    }
}

/// Insert payload for a freshly staged asset.
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub purpose: AssetPurpose,
    pub visibility: Visibility,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub object_key: String,
    pub upload_expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl NewAsset {
    pub fn into_asset(self) -> Asset {
        Asset {
            id: self.id,
            tenant_id: self.tenant_id,
            purpose: self.purpose,
            visibility: self.visibility,
            file_name: self.file_name,
            content_type: self.content_type,
            size_bytes: self.size_bytes,
            object_key: self.object_key,
            status: AssetStatus::Pending,
            content_key: None,
            received_size_bytes: None,
            received_content_type: None,
            content_digest: None,
            content_received_at: None,
            public_url: None,
            upload_expires_at: self.upload_expires_at,
            created_at: self.created_at,
            updated_at: self.created_at,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            AssetStatus::Pending,
            AssetStatus::ContentReceived,
            AssetStatus::Ready,
        ] {
            assert_eq!(status.as_str().parse::<AssetStatus>().unwrap(), status);
        }
        assert!("failed".parse::<AssetStatus>().is_err());
    }

    #[test]
    fn only_ready_rejects_content() {
        assert!(AssetStatus::Pending.accepts_content());
        assert!(AssetStatus::ContentReceived.accepts_content());
        assert!(!AssetStatus::Ready.accepts_content());
    }

    #[test]
    fn receipt_requires_every_field() {
        let now = Utc::now();
        let mut asset = NewAsset {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            purpose: AssetPurpose::BusinessLogo,
            visibility: Visibility::Public,
            file_name: "logo.png".into(),
            content_type: "image/png".into(),
            size_bytes: 12,
            object_key: "tenants/t/assets/a/logo.png".into(),
            upload_expires_at: now,
            created_at: now,
        }
        .into_asset();
        assert!(asset.receipt().is_none());

        asset.content_key = Some("tenants/t/assets/a/logo.png.abcd".into());
        asset.received_size_bytes = Some(12);
        asset.received_content_type = Some("image/png".into());
        assert!(asset.receipt().is_none());

        asset.content_digest = Some("abcd".into());
        asset.content_received_at = Some(now);
        let receipt = asset.receipt().unwrap();
        assert_eq!(receipt.size_bytes, 12);
        assert_eq!(asset.storage_keys().len(), 2);
    }
}
