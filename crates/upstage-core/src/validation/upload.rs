//! Content type and file name rules for staged uploads.

use uuid::Uuid;

pub const MAX_SANITIZED_FILENAME_LENGTH: usize = 80;

/// Lowercase MIME essence with parameters dropped; `image/jpg` becomes `image/jpeg`.
///
/// Returns an empty string for values that are not `type/subtype`.
pub fn normalize_content_type(value: &str) -> String {
    let essence = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    match essence.split_once('/') {
        Some((kind, sub)) if !kind.is_empty() && !sub.is_empty() && !sub.contains('/') => {
            if essence == "image/jpg" {
                "image/jpeg".to_string()
            } else {
                essence
            }
        }
        _ => String::new(),
    }
}

pub fn is_allowed_content_type(content_type: &str, allowed: &[String]) -> bool {
    let normalized = normalize_content_type(content_type);
    !normalized.is_empty()
        && allowed
            .iter()
            .any(|a| normalize_content_type(a) == normalized)
}

/// Make a client file name safe for use as the last storage key segment.
pub fn sanitize_filename(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        return "file".to_string();
    }
    let cleaned = name.replace('\\', "_").replace('/', "_").replace("..", "_");
    if cleaned == "." {
        return "file".to_string();
    }
    cleaned.chars().take(MAX_SANITIZED_FILENAME_LENGTH).collect()
}

/// `tenants/{tenant_id}/assets/{asset_id}/{sanitized_name}`
pub fn object_key(tenant_id: Uuid, asset_id: Uuid, file_name: &str) -> String {
    format!(
        "tenants/{}/assets/{}/{}",
        tenant_id,
        asset_id,
        sanitize_filename(file_name)
    )
}

/// Storage key for one accepted upload of an asset, derived from its digest.
pub fn content_key(object_key: &str, digest: &str) -> String {
    let short = &digest[..digest.len().min(16)];
    format!("{}.{}", object_key.trim_end_matches('.'), short)
}
