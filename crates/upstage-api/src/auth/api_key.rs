//! Tenant API key generation and hashing.

use chrono::Utc;
use sha2::{Digest, Sha256};
use upstage_core::models::{ApiKey, API_KEY_PREFIX};
use uuid::Uuid;

/// Generate a secure API key: `uk_live_<40 hex chars>`
pub fn generate_api_key() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let random_bytes: [u8; 20] = rng.random();
    format!("{}{}", API_KEY_PREFIX, hex::encode(random_bytes))
}

/// SHA-256 hex digest used as the lookup key. Bearer keys carry 160 random
/// bits, so a fast unsalted hash is sufficient.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Extract the key prefix (first 16 chars) for identification.
pub fn extract_key_prefix(key: &str) -> String {
    key.chars().take(16).collect()
}

/// Build a new key record for `tenant_id`. The raw key is returned once and never stored.
pub fn issue_api_key(tenant_id: Uuid, name: &str) -> (String, ApiKey) {
    let raw = generate_api_key();
    let record = ApiKey {
        id: Uuid::new_v4(),
        tenant_id,
        name: name.to_string(),
        key_prefix: extract_key_prefix(&raw),
        key_hash: hash_api_key(&raw),
        created_at: Utc::now(),
        last_used_at: None,
        revoked_at: None,
    };
    (raw, record)
}
