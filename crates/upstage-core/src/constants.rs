use uuid::Uuid;

/// Tenant that the master API key authenticates as
pub const DEFAULT_TENANT_ID: Uuid = Uuid::from_u128(0x00000000_0000_0000_0000_000000000001);

/// API base path prefix
pub const API_BASE: &str = "/api";

/// Versioned route prefix; URLs handed to clients are built from it
pub const API_PREFIX: &str = "/api/v0";

/// Default number of expired uploads one garbage-collection run examines
pub const GC_PENDING_LIMIT: i64 = 500;
