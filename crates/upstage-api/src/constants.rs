//! API constants
//!
//! Route prefixes live in upstage-core so the service layer builds the same
//! URLs the router serves.

pub use upstage_core::constants::{API_BASE, API_PREFIX};

/// Path of the served OpenAPI document
pub const OPENAPI_PATH: &str = "/api/openapi.json";
