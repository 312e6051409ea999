use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Ledger operation name for upload creation.
pub const UPLOAD_CREATE_OPERATION: &str = "assets.upload.create";

/// Rate-limit operation name for upload completion. Completion keeps no ledger entry.
pub const UPLOAD_COMPLETE_OPERATION: &str = "assets.upload.complete";

/// A durable (tenant, operation, key) → resource mapping.
///
/// At most one record exists per (tenant, operation, key) and its fingerprint
/// never changes after insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub tenant_id: Uuid,
    pub operation: String,
    pub idempotency_key: String,
    pub request_fingerprint: String,
    pub resource_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A normalized key plus the fingerprint of the request presenting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyClaim {
    pub key: String,
    pub fingerprint: String,
}

/// Outcome of consulting the ledger for a creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// No record; the caller creates the resource and records it in the same transaction.
    Fresh,
    /// Same key, same fingerprint: return the existing resource.
    Replayed(Uuid),
    /// Same key, different fingerprint: fail without side effects.
    Conflict,
}

impl BeginOutcome {
    pub fn classify(existing: Option<&IdempotencyRecord>, fingerprint: &str) -> Self {
        match existing {
            None => BeginOutcome::Fresh,
            Some(record) if record.request_fingerprint == fingerprint => {
                BeginOutcome::Replayed(record.resource_id)
            }
            Some(_) => BeginOutcome::Conflict,
        }
    }
}
