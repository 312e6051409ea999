use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use upstage_core::models::Tenant;
use upstage_core::AppError;
use uuid::Uuid;

use crate::error::HttpAppError;

/// Tenant resolved from the bearer key and stored in request extensions
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    /// Key that authenticated the request; `None` for the master key
    pub api_key_id: Option<Uuid>,
    pub tenant: Tenant,
}

impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = HttpAppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantContext>()
            .cloned()
            .ok_or_else(|| {
                HttpAppError(AppError::Unauthorized(
                    "Missing tenant context".to_string(),
                ))
            })
    }
}
