use crate::auth::api_key::hash_api_key;
use crate::auth::models::TenantContext;
use crate::error::HttpAppError;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use upstage_core::constants::DEFAULT_TENANT_ID;
use upstage_core::models::{Tenant, TenantStatus, API_KEY_PREFIX};
use upstage_core::AppError;
use upstage_db::TenantDirectory;

#[derive(Clone)]
pub struct AuthState {
    /// Operator key that authenticates as the default tenant; unset disables it
    pub master_api_key: Option<String>,
    pub tenants: Arc<dyn TenantDirectory>,
}

fn secure_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn unauthorized(reason: &str) -> Response {
    tracing::warn!(reason, "Authentication failed");
    HttpAppError(AppError::Unauthorized(reason.to_string())).into_response()
}

pub async fn auth_middleware(
    State(auth_state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(auth_header) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    else {
        return unauthorized("Missing authorization header");
    };

    let Some(token) = auth_header.strip_prefix("Bearer ") else {
        return unauthorized("Invalid authorization header format");
    };
    let token = token.trim();

    if let Some(ref master) = auth_state.master_api_key {
        if secure_compare(token, master) {
            let tenant_context = TenantContext {
                tenant_id: DEFAULT_TENANT_ID,
                api_key_id: None,
                tenant: Tenant {
                    id: DEFAULT_TENANT_ID,
                    name: "default".to_string(),
                    status: TenantStatus::Active,
                    created_at: Utc::now(),
                },
            };
            tracing::debug!(tenant_id = %DEFAULT_TENANT_ID, "Authenticated with master key");
            request.extensions_mut().insert(tenant_context);
            return next.run(request).await;
        }
    }

    if !token.starts_with(API_KEY_PREFIX) {
        return unauthorized("Invalid API key");
    }

    match authenticate_generated_key(token, auth_state.tenants.as_ref()).await {
        Ok(tenant_context) => {
            if let Some(key_id) = tenant_context.api_key_id {
                let tenants = auth_state.tenants.clone();
                tokio::spawn(async move {
                    if let Err(e) = tenants.touch_api_key(key_id, Utc::now()).await {
                        tracing::debug!(error = %e, api_key_id = %key_id, "Failed to record key use");
                    }
                });
            }

            tracing::debug!(tenant_id = %tenant_context.tenant_id, "Authenticated with API key");
            request.extensions_mut().insert(tenant_context);
            next.run(request).await
        }
        Err(AppError::Unauthorized(reason)) => unauthorized(&reason),
        Err(e) => HttpAppError(e).into_response(),
    }
}

async fn authenticate_generated_key(
    token: &str,
    tenants: &dyn TenantDirectory,
) -> Result<TenantContext, AppError> {
    let key_hash = hash_api_key(token);
    let Some((api_key, tenant)) = tenants.find_by_key_hash(&key_hash).await? else {
        return Err(AppError::Unauthorized("Invalid API key".to_string()));
    };

    if !secure_compare(&api_key.key_hash, &key_hash) {
        return Err(AppError::Unauthorized("Invalid API key".to_string()));
    }
    if !api_key.is_active() {
        return Err(AppError::Unauthorized("API key has been revoked".to_string()));
    }
    if tenant.status != TenantStatus::Active {
        return Err(AppError::Unauthorized("Tenant is not active".to_string()));
    }

    Ok(TenantContext {
        tenant_id: tenant.id,
        api_key_id: Some(api_key.id),
        tenant,
    })
}
