//! Staged upload endpoints: create, content, complete.

use crate::auth::models::TenantContext;
use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::state::UploadState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::TryStreamExt;
use upstage_core::models::{
    AssetPurpose, CompleteUploadResponse, CreateUploadRequest, CreateUploadResponse,
};
use upstage_core::AppError;
use uuid::Uuid;

const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";

pub(crate) fn parse_purpose(raw: &str) -> Result<AssetPurpose, AppError> {
    raw.parse()
        .map_err(|_| AppError::InvalidInput(format!("Unknown asset purpose '{}'", raw)))
}

/// Unparseable ids cannot name an existing asset
pub(crate) fn parse_asset_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound(format!("Asset {} not found", raw)))
}

/// 429 response carrying the window size of the limit that was hit
fn rate_limited(err: AppError, limit: u32) -> Response {
    let mut response = HttpAppError(err).into_response();
    response
        .headers_mut()
        .insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    response
}

/// Stage an upload
#[utoipa::path(
    post,
    path = "/api/v0/assets/uploads/{purpose}",
    tag = "uploads",
    params(("purpose" = AssetPurpose, Path, description = "What the asset will be used for")),
    request_body = CreateUploadRequest,
    responses(
        (status = 200, description = "Upload staged, or replayed for a known idempotency key", body = CreateUploadResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 401, description = "Missing or invalid API key", body = ErrorResponse),
        (status = 409, description = "Idempotency key reused with different parameters", body = ErrorResponse),
        (status = 429, description = "Creations too close together", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(
    skip(state, request),
    fields(tenant_id = %tenant_ctx.tenant_id, operation = "create_upload")
)]
pub async fn create_upload(
    tenant_ctx: TenantContext,
    State(state): State<UploadState>,
    Path(purpose): Path<String>,
    ValidatedJson(request): ValidatedJson<CreateUploadRequest>,
) -> Result<Response, HttpAppError> {
    let purpose = parse_purpose(&purpose)?;

    match state
        .service
        .create_upload(tenant_ctx.tenant_id, purpose, request)
        .await
    {
        Ok(response) => Ok(Json(response).into_response()),
        Err(err @ AppError::RateLimited { .. }) => Ok(rate_limited(err, state.rate_limit_max)),
        Err(err) => Err(err.into()),
    }
}

/// Upload content bytes for a staged asset (local storage backend)
#[utoipa::path(
    put,
    path = "/api/v0/assets/uploads/{assetId}/content/{purpose}",
    tag = "uploads",
    params(
        ("assetId" = Uuid, Path, description = "Staged asset id"),
        ("purpose" = AssetPurpose, Path, description = "Purpose the asset was staged for")
    ),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 204, description = "Content received"),
        (status = 400, description = "Body size differs from the declared size", body = ErrorResponse),
        (status = 403, description = "Purpose mismatch", body = ErrorResponse),
        (status = 404, description = "Asset not found", body = ErrorResponse),
        (status = 409, description = "Content-Type differs from the declared type, or upload expired", body = ErrorResponse),
        (status = 413, description = "Body above the upload limit"),
        (status = 503, description = "Storage timed out", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(
    skip(state, headers, body),
    fields(tenant_id = %tenant_ctx.tenant_id, operation = "upload_content")
)]
pub async fn upload_content(
    tenant_ctx: TenantContext,
    State(state): State<UploadState>,
    Path((asset_id, purpose)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, HttpAppError> {
    let asset_id = parse_asset_id(&asset_id)?;
    let purpose = parse_purpose(&purpose)?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let stream = body.into_data_stream().map_err(|e| {
        tracing::debug!(error = %e, "Request body read failed");
        AppError::InvalidInput(format!("Failed to read request body: {}", e))
    });

    state
        .service
        .receive_content(tenant_ctx.tenant_id, asset_id, purpose, content_type, stream)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Verify received content and make the asset public
#[utoipa::path(
    post,
    path = "/api/v0/assets/uploads/{assetId}/complete/{purpose}",
    tag = "uploads",
    params(
        ("assetId" = Uuid, Path, description = "Staged asset id"),
        ("purpose" = AssetPurpose, Path, description = "Purpose the asset was staged for")
    ),
    responses(
        (status = 200, description = "Asset is ready", body = CompleteUploadResponse),
        (status = 400, description = "Stored size differs from the declared size", body = ErrorResponse),
        (status = 403, description = "Purpose mismatch", body = ErrorResponse),
        (status = 404, description = "Asset not found", body = ErrorResponse),
        (status = 409, description = "Content not uploaded, type mismatch or upload expired", body = ErrorResponse),
        (status = 429, description = "Completions too close together", body = ErrorResponse),
        (status = 503, description = "Verification timed out", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(
    skip(state),
    fields(tenant_id = %tenant_ctx.tenant_id, operation = "complete_upload")
)]
pub async fn complete_upload(
    tenant_ctx: TenantContext,
    State(state): State<UploadState>,
    Path((asset_id, purpose)): Path<(String, String)>,
) -> Result<Response, HttpAppError> {
    let asset_id = parse_asset_id(&asset_id)?;
    let purpose = parse_purpose(&purpose)?;

    match state
        .service
        .complete_upload(tenant_ctx.tenant_id, asset_id, purpose)
        .await
    {
        Ok(response) => Ok(Json(response).into_response()),
        Err(err @ AppError::RateLimited { .. }) => {
            Ok(rate_limited(err, state.complete_rate_limit_max))
        }
        Err(err) => Err(err.into()),
    }
}
