//! Public route: serves ready, public assets without authentication.

use crate::error::{ErrorResponse, HttpAppError};
use crate::handlers::uploads::parse_asset_id;
use crate::state::UploadState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use upstage_core::models::Asset;
use upstage_core::AppError;

const CACHE_CONTROL: &str = "public, max-age=3600";
const ETAG_HEX_LEN: usize = 32;

fn etag(asset: &Asset) -> Option<String> {
    asset
        .content_digest
        .as_deref()
        .map(|digest| format!("\"{}\"", &digest[..digest.len().min(ETAG_HEX_LEN)]))
}

fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

/// `If-None-Match` wins over `If-Modified-Since` when both are present.
fn is_not_modified(headers: &HeaderMap, etag: Option<&str>, last_modified: Option<DateTime<Utc>>) -> bool {
    if let Some(if_none_match) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        let Some(etag) = etag else {
            return false;
        };
        return if_none_match
            .split(',')
            .map(|candidate| candidate.trim().trim_start_matches("W/"))
            .any(|candidate| candidate == "*" || candidate == etag);
    }

    let since = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date);
    match (since, last_modified) {
        // HTTP dates have second precision
        (Some(since), Some(modified)) => modified.timestamp() <= since.timestamp(),
        _ => false,
    }
}

/// Serve the bytes of a ready public asset. HEAD returns the headers only.
#[utoipa::path(
    get,
    path = "/api/v0/public/assets/{assetId}",
    tag = "public",
    params(("assetId" = uuid::Uuid, Path, description = "Asset id")),
    responses(
        (status = 200, description = "Asset content with its stored Content-Type"),
        (status = 304, description = "Cached copy is current"),
        (status = 404, description = "Not found, not ready or not public", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, headers, method), fields(operation = "get_public_asset"))]
pub async fn get_public_asset(
    State(state): State<UploadState>,
    Path(asset_id): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, HttpAppError> {
    let asset_id = parse_asset_id(&asset_id)?;
    let asset = state.service.public_asset(asset_id).await?;

    let etag = etag(&asset);
    let last_modified = asset.completed_at;

    let mut builder = Response::builder()
        .header(header::CACHE_CONTROL, CACHE_CONTROL)
        .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff");
    if let Some(ref etag) = etag {
        builder = builder.header(header::ETAG, etag.as_str());
    }
    if let Some(at) = last_modified {
        builder = builder.header(header::LAST_MODIFIED, http_date(at));
    }

    if is_not_modified(&headers, etag.as_deref(), last_modified) {
        return builder
            .status(StatusCode::NOT_MODIFIED)
            .body(Body::empty())
            .map_err(|e| HttpAppError::from(AppError::Internal(e.to_string())));
    }

    let size = asset.received_size_bytes.unwrap_or(asset.size_bytes);
    builder = builder
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, asset.content_type.as_str())
        .header(header::CONTENT_LENGTH, size);

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        let stream = state.service.open_content(&asset).await.map_err(|e| {
            tracing::error!(error = %e, asset_id = %asset.id, "Failed to open stored content");
            e
        })?;
        Body::from_stream(stream.map(|result| {
            result.map_err(|e| std::io::Error::other(format!("Storage stream error: {}", e)))
        }))
    };

    builder
        .body(body)
        .map_err(|e| HttpAppError::from(AppError::Internal(e.to_string())))
}
