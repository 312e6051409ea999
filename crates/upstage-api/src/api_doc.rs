//! OpenAPI documentation.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::error;
use crate::handlers;
use upstage_core::models;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

pub fn get_openapi_spec() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "upstage API",
        version = "0.1.0",
        description = "Idempotent staged asset uploads: create with an idempotency key, upload the bytes, complete. All endpoints are versioned under /api/v0/."
    ),
    paths(
        handlers::uploads::create_upload,
        handlers::uploads::upload_content,
        handlers::uploads::complete_upload,
        handlers::public_assets::get_public_asset,
    ),
    components(
        schemas(
            models::AssetPurpose,
            models::AssetStatus,
            models::CreateUploadRequest,
            models::CreateUploadResponse,
            models::UploadDescriptor,
            models::CompleteUploadResponse,
            error::ErrorResponse,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "uploads", description = "Staged upload protocol"),
        (name = "public", description = "Unauthenticated reads of ready public assets")
    )
)]
pub struct ApiDoc;
