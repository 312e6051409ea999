//! Route configuration and setup

use crate::auth::{auth_middleware, AuthState};
use crate::constants::{API_PREFIX, OPENAPI_PATH};
use crate::handlers;
use crate::middleware::request_id_middleware;
use crate::state::AppState;
use axum::{
    http::{HeaderName, HeaderValue, Method},
    routing::{get, post, put},
    Json, Router,
};
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use upstage_core::Config;
use upstage_db::TenantDirectory;

/// Master keys shorter than this are refused in production
const MIN_MASTER_KEY_LEN: usize = 32;

/// Setup all application routes
pub fn setup_routes(
    config: &Config,
    state: Arc<AppState>,
    tenants: Arc<dyn TenantDirectory>,
) -> Result<Router<()>, anyhow::Error> {
    let cors = setup_cors(config)?;
    let auth_state = setup_auth_state(config, tenants)?;

    let protected = protected_routes(config, &state).layer(axum::middleware::from_fn_with_state(
        Arc::new(auth_state),
        auth_middleware,
    ));

    let app = public_routes()
        .merge(protected)
        .merge(utoipa_rapidoc::RapiDoc::new(OPENAPI_PATH).path("/api/docs"))
        .layer(ConcurrencyLimitLayer::new(config.max_concurrent_requests().max(1)))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
        .with_state(state);

    Ok(app)
}

/// Setup CORS configuration
fn setup_cors(config: &Config) -> Result<CorsLayer, anyhow::Error> {
    let methods = [
        Method::GET,
        Method::HEAD,
        Method::POST,
        Method::PUT,
        Method::OPTIONS,
    ];
    let exposed = [
        HeaderName::from_static("x-request-id"),
        HeaderName::from_static("retry-after"),
        HeaderName::from_static("etag"),
    ];

    let cors = if config.cors_origins().iter().any(|o| o == "*") {
        tracing::warn!("CORS configured to allow all origins - not recommended for production");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
            .expose_headers(exposed)
    } else {
        let origins = config
            .cors_origins()
            .iter()
            .map(|o| o.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Invalid CORS origin: {}", e))?;

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(Any)
            .expose_headers(exposed)
    };
    Ok(cors)
}

fn setup_auth_state(
    config: &Config,
    tenants: Arc<dyn TenantDirectory>,
) -> Result<AuthState, anyhow::Error> {
    let master_api_key = config.master_api_key().map(str::to_string);

    match master_api_key {
        Some(ref key) if key.len() < MIN_MASTER_KEY_LEN => {
            if config.is_production() {
                return Err(anyhow::anyhow!(
                    "MASTER_API_KEY must be at least {} characters long",
                    MIN_MASTER_KEY_LEN
                ));
            }
            tracing::warn!("MASTER_API_KEY is shorter than recommended");
        }
        Some(_) => {}
        None => tracing::info!("MASTER_API_KEY not set; only tenant API keys authenticate"),
    }

    Ok(AuthState {
        master_api_key,
        tenants,
    })
}

/// Public routes (no authentication required)
fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/live", get(handlers::health::liveness_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route(
            OPENAPI_PATH,
            get(|| async { Json(crate::api_doc::get_openapi_spec()) }),
        )
        .route(
            &format!("{}/public/assets/{{asset_id}}", API_PREFIX),
            get(handlers::public_assets::get_public_asset),
        )
}

/// Upload protocol routes (require authentication).
///
/// The content route only exists when clients upload through this service;
/// with a bucket backend they PUT to the presigned URL instead.
fn protected_routes(config: &Config, state: &Arc<AppState>) -> Router<Arc<AppState>> {
    let mut router = Router::new()
        .route(
            &format!("{}/assets/uploads/{{purpose}}", API_PREFIX),
            post(handlers::uploads::create_upload),
        )
        .route(
            &format!("{}/assets/uploads/{{asset_id}}/complete/{{purpose}}", API_PREFIX),
            post(handlers::uploads::complete_upload),
        );

    if state.uploads.service.accepts_proxied_content() {
        // one byte of slack so an oversized body is reported as a size mismatch
        let body_limit = usize::try_from(config.max_upload_bytes())
            .unwrap_or(usize::MAX)
            .saturating_add(1);
        router = router.route(
            &format!("{}/assets/uploads/{{asset_id}}/content/{{purpose}}", API_PREFIX),
            put(handlers::uploads::upload_content).layer(RequestBodyLimitLayer::new(body_limit)),
        );
    }

    router
}
