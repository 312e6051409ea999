//! Application state and sub-state extractors.
//!
//! Handlers extract only the part they need through Axum's `FromRef`.

use std::sync::Arc;
use upstage_core::Config;
use upstage_db::AssetStore;
use upstage_services::{AssetUploadService, Storage};

/// Upload protocol service and the limits the router needs
#[derive(Clone)]
pub struct UploadState {
    pub service: AssetUploadService,
    /// Accepted creations per rate-limit window, reported in `X-RateLimit-Limit`
    pub rate_limit_max: u32,
    /// Accepted completions per rate-limit window
    pub complete_rate_limit_max: u32,
}

/// Dependencies probed by the readiness endpoint
#[derive(Clone)]
pub struct HealthState {
    pub store: Arc<dyn AssetStore>,
    pub storage: Arc<dyn Storage>,
}

/// Main application state: aggregates sub-states for dependency injection.
#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadState,
    pub health: HealthState,
    pub config: Config,
}

impl axum::extract::FromRef<Arc<AppState>> for UploadState {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.uploads.clone()
    }
}

impl axum::extract::FromRef<Arc<AppState>> for HealthState {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.health.clone()
    }
}

fn _assert_app_state_send_sync() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}
    assert_send::<AppState>();
    assert_sync::<AppState>();
}
