//! Application setup and initialization

pub mod routes;
pub mod server;
pub mod services;

use crate::state::AppState;
use anyhow::{Context, Result};
use std::sync::Arc;
use upstage_core::Config;
use upstage_db::create_stores;
use upstage_services::create_storage;

/// Initialize the entire application from configuration
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    // fail fast on misconfiguration
    config
        .validate()
        .context("Configuration validation failed")?;

    tracing::info!(
        store = %config.store_backend(),
        storage = %config.storage_backend(),
        "Configuration loaded and validated successfully"
    );

    let stores = create_stores(&config).await?;
    let storage = create_storage(&config)
        .await
        .context("Failed to initialize blob storage")?;

    let state = services::initialize_services(&config, &stores, storage);
    let router = routes::setup_routes(&config, state.clone(), stores.tenants.clone())?;

    Ok((state, router))
}
