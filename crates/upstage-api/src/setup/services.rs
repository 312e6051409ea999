//! Service wiring

use crate::state::{AppState, HealthState, UploadState};
use std::sync::Arc;
use upstage_core::Config;
use upstage_db::Stores;
use upstage_services::{AssetUploadService, Storage, UploadSettings};

pub fn initialize_services(
    config: &Config,
    stores: &Stores,
    storage: Arc<dyn Storage>,
) -> Arc<AppState> {
    let settings = UploadSettings::from_config(config);
    let rate_limit_max = settings.rate_limit.max_in_window;
    let complete_rate_limit_max = settings.complete_rate_limit.max_in_window;
    let service = AssetUploadService::new(stores.assets.clone(), storage.clone(), settings);

    tracing::info!(
        backend = %storage.backend_type(),
        proxied_content = service.accepts_proxied_content(),
        max_upload_bytes = config.max_upload_bytes(),
        "Upload service initialized"
    );

    Arc::new(AppState {
        uploads: UploadState {
            service,
            rate_limit_max,
            complete_rate_limit_max,
        },
        health: HealthState {
            store: stores.assets.clone(),
            storage,
        },
        config: config.clone(),
    })
}
