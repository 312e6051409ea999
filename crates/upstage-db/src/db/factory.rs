use crate::db::assets::{AssetStore, InMemoryAssetStore, PgAssetStore};
use crate::db::control::{InMemoryTenantDirectory, PgTenantDirectory, TenantDirectory};
use crate::db::pool;
use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;
use upstage_core::{Config, StoreBackend};

/// Persistence handles for one process
#[derive(Clone)]
pub struct Stores {
    pub assets: Arc<dyn AssetStore>,
    pub tenants: Arc<dyn TenantDirectory>,
    /// Set for the postgres backend
    pub pool: Option<PgPool>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            assets: Arc::new(InMemoryAssetStore::new()),
            tenants: Arc::new(InMemoryTenantDirectory::new()),
            pool: None,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            assets: Arc::new(PgAssetStore::new(pool.clone())),
            tenants: Arc::new(PgTenantDirectory::new(pool.clone())),
            pool: Some(pool),
        }
    }
}

/// Create the configured store; postgres connects and applies migrations first.
pub async fn create_stores(config: &Config) -> Result<Stores> {
    match config.store_backend() {
        StoreBackend::Postgres => {
            let pool = pool::connect(config).await?;
            pool::run_migrations(&pool).await?;
            Ok(Stores::postgres(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; state is lost on restart");
            Ok(Stores::in_memory())
        }
    }
}
