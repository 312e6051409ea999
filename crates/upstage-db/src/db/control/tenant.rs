//! Tenant and API key lookup for bearer authentication.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use upstage_core::models::{ApiKey, Tenant, TenantStatus};
use upstage_core::AppError;
use uuid::Uuid;

/// Resolves hashed bearer keys to their tenant.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Key record and owning tenant for a SHA-256 key hash
    async fn find_by_key_hash(&self, key_hash: &str)
        -> Result<Option<(ApiKey, Tenant)>, AppError>;

    async fn touch_api_key(&self, key_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError>;

    async fn create_tenant(&self, tenant: Tenant) -> Result<(), AppError>;

    async fn insert_api_key(&self, key: ApiKey) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct PgTenantDirectory {
    pool: PgPool,
}

impl PgTenantDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_key_and_tenant(row: &PgRow) -> Result<(ApiKey, Tenant), AppError> {
    let status: String = row.try_get("tenant_status")?;
    let key = ApiKey {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        key_prefix: row.try_get("key_prefix")?,
        key_hash: row.try_get("key_hash")?,
        created_at: row.try_get("created_at")?,
        last_used_at: row.try_get("last_used_at")?,
        revoked_at: row.try_get("revoked_at")?,
    };
    let tenant = Tenant {
        id: key.tenant_id,
        name: row.try_get("tenant_name")?,
        status: status.parse::<TenantStatus>()?,
        created_at: row.try_get("tenant_created_at")?,
    };
    Ok((key, tenant))
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn find_by_key_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<(ApiKey, Tenant)>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT k.id, k.tenant_id, k.name, k.key_prefix, k.key_hash, k.created_at,
                   k.last_used_at, k.revoked_at,
                   t.name AS tenant_name, t.status AS tenant_status,
                   t.created_at AS tenant_created_at
            FROM api_keys k
            JOIN tenants t ON t.id = k.tenant_id
            WHERE k.key_hash = $1
            "#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_key_and_tenant).transpose()
    }

    async fn touch_api_key(&self, key_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(key_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_tenant(&self, tenant: Tenant) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO tenants (id, name, status, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, status = EXCLUDED.status
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(tenant.status.as_str())
        .bind(tenant.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_api_key(&self, key: ApiKey) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (id, tenant_id, name, key_prefix, key_hash, created_at, revoked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(key.id)
        .bind(key.tenant_id)
        .bind(&key.name)
        .bind(&key.key_prefix)
        .bind(&key.key_hash)
        .bind(key.created_at)
        .bind(key.revoked_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Default)]
struct Directory {
    tenants: HashMap<Uuid, Tenant>,
    keys_by_hash: HashMap<String, ApiKey>,
}

/// In-memory [`TenantDirectory`] for tests and local runs
#[derive(Clone, Default)]
pub struct InMemoryTenantDirectory {
    inner: Arc<RwLock<Directory>>,
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn find_by_key_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<(ApiKey, Tenant)>, AppError> {
        let dir = self.inner.read().await;
        Ok(dir.keys_by_hash.get(key_hash).and_then(|key| {
            dir.tenants
                .get(&key.tenant_id)
                .map(|tenant| (key.clone(), tenant.clone()))
        }))
    }

    async fn touch_api_key(&self, key_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        let mut dir = self.inner.write().await;
        if let Some(key) = dir.keys_by_hash.values_mut().find(|k| k.id == key_id) {
            key.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn create_tenant(&self, tenant: Tenant) -> Result<(), AppError> {
        self.inner.write().await.tenants.insert(tenant.id, tenant);
        Ok(())
    }

    async fn insert_api_key(&self, key: ApiKey) -> Result<(), AppError> {
        let mut dir = self.inner.write().await;
        if !dir.tenants.contains_key(&key.tenant_id) {
            return Err(AppError::InvalidInput(format!(
                "unknown tenant {}",
                key.tenant_id
            )));
        }
        dir.keys_by_hash.insert(key.key_hash.clone(), key);
        Ok(())
    }
}
