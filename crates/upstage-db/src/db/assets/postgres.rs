use super::{superseded_key, AssetStore, ContentRecorded, StageOutcome, StageRequest};
use crate::db::transaction::{is_unique_violation, TransactionGuard};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use std::time::Duration;
use upstage_core::models::{
    Asset, AssetStatus, BeginOutcome, ContentReceipt, IdempotencyRecord, NewAsset,
};
use upstage_core::{Admission, AppError, RateLimitPolicy, RateLimitWindow};
use uuid::Uuid;

const ASSET_COLUMNS: &str = r#"
    id, tenant_id, purpose, visibility, file_name, content_type, size_bytes,
    object_key, status, content_key, received_size_bytes, received_content_type,
    content_digest, content_received_at, public_url, upload_expires_at,
    created_at, updated_at, completed_at
"#;

/// Row type for uploaded_assets. Enum columns are TEXT with CHECK constraints.
#[derive(Debug, sqlx::FromRow)]
struct AssetRow {
    id: Uuid,
    tenant_id: Uuid,
    purpose: String,
    visibility: String,
    file_name: String,
    content_type: String,
    size_bytes: i64,
    object_key: String,
    status: String,
    content_key: Option<String>,
    received_size_bytes: Option<i64>,
    received_content_type: Option<String>,
    content_digest: Option<String>,
    content_received_at: Option<DateTime<Utc>>,
    public_url: Option<String>,
    upload_expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<AssetRow> for Asset {
    type Error = AppError;

    fn try_from(row: AssetRow) -> Result<Self, Self::Error> {
        Ok(Asset {
            id: row.id,
            tenant_id: row.tenant_id,
            purpose: row.purpose.parse().map_err(AppError::from)?,
            visibility: row.visibility.parse().map_err(AppError::from)?,
            file_name: row.file_name,
            content_type: row.content_type,
            size_bytes: row.size_bytes,
            object_key: row.object_key,
            status: row.status.parse().map_err(AppError::from)?,
            content_key: row.content_key,
            received_size_bytes: row.received_size_bytes,
            received_content_type: row.received_content_type,
            content_digest: row.content_digest,
            content_received_at: row.content_received_at,
            public_url: row.public_url,
            upload_expires_at: row.upload_expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

fn row_to_record(row: &PgRow) -> Result<IdempotencyRecord, sqlx::Error> {
    Ok(IdempotencyRecord {
        tenant_id: row.try_get("tenant_id")?,
        operation: row.try_get("operation")?,
        idempotency_key: row.try_get("idempotency_key")?,
        request_fingerprint: row.try_get("request_fingerprint")?,
        resource_id: row.try_get("resource_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_window(row: &PgRow) -> Result<RateLimitWindow, sqlx::Error> {
    let count: i32 = row.try_get("count_in_window")?;
    Ok(RateLimitWindow {
        last_allowed_at: row.try_get("last_allowed_at")?,
        window_started_at: row.try_get("window_started_at")?,
        count_in_window: u32::try_from(count).unwrap_or(0),
    })
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// PostgreSQL-backed [`AssetStore`]
#[derive(Clone)]
pub struct PgAssetStore {
    pool: PgPool,
}

impl PgAssetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_asset(
        conn: &mut PgConnection,
        tenant_id: Uuid,
        asset_id: Uuid,
        for_update: bool,
    ) -> Result<Option<Asset>, AppError> {
        let sql = format!(
            "SELECT {} FROM uploaded_assets WHERE id = $1 AND tenant_id = $2{}",
            ASSET_COLUMNS,
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query_as::<_, AssetRow>(&sql)
            .bind(asset_id)
            .bind(tenant_id)
            .fetch_optional(conn)
            .await?;
        row.map(Asset::try_from).transpose()
    }

    async fn fetch_record(
        conn: &mut PgConnection,
        tenant_id: Uuid,
        operation: &str,
        idempotency_key: &str,
    ) -> Result<Option<IdempotencyRecord>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT tenant_id, operation, idempotency_key, request_fingerprint,
                   resource_id, created_at
            FROM idempotency_records
            WHERE tenant_id = $1 AND operation = $2 AND idempotency_key = $3
            "#,
        )
        .bind(tenant_id)
        .bind(operation)
        .bind(idempotency_key)
        .fetch_optional(conn)
        .await?;

        Ok(row.as_ref().map(row_to_record).transpose()?)
    }

    /// Apply the rate limit as one conditional upsert.
    ///
    /// The row is written only when the policy admits the attempt; no returned
    /// row means denied. The conflicting row stays locked until the caller's
    /// transaction ends, which serializes creations per (tenant, operation).
    async fn try_admit(
        conn: &mut PgConnection,
        tenant_id: Uuid,
        operation: &str,
        policy: &RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> Result<Admission, AppError> {
        let admitted = sqlx::query(
            r#"
            INSERT INTO rate_limit_windows AS w
                (tenant_id, operation, last_allowed_at, window_started_at, count_in_window)
            VALUES ($1, $2, $3, $3, 1)
            ON CONFLICT (tenant_id, operation) DO UPDATE SET
                last_allowed_at = EXCLUDED.last_allowed_at,
                window_started_at = CASE
                    WHEN EXCLUDED.last_allowed_at - w.window_started_at >= $5::float8 * INTERVAL '1 millisecond'
                    THEN EXCLUDED.last_allowed_at
                    ELSE w.window_started_at
                END,
                count_in_window = CASE
                    WHEN EXCLUDED.last_allowed_at - w.window_started_at >= $5::float8 * INTERVAL '1 millisecond'
                    THEN 1
                    ELSE w.count_in_window + 1
                END
            WHERE EXCLUDED.last_allowed_at - w.last_allowed_at >= $4::float8 * INTERVAL '1 millisecond'
              AND (
                    EXCLUDED.last_allowed_at - w.window_started_at >= $5::float8 * INTERVAL '1 millisecond'
                    OR w.count_in_window < $6
              )
            RETURNING last_allowed_at, window_started_at, count_in_window
            "#,
        )
        .bind(tenant_id)
        .bind(operation)
        .bind(now)
        .bind(millis(policy.min_spacing))
        .bind(millis(policy.window))
        .bind(i32::try_from(policy.max_in_window).unwrap_or(i32::MAX))
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(row) = admitted {
            return Ok(Admission::Allowed(row_to_window(&row)?));
        }

        let current = sqlx::query(
            r#"
            SELECT last_allowed_at, window_started_at, count_in_window
            FROM rate_limit_windows
            WHERE tenant_id = $1 AND operation = $2
            "#,
        )
        .bind(tenant_id)
        .bind(operation)
        .fetch_optional(&mut *conn)
        .await?;
        let current = current.as_ref().map(row_to_window).transpose()?;

        // the pure policy reports how long to wait; fall back to the spacing if
        // the row moved on between the two statements
        Ok(match policy.admit(current.as_ref(), now) {
            denied @ Admission::Denied { .. } => denied,
            Admission::Allowed(_) => Admission::Denied {
                retry_after: policy.min_spacing,
            },
        })
    }

    async fn insert_asset(conn: &mut PgConnection, asset: &NewAsset) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO uploaded_assets (
                id, tenant_id, purpose, visibility, file_name, content_type, size_bytes,
                object_key, status, upload_expires_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9, $10, $10)
            "#,
        )
        .bind(asset.id)
        .bind(asset.tenant_id)
        .bind(asset.purpose.as_str())
        .bind(asset.visibility.as_str())
        .bind(&asset.file_name)
        .bind(&asset.content_type)
        .bind(asset.size_bytes)
        .bind(&asset.object_key)
        .bind(asset.upload_expires_at)
        .bind(asset.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Resolve a recorded key into a stage outcome, or `None` if no record exists.
    async fn classify_existing(
        &self,
        tenant_id: Uuid,
        operation: &str,
        key: &str,
        fingerprint: &str,
    ) -> Result<Option<StageOutcome>, AppError> {
        let mut conn = self.pool.acquire().await?;
        let existing = Self::fetch_record(&mut conn, tenant_id, operation, key).await?;
        match BeginOutcome::classify(existing.as_ref(), fingerprint) {
            BeginOutcome::Fresh => Ok(None),
            BeginOutcome::Conflict => Ok(Some(StageOutcome::Conflict)),
            BeginOutcome::Replayed(asset_id) => {
                let asset = Self::fetch_asset(&mut conn, tenant_id, asset_id, false)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal(format!(
                            "idempotency record points at missing asset {}",
                            asset_id
                        ))
                    })?;
                Ok(Some(StageOutcome::Replayed(asset)))
            }
        }
    }

    async fn try_stage(&self, request: &StageRequest) -> Result<Option<StageOutcome>, AppError> {
        let tenant_id = request.tenant_id();
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        let admission = Self::try_admit(
            tx.conn()?,
            tenant_id,
            &request.operation,
            &request.policy,
            request.now,
        )
        .await?;

        if let Admission::Denied { retry_after } = admission {
            tx.rollback().await?;
            // a concurrent twin may have just committed this key
            if let Some(ref claim) = request.claim {
                if let Some(outcome) = self
                    .classify_existing(tenant_id, &request.operation, &claim.key, &claim.fingerprint)
                    .await?
                {
                    return Ok(Some(outcome));
                }
            }
            return Ok(Some(StageOutcome::RateLimited { retry_after }));
        }

        Self::insert_asset(tx.conn()?, &request.asset).await?;

        if let Some(ref claim) = request.claim {
            let inserted = sqlx::query(
                r#"
                INSERT INTO idempotency_records (
                    tenant_id, operation, idempotency_key, request_fingerprint,
                    resource_id, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(tenant_id)
            .bind(&request.operation)
            .bind(&claim.key)
            .bind(&claim.fingerprint)
            .bind(request.asset.id)
            .bind(request.now)
            .execute(tx.conn()?)
            .await;

            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    tx.rollback().await?;
                    tracing::debug!(
                        tenant_id = %tenant_id,
                        operation = %request.operation,
                        "Idempotency key claimed concurrently, classifying existing record"
                    );
                    return self
                        .classify_existing(tenant_id, &request.operation, &claim.key, &claim.fingerprint)
                        .await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit().await?;
        Ok(Some(StageOutcome::Created(request.asset.clone().into_asset())))
    }
}

#[async_trait]
impl AssetStore for PgAssetStore {
    async fn find_idempotency_record(
        &self,
        tenant_id: Uuid,
        operation: &str,
        idempotency_key: &str,
    ) -> Result<Option<IdempotencyRecord>, AppError> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_record(&mut conn, tenant_id, operation, idempotency_key).await
    }

    async fn stage(&self, request: StageRequest) -> Result<StageOutcome, AppError> {
        // a unique violation whose record vanished before the refetch (GC) is retried once
        for _ in 0..2 {
            if let Some(outcome) = self.try_stage(&request).await? {
                return Ok(outcome);
            }
        }
        Err(AppError::Internal(
            "idempotency record changed during creation".to_string(),
        ))
    }

    async fn get(&self, tenant_id: Uuid, asset_id: Uuid) -> Result<Option<Asset>, AppError> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_asset(&mut conn, tenant_id, asset_id, false).await
    }

    async fn get_public(&self, asset_id: Uuid) -> Result<Option<Asset>, AppError> {
        let sql = format!(
            "SELECT {} FROM uploaded_assets WHERE id = $1 AND status = 'ready' AND visibility = 'public'",
            ASSET_COLUMNS
        );
        let row = sqlx::query_as::<_, AssetRow>(&sql)
            .bind(asset_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Asset::try_from).transpose()
    }

    async fn record_content(
        &self,
        tenant_id: Uuid,
        asset_id: Uuid,
        receipt: ContentReceipt,
    ) -> Result<ContentRecorded, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        let Some(current) = Self::fetch_asset(tx.conn()?, tenant_id, asset_id, true).await? else {
            tx.rollback().await?;
            return Ok(ContentRecorded::NotFound);
        };

        if current.status == AssetStatus::Ready {
            tx.rollback().await?;
            return Ok(ContentRecorded::AlreadyReady(current));
        }

        let sql = format!(
            r#"
            UPDATE uploaded_assets
            SET status = 'content_received',
                content_key = $3,
                received_size_bytes = $4,
                received_content_type = $5,
                content_digest = $6,
                content_received_at = $7,
                updated_at = $7
            WHERE id = $1 AND tenant_id = $2
            RETURNING {}
            "#,
            ASSET_COLUMNS
        );
        let row = sqlx::query_as::<_, AssetRow>(&sql)
            .bind(asset_id)
            .bind(tenant_id)
            .bind(&receipt.content_key)
            .bind(receipt.size_bytes)
            .bind(&receipt.content_type)
            .bind(&receipt.digest)
            .bind(receipt.received_at)
            .fetch_one(tx.conn()?)
            .await?;

        tx.commit().await?;

        Ok(ContentRecorded::Recorded {
            asset: Asset::try_from(row)?,
            superseded_key: superseded_key(current.content_key, &receipt.content_key),
        })
    }

    async fn mark_ready(
        &self,
        tenant_id: Uuid,
        asset_id: Uuid,
        expected_digest: &str,
        public_url: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Asset>, AppError> {
        let sql = format!(
            r#"
            UPDATE uploaded_assets
            SET status = 'ready', public_url = $3, completed_at = $4, updated_at = $4
            WHERE id = $1 AND tenant_id = $2
              AND status = 'content_received' AND content_digest = $5
              AND upload_expires_at >= $4
            RETURNING {}
            "#,
            ASSET_COLUMNS
        );
        let row = sqlx::query_as::<_, AssetRow>(&sql)
            .bind(asset_id)
            .bind(tenant_id)
            .bind(public_url)
            .bind(now)
            .bind(expected_digest)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Asset::try_from).transpose()
    }

    async fn admit(
        &self,
        tenant_id: Uuid,
        operation: &str,
        policy: &RateLimitPolicy,
        now: DateTime<Utc>,
    ) -> Result<Admission, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;
        let admission = Self::try_admit(tx.conn()?, tenant_id, operation, policy, now).await?;
        tx.commit().await?;
        Ok(admission)
    }

    async fn list_expired_unfinished(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Asset>, AppError> {
        let sql = format!(
            r#"
            SELECT {} FROM uploaded_assets
            WHERE status <> 'ready' AND upload_expires_at < $1
            ORDER BY upload_expires_at ASC
            LIMIT $2
            "#,
            ASSET_COLUMNS
        );
        let rows = sqlx::query_as::<_, AssetRow>(&sql)
            .bind(now)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Asset::try_from).collect()
    }

    async fn delete_expired_unfinished(
        &self,
        tenant_id: Uuid,
        asset_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM uploaded_assets
            WHERE id = $1 AND tenant_id = $2
              AND status <> 'ready' AND upload_expires_at < $3
            "#,
        )
        .bind(asset_id)
        .bind(tenant_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
