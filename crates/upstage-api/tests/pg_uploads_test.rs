//! Upload flow against PostgreSQL.
//!
//! Run with: `cargo test -p upstage-api --test pg_uploads_test -- --ignored`
//! Requires Docker for testcontainers (Postgres).

mod helpers;

use futures::future::join_all;
use helpers::auth::{create_test_tenant, master_bearer};
use helpers::fixtures::{create_request, create_upload, upload_logo, LOGO_BYTES};
use helpers::{server_path, setup_pg_test_app};
use std::collections::HashSet;
use upstage_core::models::{AssetStatus, CreateUploadResponse, TenantStatus};

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_upload_flow_on_postgres() {
    let (app, _container) = setup_pg_test_app().await;
    let client = app.client();

    let (upload, completed) = upload_logo(client, &master_bearer(), "idem_pg").await;
    assert_eq!(completed.status, AssetStatus::Ready);

    let served = client.get(&server_path(&upload.public_url)).await;
    assert_eq!(served.status_code(), 200);
    assert_eq!(served.as_bytes().as_ref(), LOGO_BYTES);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_concurrent_creates_on_postgres_stage_one_asset() {
    let (app, _container) = setup_pg_test_app().await;
    let client = app.client();
    let tenant = create_test_tenant(&app.stores, "acme", TenantStatus::Active).await;
    let auth = tenant.bearer();
    let body = create_request(Some("idem_pg_race"), 12);

    let responses = join_all(
        (0..8).map(|_| create_upload(client, &auth, "business_logo", &body)),
    )
    .await;

    let ids: HashSet<_> = responses
        .iter()
        .map(|response| {
            assert_eq!(response.status_code(), 200);
            response.json::<CreateUploadResponse>().asset_id
        })
        .collect();
    assert_eq!(ids.len(), 1);
}
