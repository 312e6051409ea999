use axum_test::TestServer;
use serde_json::{json, Value};
use upstage_core::models::{CompleteUploadResponse, CreateUploadResponse};

use super::{api_path, server_path};

/// Twelve bytes that start with the PNG signature.
pub const LOGO_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nabcd";

pub fn create_request(idempotency_key: Option<&str>, size_bytes: usize) -> Value {
    let mut body = json!({
        "fileName": "logo.png",
        "contentType": "image/png",
        "sizeBytes": size_bytes,
    });
    if let Some(key) = idempotency_key {
        body["idempotencyKey"] = json!(key);
    }
    body
}

pub async fn create_upload(
    client: &TestServer,
    auth: &str,
    purpose: &str,
    body: &Value,
) -> axum_test::TestResponse {
    client
        .post(&api_path(&format!("/assets/uploads/{}", purpose)))
        .add_header("Authorization", auth.to_string())
        .json(body)
        .await
}

pub async fn put_content(
    client: &TestServer,
    auth: &str,
    upload: &CreateUploadResponse,
    content_type: &str,
    bytes: &[u8],
) -> axum_test::TestResponse {
    client
        .put(&server_path(&upload.upload.url))
        .add_header("Authorization", auth.to_string())
        .bytes(bytes.to_vec().into())
        .content_type(content_type)
        .await
}

pub async fn complete(
    client: &TestServer,
    auth: &str,
    upload: &CreateUploadResponse,
    purpose: &str,
) -> axum_test::TestResponse {
    client
        .post(&api_path(&format!(
            "/assets/uploads/{}/complete/{}",
            upload.asset_id, purpose
        )))
        .add_header("Authorization", auth.to_string())
        .await
}

/// Stage, upload and complete a business logo; returns both responses.
pub async fn upload_logo(
    client: &TestServer,
    auth: &str,
    idempotency_key: &str,
) -> (CreateUploadResponse, CompleteUploadResponse) {
    let created = create_upload(
        client,
        auth,
        "business_logo",
        &create_request(Some(idempotency_key), LOGO_BYTES.len()),
    )
    .await;
    assert_eq!(created.status_code(), 200);
    let upload: CreateUploadResponse = created.json();

    let put = put_content(client, auth, &upload, "image/png", LOGO_BYTES).await;
    assert_eq!(put.status_code(), 204);

    let completed = complete(client, auth, &upload, "business_logo").await;
    assert_eq!(completed.status_code(), 200);
    (upload, completed.json())
}
