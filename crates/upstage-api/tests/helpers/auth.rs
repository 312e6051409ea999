use chrono::Utc;
use upstage_api::auth::api_key::issue_api_key;
use upstage_core::models::{Tenant, TenantStatus};
use upstage_db::Stores;
use uuid::Uuid;

/// Test master API key (must match setup_test_app).
pub const TEST_MASTER_API_KEY: &str = "test-master-api-key-at-least-32-characters-long";

/// A tenant registered in the directory with one live API key.
pub struct TestTenant {
    pub tenant_id: Uuid,
    pub token: String,
}

impl TestTenant {
    pub fn bearer(&self) -> String {
        bearer(&self.token)
    }
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

pub fn master_bearer() -> String {
    bearer(TEST_MASTER_API_KEY)
}

/// Create a tenant with the given status and issue it an API key.
pub async fn create_test_tenant(stores: &Stores, name: &str, status: TenantStatus) -> TestTenant {
    let tenant_id = Uuid::new_v4();
    stores
        .tenants
        .create_tenant(Tenant {
            id: tenant_id,
            name: name.to_string(),
            status,
            created_at: Utc::now(),
        })
        .await
        .expect("Failed to create test tenant");

    let (token, record) = issue_api_key(tenant_id, "integration");
    stores
        .tenants
        .insert_api_key(record)
        .await
        .expect("Failed to insert test API key");

    TestTenant { tenant_id, token }
}
