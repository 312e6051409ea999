pub mod api_key;
pub mod middleware;
pub mod models;

pub use middleware::{auth_middleware, AuthState};
pub use models::TenantContext;
