pub mod tenant;

pub use tenant::{InMemoryTenantDirectory, PgTenantDirectory, TenantDirectory};
