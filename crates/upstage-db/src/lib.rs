//! upstage persistence
//!
//! The [`AssetStore`] and [`TenantDirectory`] seams with their PostgreSQL and
//! in-memory implementations.

pub mod db;

pub use db::*;
