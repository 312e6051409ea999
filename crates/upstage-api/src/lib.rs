//! upstage API Library
//!
//! HTTP handlers, auth middleware, error mapping and application setup for the
//! staged upload service.

mod api_doc;
pub mod constants;
mod handlers;
mod middleware;
pub mod setup;
pub mod telemetry;

pub mod auth;
pub mod error;
pub mod state;

pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
