//! Staged uploads: create, receive content, complete, serve.

pub mod body;
mod service;

pub use service::{AssetUploadService, UploadSettings};
