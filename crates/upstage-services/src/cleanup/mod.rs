mod service;

pub use service::{AssetGarbageCollector, GcOptions, GcResult};
