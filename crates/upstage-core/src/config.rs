//! Configuration module
//!
//! Settings are read from the environment (after loading `.env` with dotenvy) into
//! [`BaseConfig`] and [`UploadServiceConfig`], wrapped by [`Config`].

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::rate_limit::RateLimitPolicy;
use crate::storage_types::{StorageBackend, StoreBackend};
use crate::constants::GC_PENDING_LIMIT;

// Common constants
const SERVER_PORT: u16 = 3000;
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const MAX_CONCURRENT_REQUESTS: usize = 512;

// Upload protocol constants
const MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;
const UPLOAD_MIN_SPACING_MS: u64 = 250;
const UPLOAD_RATE_WINDOW_SECS: u64 = 60;
const UPLOAD_RATE_MAX: u32 = 60;
const COMPLETE_MIN_SPACING_MS: u64 = 150;
const COMPLETE_RATE_MAX: u32 = 120;
const UPLOAD_EXPIRY_SECS: u64 = 600;
const STORAGE_TIMEOUT_SECS: u64 = 30;
const VERIFY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ALLOWED_CONTENT_TYPES: &str = "image/png,image/jpeg,image/webp,image/gif";

/// Base configuration shared by the API server and the CLI
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub max_concurrent_requests: usize,
    pub environment: String,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            server_port: SERVER_PORT,
            cors_origins: vec!["*".to_string()],
            db_max_connections: MAX_CONNECTIONS,
            db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            max_concurrent_requests: MAX_CONCURRENT_REQUESTS,
            environment: "development".to_string(),
        }
    }
}

/// Upload service configuration
#[derive(Clone, Debug)]
pub struct UploadServiceConfig {
    pub base: BaseConfig,
    pub database_url: Option<String>,
    pub store_backend: StoreBackend,
    // Blob storage
    pub storage_backend: StorageBackend,
    pub local_storage_path: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // S3-compatible providers (MinIO etc.)
    /// Externally reachable base URL used in upload descriptors and public URLs
    pub public_base_url: String,
    /// Bearer key that authenticates as the default tenant
    pub master_api_key: Option<String>,
    // Upload protocol
    pub max_upload_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub upload_min_spacing_ms: u64,
    pub upload_rate_window_seconds: u64,
    pub upload_rate_max: u32,
    /// Completion throttle; shares the upload rate window length
    pub complete_min_spacing_ms: u64,
    pub complete_rate_max: u32,
    pub upload_expiry_seconds: u64,
    pub storage_timeout_seconds: u64,
    pub verify_timeout_seconds: u64,
    pub gc_pending_limit: i64,
}

impl Default for UploadServiceConfig {
    fn default() -> Self {
        Self {
            base: BaseConfig::default(),
            database_url: None,
            store_backend: StoreBackend::Memory,
            storage_backend: StorageBackend::Local,
            local_storage_path: None,
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            public_base_url: format!("http://localhost:{}", SERVER_PORT),
            master_api_key: None,
            max_upload_bytes: MAX_UPLOAD_BYTES,
            allowed_content_types: split_list(DEFAULT_ALLOWED_CONTENT_TYPES),
            upload_min_spacing_ms: UPLOAD_MIN_SPACING_MS,
            upload_rate_window_seconds: UPLOAD_RATE_WINDOW_SECS,
            upload_rate_max: UPLOAD_RATE_MAX,
            complete_min_spacing_ms: COMPLETE_MIN_SPACING_MS,
            complete_rate_max: COMPLETE_RATE_MAX,
            upload_expiry_seconds: UPLOAD_EXPIRY_SECS,
            storage_timeout_seconds: STORAGE_TIMEOUT_SECS,
            verify_timeout_seconds: VERIFY_TIMEOUT_SECS,
            gc_pending_limit: GC_PENDING_LIMIT,
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl UploadServiceConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let cors_origins_str = env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());
        let cors_origins: Vec<String> = cors_origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let server_port = env::var("SERVER_PORT")
            .or_else(|_| env::var("PORT"))
            .unwrap_or_else(|_| SERVER_PORT.to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("SERVER_PORT must be a valid number"))?;

        let base = BaseConfig {
            server_port,
            cors_origins,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: env_or("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
            max_concurrent_requests: env_or("MAX_CONCURRENT_REQUESTS", MAX_CONCURRENT_REQUESTS),
            environment,
        };

        let database_url = env_opt("DATABASE_URL");

        let store_backend = match env_opt("STORE_BACKEND") {
            Some(value) => value.parse()?,
            None if database_url.is_some() => StoreBackend::Postgres,
            None => StoreBackend::Memory,
        };

        let storage_backend = match env_opt("STORAGE_BACKEND") {
            Some(value) => value.parse()?,
            None => StorageBackend::Local,
        };

        let public_base_url = env_opt("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", server_port))
            .trim_end_matches('/')
            .to_string();

        let allowed_content_types = split_list(
            &env::var("ALLOWED_CONTENT_TYPES")
                .unwrap_or_else(|_| DEFAULT_ALLOWED_CONTENT_TYPES.to_string()),
        );

        Ok(Self {
            base,
            database_url,
            store_backend,
            storage_backend,
            local_storage_path: env_opt("LOCAL_STORAGE_PATH"),
            s3_bucket: env_opt("S3_BUCKET"),
            s3_region: env_opt("S3_REGION").or_else(|| env_opt("AWS_REGION")),
            s3_endpoint: env_opt("S3_ENDPOINT"),
            public_base_url,
            master_api_key: env_opt("MASTER_API_KEY"),
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", MAX_UPLOAD_BYTES),
            allowed_content_types,
            upload_min_spacing_ms: env_or("UPLOAD_MIN_SPACING_MS", UPLOAD_MIN_SPACING_MS),
            upload_rate_window_seconds: env_or(
                "UPLOAD_RATE_WINDOW_SECONDS",
                UPLOAD_RATE_WINDOW_SECS,
            ),
            upload_rate_max: env_or("UPLOAD_RATE_MAX", UPLOAD_RATE_MAX),
            complete_min_spacing_ms: env_or("COMPLETE_MIN_SPACING_MS", COMPLETE_MIN_SPACING_MS),
            complete_rate_max: env_or("COMPLETE_RATE_MAX", COMPLETE_RATE_MAX),
            upload_expiry_seconds: env_or("UPLOAD_EXPIRY_SECONDS", UPLOAD_EXPIRY_SECS),
            storage_timeout_seconds: env_or("STORAGE_TIMEOUT_SECONDS", STORAGE_TIMEOUT_SECS),
            verify_timeout_seconds: env_or("VERIFY_TIMEOUT_SECONDS", VERIFY_TIMEOUT_SECS),
            gc_pending_limit: env_or("GC_PENDING_LIMIT", GC_PENDING_LIMIT),
        })
    }

    pub fn is_production(&self) -> bool {
        let env = self.base.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.is_production() && self.base.cors_origins.iter().any(|o| o.trim() == "*") {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        if self.store_backend == StoreBackend::Postgres {
            match self.database_url.as_deref() {
                Some(url) if url.starts_with("postgresql://") || url.starts_with("postgres://") => {}
                _ => {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be a valid PostgreSQL connection string"
                    ))
                }
            }
        }

        if self.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_UPLOAD_BYTES must be greater than 0"));
        }
        if self.allowed_content_types.is_empty() {
            return Err(anyhow::anyhow!("ALLOWED_CONTENT_TYPES must not be empty"));
        }
        if self.upload_rate_max == 0 || self.upload_rate_window_seconds == 0 {
            return Err(anyhow::anyhow!(
                "UPLOAD_RATE_MAX and UPLOAD_RATE_WINDOW_SECONDS must be greater than 0"
            ));
        }
        if self.complete_rate_max == 0 {
            return Err(anyhow::anyhow!("COMPLETE_RATE_MAX must be greater than 0"));
        }
        if self.upload_expiry_seconds == 0 {
            return Err(anyhow::anyhow!("UPLOAD_EXPIRY_SECONDS must be greater than 0"));
        }
        if self.storage_timeout_seconds == 0 || self.verify_timeout_seconds == 0 {
            return Err(anyhow::anyhow!(
                "STORAGE_TIMEOUT_SECONDS and VERIFY_TIMEOUT_SECONDS must be greater than 0"
            ));
        }
        if !self.public_base_url.starts_with("http://")
            && !self.public_base_url.starts_with("https://")
        {
            return Err(anyhow::anyhow!(
                "PUBLIC_BASE_URL must start with http:// or https://"
            ));
        }

        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<UploadServiceConfig>);

impl Config {
    fn as_upload(&self) -> &UploadServiceConfig {
        &self.0
    }

    pub fn new(inner: UploadServiceConfig) -> Self {
        Config(Box::new(inner))
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        self.as_upload().is_production()
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = UploadServiceConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.as_upload().validate()
    }

    pub fn server_port(&self) -> u16 {
        self.as_upload().base.server_port
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.as_upload().base.cors_origins
    }

    pub fn db_max_connections(&self) -> u32 {
        self.as_upload().base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.as_upload().base.db_timeout_seconds
    }

    pub fn max_concurrent_requests(&self) -> usize {
        self.as_upload().base.max_concurrent_requests
    }

    pub fn database_url(&self) -> Option<&str> {
        self.as_upload().database_url.as_deref()
    }

    pub fn store_backend(&self) -> StoreBackend {
        self.as_upload().store_backend
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.as_upload().storage_backend
    }

    pub fn local_storage_path(&self) -> Option<&str> {
        self.as_upload().local_storage_path.as_deref()
    }

    pub fn s3_bucket(&self) -> Option<&str> {
        self.as_upload().s3_bucket.as_deref()
    }

    pub fn s3_region(&self) -> Option<&str> {
        self.as_upload().s3_region.as_deref()
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.as_upload().s3_endpoint.as_deref()
    }

    pub fn public_base_url(&self) -> &str {
        &self.as_upload().public_base_url
    }

    pub fn master_api_key(&self) -> Option<&str> {
        self.as_upload().master_api_key.as_deref()
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.as_upload().max_upload_bytes
    }

    pub fn allowed_content_types(&self) -> &[String] {
        &self.as_upload().allowed_content_types
    }

    pub fn upload_expiry(&self) -> Duration {
        Duration::from_secs(self.as_upload().upload_expiry_seconds)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.as_upload().storage_timeout_seconds)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.as_upload().verify_timeout_seconds)
    }

    pub fn gc_pending_limit(&self) -> i64 {
        self.as_upload().gc_pending_limit
    }

    /// Rate-limit policy applied to upload creation
    pub fn upload_rate_limit(&self) -> RateLimitPolicy {
        let cfg = self.as_upload();
        RateLimitPolicy {
            min_spacing: Duration::from_millis(cfg.upload_min_spacing_ms),
            window: Duration::from_secs(cfg.upload_rate_window_seconds),
            max_in_window: cfg.upload_rate_max,
        }
    }

    /// Rate-limit policy applied to upload completion
    pub fn complete_rate_limit(&self) -> RateLimitPolicy {
        let cfg = self.as_upload();
        RateLimitPolicy {
            min_spacing: Duration::from_millis(cfg.complete_min_spacing_ms),
            window: Duration::from_secs(cfg.upload_rate_window_seconds),
            max_in_window: cfg.complete_rate_max,
        }
    }
}
