// ============================================================================
// Portico Config - Centralized configuration management
// ============================================================================
//
// All tunables come from environment variables with sensible defaults.
// Configuration is read once at startup and is read-only afterwards; no
// component re-reads the environment at request time.
//
// ============================================================================

mod throttle;
mod upstreams;

pub use throttle::{ThrottleConfig, ThrottleRule};
pub use upstreams::{CircuitBreakerConfig, UpstreamConfig, UpstreamsConfig};

use anyhow::Result;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_REDIS_PORT: u16 = 6379;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_REFERENCE_TTL_SECS: u64 = 600;
const DEFAULT_MAX_UPLOAD_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// Main configuration structure for the gateway
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub redis_url: String,

    /// Remote identity provider used for bearer-token introspection
    pub auth_service_url: String,

    /// Static API keys accepted in API-key mode (comma-separated in env)
    pub static_api_tokens: Vec<String>,

    /// Source-service tags recognized as internal callers
    pub internal_services: Vec<String>,

    pub throttle: ThrottleConfig,
    pub upstreams: UpstreamsConfig,
    pub cache: CacheConfig,
    pub uploads: UploadConfig,
    pub cors: CorsConfig,

    pub rust_log: String,
}

/// Response-cache tuning
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// TTL for per-item and list reads
    pub ttl_secs: u64,
    /// TTL for reference data (categories, statistics)
    pub reference_ttl_secs: u64,
}

impl CacheConfig {
    fn from_env() -> Self {
        Self {
            ttl_secs: env_parse("CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS),
            reference_ttl_secs: env_parse(
                "CACHE_REFERENCE_TTL_SECS",
                DEFAULT_CACHE_REFERENCE_TTL_SECS,
            ),
        }
    }
}

/// File-upload limits and spool location
#[derive(Clone, Debug)]
pub struct UploadConfig {
    pub max_size_bytes: usize,
    pub allowed_extensions: Vec<String>,
    /// Spool directory, relative to the working directory
    pub dir: String,
}

impl UploadConfig {
    fn from_env() -> Self {
        let allowed = std::env::var("UPLOAD_ALLOWED_EXTENSIONS").unwrap_or_else(|_| {
            "jpg,jpeg,png,gif,pdf,doc,docx,xls,xlsx,txt,csv".to_string()
        });
        Self {
            max_size_bytes: env_parse("MAX_UPLOAD_SIZE_BYTES", DEFAULT_MAX_UPLOAD_SIZE_BYTES),
            allowed_extensions: split_csv(&allowed),
            dir: std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string()),
        }
    }
}

/// CORS policy. An empty allow-list means any origin is accepted.
#[derive(Clone, Debug)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    fn from_env() -> Self {
        let origins = std::env::var("CORS_ALLOWED_ORIGINS").unwrap_or_default();
        Self {
            allowed_origins: split_csv(&origins),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let port: u16 = env_parse("PORT", DEFAULT_PORT);
        let redis_host =
            std::env::var("REDIS_HOST_MASTER").unwrap_or_else(|_| "localhost".to_string());
        let redis_port: u16 = env_parse("REDIS_PORT", DEFAULT_REDIS_PORT);

        let static_api_tokens =
            split_csv(&std::env::var("STATIC_API_TOKEN").unwrap_or_default());
        if static_api_tokens.is_empty() {
            tracing::warn!("STATIC_API_TOKEN is empty - API-key authentication will reject all keys");
        }

        let internal_services = split_csv(
            &std::env::var("INTERNAL_SERVICES")
                .unwrap_or_else(|_| "scheduler,billing,reporting".to_string()),
        );

        Ok(Self {
            port,
            bind_address: format!("0.0.0.0:{}", port),
            redis_url: format!("redis://{}:{}", redis_host, redis_port),
            auth_service_url: std::env::var("AUTH_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),
            static_api_tokens,
            internal_services,
            throttle: ThrottleConfig::from_env(),
            upstreams: UpstreamsConfig::from_env(),
            cache: CacheConfig::from_env(),
            uploads: UploadConfig::from_env(),
            cors: CorsConfig::from_env(),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Parse an env var, falling back to the default on absence or parse failure
pub(crate) fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

pub(crate) fn env_bool(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(false)
}

/// Split a comma-separated env value, trimming and dropping empties
pub(crate) fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
