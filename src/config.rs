use crate::stage_store::DEFAULT_QUOTA_BYTES;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Application configuration
/// In debug builds: loads .env first, then reads DOCFLOW_* environment variables
/// In release builds: reads DOCFLOW_* environment variables only
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the document-processing service
    pub api_base_url: String,
    /// Bearer token forwarded on every request
    pub api_token: Option<String>,
    /// SQLite file backing the stage store
    pub store_path: PathBuf,
    /// Encoded-text quota of the stage store
    pub store_quota_bytes: usize,
    pub max_upload_bytes: u64,
    pub template_retries: u32,
    pub template_retry_interval: Duration,
    /// Dedupe window for template metadata lookups
    pub template_cache_ttl: Duration,
    pub progress_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            api_token: None,
            store_path: default_store_path(),
            store_quota_bytes: DEFAULT_QUOTA_BYTES,
            max_upload_bytes: 10 * 1024 * 1024,
            template_retries: 3,
            template_retry_interval: Duration::from_millis(2000),
            template_cache_ttl: Duration::from_secs(30),
            progress_poll_interval: Duration::from_millis(1500),
        }
    }
}

impl Config {
    /// Load configuration based on build mode
    pub fn load() -> Self {
        #[cfg(debug_assertions)]
        {
            if dotenvy::dotenv().is_ok() {
                info!("Config: Dev mode activated - loaded .env file");
            } else {
                info!("Config: No .env file found, using environment only");
            }
        }

        Self::from_env()
    }

    /// Load configuration from DOCFLOW_* environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Self {
            api_base_url: var("DOCFLOW_API_BASE_URL").unwrap_or(defaults.api_base_url),
            api_token: var("DOCFLOW_API_TOKEN"),
            store_path: var("DOCFLOW_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_path),
            store_quota_bytes: parse_or(
                "DOCFLOW_STORE_QUOTA_BYTES",
                var("DOCFLOW_STORE_QUOTA_BYTES"),
                defaults.store_quota_bytes,
            ),
            max_upload_bytes: parse_or(
                "DOCFLOW_MAX_UPLOAD_BYTES",
                var("DOCFLOW_MAX_UPLOAD_BYTES"),
                defaults.max_upload_bytes,
            ),
            template_retries: parse_or(
                "DOCFLOW_TEMPLATE_RETRIES",
                var("DOCFLOW_TEMPLATE_RETRIES"),
                defaults.template_retries,
            ),
            template_retry_interval: Duration::from_millis(parse_or(
                "DOCFLOW_TEMPLATE_RETRY_INTERVAL_MS",
                var("DOCFLOW_TEMPLATE_RETRY_INTERVAL_MS"),
                defaults.template_retry_interval.as_millis() as u64,
            )),
            template_cache_ttl: Duration::from_secs(parse_or(
                "DOCFLOW_TEMPLATE_CACHE_TTL_SECS",
                var("DOCFLOW_TEMPLATE_CACHE_TTL_SECS"),
                defaults.template_cache_ttl.as_secs(),
            )),
            progress_poll_interval: Duration::from_millis(parse_or(
                "DOCFLOW_PROGRESS_POLL_INTERVAL_MS",
                var("DOCFLOW_PROGRESS_POLL_INTERVAL_MS"),
                defaults.progress_poll_interval.as_millis() as u64,
            )),
        };

        info!("Config: document service at {}", config.api_base_url);
        config
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Config: invalid {}={:?}, using {}", key, raw, default);
            default
        }),
    }
}

/// ~/.docflow/stage_store.db, or a relative path when there is no home directory
fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".docflow"))
        .unwrap_or_else(|| PathBuf::from(".docflow"))
        .join("stage_store.db")
}
