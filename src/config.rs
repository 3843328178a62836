use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{HttpTimestampClient, StoreConfig, StoreError};
use crate::sync::{SyncConfig, DEFAULT_POLL_INTERVAL};

const MIN_POLL_INTERVAL_MS: u64 = 10;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Application configuration
/// Loads a .env file when one is present, then reads READALONG_* variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory with one offline bundle per audiobook
    pub timestamps_dir: PathBuf,
    /// Base URL of the timestamp endpoint; `None` disables network fallback
    pub api_base_url: Option<String>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timestamps_dir: default_timestamps_dir(),
            api_base_url: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        if dotenvy::dotenv().is_ok() {
            info!("Config: loaded .env file");
        }
        Self::from_env()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Invalid values are logged and replaced
    /// by their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = non_empty(lookup("READALONG_TIMESTAMPS_DIR")) {
            config.timestamps_dir = PathBuf::from(dir);
        }

        config.api_base_url = non_empty(lookup("READALONG_API_BASE_URL"));

        if let Some(value) = non_empty(lookup("READALONG_POLL_INTERVAL_MS")) {
            match parse_poll_interval(&value) {
                Ok(interval) => config.poll_interval = interval,
                Err(e) => warn!("Config: {}, using {:?}", e, config.poll_interval),
            }
        }

        if let Some(value) = non_empty(lookup("READALONG_REQUEST_TIMEOUT_SECS")) {
            match parse_request_timeout(&value) {
                Ok(timeout) => config.request_timeout = timeout,
                Err(e) => warn!("Config: {}, using {:?}", e, config.request_timeout),
            }
        }

        info!(
            timestamps_dir = %config.timestamps_dir.display(),
            network = config.api_base_url.is_some(),
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            "Config: loaded"
        );
        config
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            timestamps_dir: self.timestamps_dir.clone(),
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: self.poll_interval,
        }
    }

    /// Client for the configured endpoint, if any
    pub fn http_client(&self) -> Option<Result<HttpTimestampClient, StoreError>> {
        self.api_base_url
            .as_ref()
            .map(|base_url| HttpTimestampClient::new(base_url.clone(), self.request_timeout))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_poll_interval(value: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<u64>()
        .ok()
        .filter(|ms| *ms >= MIN_POLL_INTERVAL_MS)
        .map(Duration::from_millis)
        .ok_or_else(|| ConfigError::InvalidValue {
            name: "READALONG_POLL_INTERVAL_MS",
            value: value.to_string(),
        })
}

fn parse_request_timeout(value: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidValue {
            name: "READALONG_REQUEST_TIMEOUT_SECS",
            value: value.to_string(),
        })
}

/// ~/.readalong/timestamps, or a relative directory when there is no home
fn default_timestamps_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".readalong")
        .join("timestamps")
}
