//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use agrosentinel_arbiter::ArbiterConfig;
use agrosentinel_common::{Error, Result};
use agrosentinel_sync::SyncConfig;
use agrosentinel_transport::Url;

/// Freshness windows for cached reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtls {
    /// Weather served from cache while offline.
    #[serde(with = "agrosentinel_common::duration_ms")]
    pub weather_offline: Duration,
    /// Weather served from cache after a failed live fetch.
    #[serde(with = "agrosentinel_common::duration_ms")]
    pub weather_on_error: Duration,
    /// Default window for cache-first reads.
    #[serde(with = "agrosentinel_common::duration_ms")]
    pub cache_first: Duration,
    /// Entries older than this are removed by `prune_cache`.
    #[serde(with = "agrosentinel_common::duration_ms")]
    pub retention: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            weather_offline: Duration::from_secs(30 * 60),
            weather_on_error: Duration::from_secs(60 * 60),
            cache_first: Duration::from_secs(60 * 60),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the analysis API.
    pub api_base_url: String,
    /// Origin the arbiter serves the shell from.
    pub origin: String,
    /// Database file. `None` uses the platform data directory.
    pub store_path: Option<PathBuf>,
    /// Bound on one HTTP exchange.
    #[serde(with = "agrosentinel_common::duration_ms")]
    pub request_timeout: Duration,
    pub cache_ttls: CacheTtls,
    pub sync: SyncConfig,
    pub arbiter: ArbiterConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            origin: "http://localhost:5173".to_string(),
            store_path: None,
            request_timeout: Duration::from_secs(30),
            cache_ttls: CacheTtls::default(),
            sync: SyncConfig::default(),
            arbiter: ArbiterConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parse a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    /// - Malformed JSON
    /// - Any check in [`AppConfig::validate`]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidInput(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn api_base(&self) -> Result<Url> {
        parse_url("api_base_url", &self.api_base_url)
    }

    pub fn origin_url(&self) -> Result<Url> {
        parse_url("origin", &self.origin)
    }

    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        self.api_base()?;
        self.origin_url()?;
        if self.request_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "request_timeout must be positive".to_string(),
            ));
        }
        if self.cache_ttls.weather_offline.is_zero() || self.cache_ttls.weather_on_error.is_zero()
        {
            return Err(Error::InvalidInput(
                "Weather cache windows must be positive".to_string(),
            ));
        }
        self.sync.validate()?;
        self.arbiter.validate()
    }
}

fn parse_url(field: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value)
        .map_err(|e| Error::InvalidInput(format!("Invalid {} '{}': {}", field, value, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::InvalidInput(format!(
            "Unsupported {} scheme: {}",
            field, other
        ))),
    }
}
