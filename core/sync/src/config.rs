//! Configuration for GeoSync.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use geosync_common::{Error, Result};

use crate::participants::DEFAULT_PAGE_SIZE;
use crate::retry::RetryConfig;
use crate::scheduler::SyncMode;

/// Environment variable overriding `api_key`.
pub const API_KEY_ENV: &str = "GEOSYNC_API_KEY";

/// Serde helpers for durations stored as whole milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Serde helpers for durations stored as whole seconds.
pub(crate) mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Session and scheduling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Rows requested per page and participant.
    pub page_size: u32,
    /// Interval of the periodic background session.
    #[serde(rename = "periodic_interval_secs", with = "secs")]
    pub periodic_interval: Duration,
    /// Whether the scheduler runs periodically or only on request.
    pub periodic: bool,
    /// Start a session as soon as the scheduler starts.
    pub run_on_start: bool,
}

impl SyncSettings {
    /// Scheduler mode for these settings.
    pub fn mode(&self) -> SyncMode {
        if self.periodic {
            SyncMode::Periodic {
                interval: self.periodic_interval,
            }
        } else {
            SyncMode::Manual
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            periodic_interval: Duration::from_secs(60 * 60),
            periodic: true,
            run_on_start: true,
        }
    }
}

/// Top-level configuration, loaded from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoSyncConfig {
    /// GraphQL endpoint of the authoritative service.
    pub endpoint: String,
    /// Bearer token sent with every request.
    pub api_key: Option<String>,
    /// Per-request timeout; expiry counts as a connection failure.
    #[serde(rename = "request_timeout_secs", with = "secs")]
    pub request_timeout: Duration,
    /// Location of the local SQLite replica.
    pub database_path: PathBuf,
    pub sync: SyncSettings,
    pub retry: RetryConfig,
}

impl Default for GeoSyncConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/graphql".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(30),
            database_path: default_database_path(),
            sync: SyncSettings::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// `<data dir>/geosync/replica.db`, or `replica.db` when there is no data
/// directory.
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("geosync").join("replica.db"))
        .unwrap_or_else(|| PathBuf::from("replica.db"))
}

impl GeoSyncConfig {
    /// Load and validate a configuration file.
    ///
    /// Missing fields take their defaults; `GEOSYNC_API_KEY` overrides the
    /// file's `api_key`.
    ///
    /// # Errors
    /// - File cannot be read or is not valid JSON
    /// - Validation fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_json(&raw)?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus the `GEOSYNC_API_KEY` override, for running without a
    /// configuration file.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(api_key) = std::env::var(API_KEY_ENV) {
            if !api_key.is_empty() {
                self.api_key = Some(api_key);
            }
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.endpoint_url()?;
        if self.sync.page_size == 0 {
            return Err(Error::Config("sync.page_size must be positive".to_string()));
        }
        if self.sync.periodic && self.sync.periodic_interval.is_zero() {
            return Err(Error::Config(
                "sync.periodic_interval_secs must be positive".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Parsed endpoint URL.
    pub fn endpoint_url(&self) -> Result<Url> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::Config("endpoint must not be empty".to_string()));
        }
        let url = Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("Invalid endpoint '{}': {}", self.endpoint, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(Error::Config(format!(
                "Unsupported endpoint scheme '{}'",
                scheme
            ))),
        }
    }
}
