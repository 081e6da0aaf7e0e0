//! Configuration management for the request throttler.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, ThrottlerError};
use crate::throttle::{AttemptPeriod, TimeUnit};

/// Prefix of environment variables overriding file configuration,
/// e.g. `THROTTLER__THROTTLE__MAX_ATTEMPTS=10`.
const ENV_PREFIX: &str = "THROTTLER";
const ENV_SEPARATOR: &str = "__";

/// Main configuration for the request throttler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThrottlerConfig {
    /// Attempt limits and storage partition
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Shape of the rejection returned to limited clients
    #[serde(default)]
    pub limit_exception: LimitExceptionConfig,

    /// Visitor store behaviour
    #[serde(default)]
    pub store: StoreConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default limits applied when a call site does not override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Attempts permitted per window
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u64,

    /// Window length, in `ttl_units`
    #[serde(default = "default_max_attempt_period")]
    pub max_attempt_period: u64,

    /// Unit of `max_attempt_period` and of per-call period overrides
    #[serde(default = "default_ttl_units")]
    pub ttl_units: TimeUnit,

    /// Store partition that namespaces visitor keys
    #[serde(default = "default_cache_storage")]
    pub cache_storage: String,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_attempt_period: default_max_attempt_period(),
            ttl_units: default_ttl_units(),
            cache_storage: default_cache_storage(),
        }
    }
}

fn default_max_attempts() -> u64 {
    60
}

fn default_max_attempt_period() -> u64 {
    1
}

fn default_ttl_units() -> TimeUnit {
    TimeUnit::Minute
}

fn default_cache_storage() -> String {
    "throttle".to_string()
}

impl ThrottleConfig {
    /// Reject defaults that would leave the effective limits undefined.
    ///
    /// Per-call overrides of zero fall back to these defaults, so they must
    /// be positive for every verification to have a usable limit.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ThrottlerError::Config(
                "max_attempts must be greater than zero".to_string(),
            ));
        }
        if self.max_attempt_period == 0 {
            return Err(ThrottlerError::Config(
                "max_attempt_period must be greater than zero".to_string(),
            ));
        }
        if self.cache_storage.trim().is_empty() {
            return Err(ThrottlerError::Config(
                "cache_storage must name a storage partition".to_string(),
            ));
        }
        Ok(())
    }

    /// The default window length.
    pub fn default_period(&self) -> AttemptPeriod {
        AttemptPeriod::new(self.max_attempt_period, self.ttl_units)
    }

    /// Store key for an identifier within the configured partition.
    pub fn storage_key(&self, identifier: &str) -> String {
        format!("{}:{}", self.cache_storage, identifier)
    }
}

/// Rejection details for clients that exhausted their attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitExceptionConfig {
    #[serde(default = "default_limit_message")]
    pub message: String,

    /// HTTP status
    #[serde(default = "default_limit_status")]
    pub status: u16,

    /// Application error code
    #[serde(default = "default_limit_code")]
    pub code: String,
}

impl Default for LimitExceptionConfig {
    fn default() -> Self {
        Self {
            message: default_limit_message(),
            status: default_limit_status(),
            code: default_limit_code(),
        }
    }
}

fn default_limit_message() -> String {
    "Too Many Requests.".to_string()
}

fn default_limit_status() -> u16 {
    429
}

fn default_limit_code() -> String {
    "E_TOO_MANY_REQUESTS".to_string()
}

impl LimitExceptionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(100..=599).contains(&self.status) {
            return Err(ThrottlerError::Config(format!(
                "limit_exception.status {} is not an HTTP status",
                self.status
            )));
        }
        Ok(())
    }
}

/// Visitor store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Deadline for each store call in milliseconds; unbounded when unset
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Minimum seconds between sweeps of expired in-memory entries
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `request_throttler=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ThrottlerConfig {
    /// Load configuration from a YAML file, then apply `THROTTLER__*`
    /// environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading throttler configuration");

        let contents = std::fs::read_to_string(path)?;

        let config: ThrottlerConfig = ::config::Config::builder()
            .add_source(::config::File::from_str(&contents, ::config::FileFormat::Yaml))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ThrottlerError::Config(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ThrottlerConfig = serde_yaml::from_str(yaml)
            .map_err(|e| ThrottlerError::Config(format!("Failed to parse configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.throttle.validate()?;
        self.limit_exception.validate()?;
        if self.store.timeout_ms == Some(0) {
            return Err(ThrottlerError::Config(
                "store.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.store.cleanup_interval_secs == 0 {
            return Err(ThrottlerError::Config(
                "store.cleanup_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
