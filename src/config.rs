//! Configuration management for Marketgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::error::{MarketgateError, Result};

/// Prefix for environment variable overrides, e.g. `MARKETGATE_SERVER__HTTP_ADDR`.
const ENV_PREFIX: &str = "MARKETGATE";

/// Main configuration for the Marketgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Deployment environment the service runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Test,
    #[default]
    Production,
}

impl Environment {
    /// Whether rate limit checks are skipped unless explicitly forced.
    pub fn bypasses_rate_limits(&self) -> bool {
        matches!(self, Environment::Development | Environment::Test)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Deployment environment
    #[serde(default)]
    pub environment: Environment,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            environment: Environment::default(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Redis URL for the shared counter store; the in-memory store is used when unset
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prefix for bucket keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Enforce limits even in development and test environments
    #[serde(default)]
    pub force_enabled: bool,

    /// Request header that forces enforcement for a single request
    #[serde(default = "default_force_header")]
    pub force_header: String,

    /// Take the client address from `X-Forwarded-For`
    #[serde(default)]
    pub trust_proxy: bool,

    /// Interval between sweeps of expired in-memory entries, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Path to the per-route rules file
    pub rules_path: Option<String>,

    /// Rules reload interval in seconds, 0 disables reloading
    #[serde(default = "default_reload_interval")]
    pub rules_reload_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: default_key_prefix(),
            force_enabled: false,
            force_header: default_force_header(),
            trust_proxy: false,
            sweep_interval_secs: default_sweep_interval(),
            rules_path: None,
            rules_reload_interval_secs: default_reload_interval(),
        }
    }
}

fn default_key_prefix() -> String {
    "temp:ratelimit".to_string()
}

fn default_force_header() -> String {
    "x-force-rate-limit".to_string()
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_reload_interval() -> u64 {
    60
}

impl MarketgateConfig {
    /// Load configuration from an optional file, then apply environment overrides.
    ///
    /// The file format is picked from its extension (YAML, TOML or JSON).
    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Layered load reading overrides from `env` instead of the process
    /// environment when it is given.
    fn load_with_env(
        path: Option<&str>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| MarketgateError::Config(e.to_string()))
    }

    /// Load configuration from a YAML file without environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| MarketgateError::Config(e.to_string()))
    }
}
