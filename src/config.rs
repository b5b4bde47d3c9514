//! Configuration management for halo-gate.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! command-line flags and their environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::error::{HaloError, Result};
use crate::ratelimit::PolicyTable;

/// Main configuration for the admission service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HaloConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Bearer token for the admin routes; admin routes are off when unset
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            admin_token: None,
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Redis connection string for the shared counter store
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Connect and command timeout for the shared store, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// How often the in-memory store drops expired counters, in seconds
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,

    /// General bucket: requests allowed per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// General bucket: window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            store_timeout_ms: default_store_timeout_ms(),
            purge_interval_secs: default_purge_interval(),
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
        }
    }
}

fn default_store_timeout_ms() -> u64 {
    250
}

fn default_purge_interval() -> u64 {
    60
}

fn default_max_requests() -> u64 {
    100
}

fn default_window_ms() -> u64 {
    900_000
}

impl RateLimitingConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }

    /// Policy table with the general bucket taken from this configuration.
    pub fn policy_table(&self) -> Result<PolicyTable> {
        PolicyTable::with_general(self.max_requests, self.window_ms / 1000)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

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

impl HaloConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| HaloError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Resolve the final configuration from the command line.
    pub fn load(cli: Cli) -> Result<Self> {
        let mut config = match cli.config.as_deref() {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cli.apply(&mut config);
        config.rate_limiting.policy_table()?;
        Ok(config)
    }
}

/// Command-line interface.
///
/// Every flag can also be set through the environment variable shown in
/// `--help`. Flags win over the configuration file.
#[derive(Debug, Default, Parser)]
#[command(name = "halo-gate", version, about = "Request admission and rate limiting for the HALO API")]
pub struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "HALO_CONFIG")]
    pub config: Option<String>,

    /// HTTP listen address
    #[arg(long, env = "HALO_HTTP_ADDR")]
    pub http_addr: Option<SocketAddr>,

    /// Redis URL for the shared counter store
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Bearer token enabling the admin routes
    #[arg(long, env = "HALO_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    /// Shared store timeout in milliseconds
    #[arg(long, env = "HALO_STORE_TIMEOUT_MS")]
    pub store_timeout_ms: Option<u64>,

    /// General bucket requests per window
    #[arg(long, env = "RATE_LIMIT_MAX_REQUESTS")]
    pub max_requests: Option<u64>,

    /// General bucket window in milliseconds
    #[arg(long, env = "RATE_LIMIT_WINDOW_MS")]
    pub window_ms: Option<u64>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, env = "HALO_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, env = "HALO_LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    fn apply(self, config: &mut HaloConfig) {
        if let Some(addr) = self.http_addr {
            config.server.http_addr = addr;
        }
        if let Some(token) = self.admin_token {
            config.server.admin_token = Some(token);
        }
        if let Some(url) = self.redis_url {
            config.rate_limiting.redis_url = Some(url);
        }
        if let Some(ms) = self.store_timeout_ms {
            config.rate_limiting.store_timeout_ms = ms;
        }
        if let Some(points) = self.max_requests {
            config.rate_limiting.max_requests = points;
        }
        if let Some(ms) = self.window_ms {
            config.rate_limiting.window_ms = ms;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}
