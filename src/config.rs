//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use tracing::info;

use crate::error::{GatekeeperError, Result};

/// Prefix for layered environment overrides, e.g.
/// `GATEKEEPER__RATE_LIMITING__MAX_REQUESTS=200`.
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis URL for the distributed store; local-only when unset
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Bound on a single distributed store call in milliseconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    /// Bound on establishing the Redis connection in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            command_timeout_ms: default_command_timeout(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl StoreConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_command_timeout() -> u64 {
    500
}

fn default_connect_timeout() -> u64 {
    2000
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Window length for the global policy and for policies that omit one
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Requests per window for the global policy and for policies that omit one
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Local store sweep interval; derived from the shortest window when unset
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,

    /// Additional or overriding named policies
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            max_requests: default_max_requests(),
            sweep_interval_secs: None,
            policies: Vec::new(),
        }
    }
}

fn default_window_seconds() -> u64 {
    60
}

fn default_max_requests() -> u64 {
    120
}

impl RateLimitingConfig {
    /// Interval for the local store sweep.
    ///
    /// Must be strictly shorter than `shortest_window`. When not configured,
    /// half the shortest window is used.
    pub fn sweep_interval(&self, shortest_window: Duration) -> Result<Duration> {
        match self.sweep_interval_secs {
            Some(0) => Err(GatekeeperError::Config(
                "sweep_interval_secs must be greater than zero".into(),
            )),
            Some(secs) if Duration::from_secs(secs) >= shortest_window => {
                Err(GatekeeperError::Config(format!(
                    "sweep_interval_secs ({}) must be shorter than the shortest window ({}s)",
                    secs,
                    shortest_window.as_secs()
                )))
            }
            Some(secs) => Ok(Duration::from_secs(secs)),
            None => Ok(shortest_window / 2),
        }
    }
}

/// A named policy entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Policy name, also the key namespace
    pub name: String,
    #[serde(default)]
    pub window_seconds: Option<u64>,
    #[serde(default)]
    pub max_requests: Option<u64>,
}

impl GatekeeperConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load layered configuration: defaults, then the optional YAML file,
    /// then `GATEKEEPER__*` environment variables, then the convenience
    /// variables `REDIS_URL`, `RATE_LIMIT_WINDOW_SECONDS` and
    /// `RATE_LIMIT_MAX_REQUESTS`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: GatekeeperConfig = builder.build()?.try_deserialize()?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the environment-level defaults the host application exposes.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("REDIS_URL") {
            self.store.redis_url = Some(url);
        }
        if let Some(value) = lookup("RATE_LIMIT_WINDOW_SECONDS") {
            self.rate_limiting.window_seconds = parse_u64("RATE_LIMIT_WINDOW_SECONDS", &value)?;
        }
        if let Some(value) = lookup("RATE_LIMIT_MAX_REQUESTS") {
            self.rate_limiting.max_requests = parse_u64("RATE_LIMIT_MAX_REQUESTS", &value)?;
        }
        Ok(())
    }

    /// Reject configurations no policy could be built from.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.window_seconds == 0 {
            return Err(GatekeeperError::Config("window_seconds must be greater than zero".into()));
        }
        if self.rate_limiting.max_requests == 0 {
            return Err(GatekeeperError::Config("max_requests must be greater than zero".into()));
        }
        if self.store.command_timeout_ms == 0 {
            return Err(GatekeeperError::Config(
                "command_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.store.connect_timeout_ms == 0 {
            return Err(GatekeeperError::Config(
                "connect_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn parse_u64(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| {
            GatekeeperError::Config(format!(
                "{} must be a positive integer, got '{}'",
                name, value
            ))
        })
}
