//! Configuration for the Prometheus exporter.

use jetsight_common::{Format, LoggingConfig, load_config, parse_config};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::mapping::sanitize_metric_name;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] jetsight_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Telemetry daemon connection settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// Local system facts settings.
    #[serde(default)]
    pub system: SystemConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Telemetry daemon connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path of the daemon's Unix socket (default: "/run/jtop.sock").
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Frame encoding spoken by the daemon (default: json).
    #[serde(default)]
    pub format: Format,

    /// Upper bound for establishing the connection, in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Upper bound for a single snapshot read, in milliseconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Reconnection policy after the daemon drops.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_socket_path() -> String {
    "/run/jtop.sock".to_string()
}

fn default_connect_timeout() -> u64 {
    5_000
}

fn default_read_timeout() -> u64 {
    2_000
}

impl SourceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            format: Format::default(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Reconnection with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Try to reopen a dropped connection (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// First wait after a failure, in milliseconds.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Ceiling for the doubled wait, in milliseconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_initial_backoff() -> u64 {
    1_000
}

fn default_max_backoff() -> u64 {
    30_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

/// Local system facts configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Mount point whose usage is reported (default: "/data").
    #[serde(default = "default_mount_point")]
    pub mount_point: String,
}

fn default_mount_point() -> String {
    "/data".to_string()
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            mount_point: default_mount_point(),
        }
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9000").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Metric name prefix (default: "jetson").
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Append the exporter's own scrape counters to every response.
    #[serde(default)]
    pub exporter_metrics: bool,
}

fn default_listen() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_prefix() -> String {
    "jetson".to_string()
}

impl PrometheusConfig {
    /// Replace the port of the listen address, keeping the host.
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        let mut addr = self.listen_addr()?;
        addr.set_port(port);
        self.listen = addr.to_string();
        Ok(())
    }

    /// Parse the listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|_| ConfigError::Validation(format!("Invalid listen address: {}", self.listen)))
    }
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            prefix: default_prefix(),
            exporter_metrics: false,
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.socket_path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "socket_path must not be empty".to_string(),
            ));
        }

        if self.source.connect_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "connect_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.source.read_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "read_timeout_ms must be > 0".to_string(),
            ));
        }

        let reconnect = &self.source.reconnect;
        if reconnect.initial_backoff_ms == 0 || reconnect.initial_backoff_ms > reconnect.max_backoff_ms
        {
            return Err(ConfigError::Validation(
                "initial_backoff_ms must be > 0 and <= max_backoff_ms".to_string(),
            ));
        }

        if self.system.mount_point.trim().is_empty() {
            return Err(ConfigError::Validation(
                "mount_point must not be empty".to_string(),
            ));
        }

        self.prometheus.listen_addr()?;

        // Validate path starts with /
        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        // An empty prefix leaves the bare family names
        let prefix = &self.prometheus.prefix;
        if !prefix.is_empty() && sanitize_metric_name(prefix) != *prefix {
            return Err(ConfigError::Validation(format!(
                "Invalid metric prefix: {}",
                self.prometheus.prefix
            )));
        }

        Ok(())
    }
}
