//! Configuration loading for peerdrop-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`). Every
//! field has a default, so an empty file or no file at all is valid. The
//! `PORT` environment variable overrides the listening port.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Root configuration for peerdrop-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Message limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Listening port (default: 3001).
    #[serde(default = "default_port")]
    pub port: u16,
    /// WebSocket path (default: /ws).
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

/// Message limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Largest accepted signaling message in bytes (default: 64 KiB).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Sustained messages per client per second (default: 50).
    #[serde(default = "default_messages_per_second")]
    pub messages_per_second: u32,
    /// Burst allowance per client (default: 200).
    ///
    /// Negotiation sends a burst of candidates right after pairing.
    #[serde(default = "default_message_burst")]
    pub message_burst: u32,
    /// Messages per second across all clients (default: 5000).
    #[serde(default = "default_global_messages_per_second")]
    pub global_messages_per_second: u32,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024
}

fn default_messages_per_second() -> u32 {
    50
}

fn default_message_burst() -> u32 {
    200
}

fn default_global_messages_per_second() -> u32 {
    5000
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            ws_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            messages_per_second: default_messages_per_second(),
            message_burst: default_message_burst(),
            global_messages_per_second: default_global_messages_per_second(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Apply a `PORT` override, if present.
    pub fn apply_port_override(&mut self, port: Option<&str>) -> Result<(), ConfigError> {
        if let Some(port) = port {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port.to_string()))?;
        }
        Ok(())
    }

    /// Check limits and paths for values the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.ws_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "server.ws_path must start with '/': {}",
                self.server.ws_path
            )));
        }
        if self.limits.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_message_size must be > 0".into(),
            ));
        }
        if self.limits.messages_per_second == 0
            || self.limits.message_burst == 0
            || self.limits.global_messages_per_second == 0
        {
            return Err(ConfigError::Invalid("rate limits must be > 0".into()));
        }
        Ok(())
    }

    /// Socket address to listen on.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.server.bind_address, self.server.port);
        addr.parse().map_err(|_| ConfigError::InvalidAddress(addr))
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// `PORT` is not a port number.
    #[error("invalid port: {0}")]
    InvalidPort(String),
    /// Bind address and port do not form a socket address.
    #[error("invalid listen address: {0}")]
    InvalidAddress(String),
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.server.ws_path, "/ws");
        assert_eq!(config.limits.max_message_size, 64 * 1024);
        assert!(config.http.metrics_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1"
port = 4000

[limits]
max_message_size = 1024
messages_per_second = 5

[http]
metrics_enabled = false
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.limits.max_message_size, 1024);
        assert_eq!(config.limits.messages_per_second, 5);
        assert_eq!(config.limits.message_burst, 200);
        assert!(!config.http.metrics_enabled);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.limits.global_messages_per_second, 5000);
    }

    #[test]
    fn config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 3100").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 3100);
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();

        let result = Config::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn port_override_wins() {
        let mut config = Config::default();
        config.apply_port_override(Some("8080")).unwrap();
        assert_eq!(config.server.port, 8080);

        config.apply_port_override(None).unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn bad_port_override_is_rejected() {
        let mut config = Config::default();
        assert!(matches!(
            config.apply_port_override(Some("http")),
            Err(ConfigError::InvalidPort(_))
        ));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut config = Config::default();
        config.limits.messages_per_second = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn socket_addr_joins_host_and_port() {
        let config = Config::default();
        assert_eq!(config.socket_addr().unwrap().port(), 3001);
    }
}
