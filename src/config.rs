//! Configuration module for the request-echo server.
//!
//! Supports command-line arguments, the `PORT` environment variable and an
//! optional TOML configuration file. CLI arguments and the environment take
//! precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8080;

/// Command-line arguments for the echo server
#[derive(Parser, Debug, Default)]
#[command(name = "request-echo")]
#[command(version)]
#[command(about = "Diagnostic HTTP server that echoes each request's wire format", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Port to listen on (an empty value means the default, 8080)
    #[arg(short, long, env = "PORT")]
    pub port: Option<String>,

    /// Address to bind to (e.g., 0.0.0.0 or ::)
    #[arg(long)]
    pub host: Option<String>,

    /// Seconds to wait for in-flight requests once shutdown begins
    #[arg(long)]
    pub shutdown_timeout: Option<u64>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    pub port: Option<u16>,
    /// Drain deadline in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Number of worker threads
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            shutdown_timeout: default_shutdown_timeout(),
            max_connections: default_max_connections(),
            workers: None,
        }
    }
}

/// Request size limits
#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    /// Largest accepted request head (request line plus headers) in bytes
    #[serde(default = "default_max_header_size")]
    pub max_header_size: usize,
    /// Largest accepted request body in bytes, unbounded when unset
    #[serde(default)]
    pub max_body_size: Option<usize>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_header_size: default_max_header_size(),
            max_body_size: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_shutdown_timeout() -> u64 {
    5
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_header_size() -> usize {
    1024 * 1024 // 1 MB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub shutdown_timeout: Duration,
    pub max_connections: usize,
    pub workers: Option<usize>,
    pub max_header_size: usize,
    pub max_body_size: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args, the environment and an optional
    /// TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents =
                std::fs::read_to_string(config_path).map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let host = cli.host.unwrap_or(toml_config.server.host);
        let ip: IpAddr = host
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidHost(host.clone()))?;
        let port = resolve_port(cli.port.as_deref(), toml_config.server.port)?;

        Ok(Config {
            listen: SocketAddr::new(ip, port),
            shutdown_timeout: Duration::from_secs(
                cli.shutdown_timeout
                    .unwrap_or(toml_config.server.shutdown_timeout),
            ),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections)
                .max(1),
            workers: cli.workers.or(toml_config.server.workers),
            max_header_size: toml_config.http.max_header_size,
            max_body_size: toml_config.http.max_body_size,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// An absent or empty port falls back to the file value, then to 8080.
fn resolve_port(cli: Option<&str>, file: Option<u16>) -> Result<u16, ConfigError> {
    match cli.map(str::trim).filter(|port| !port.is_empty()) {
        Some(port) => port
            .parse()
            .map_err(|_| ConfigError::InvalidPort(port.to_string())),
        None => Ok(file.unwrap_or(DEFAULT_PORT)),
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid port '{0}'")]
    InvalidPort(String),
    #[error("Invalid listen host '{0}'")]
    InvalidHost(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::merge(CliArgs::default(), TomlConfig::default()).unwrap();
        assert_eq!(config.listen, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.max_connections, 10_000);
        assert_eq!(config.max_header_size, 1024 * 1024);
        assert_eq!(config.max_body_size, None);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_empty_port_uses_default() {
        let cli = CliArgs {
            port: Some(String::new()),
            ..Default::default()
        };
        let config = Config::merge(cli, TomlConfig::default()).unwrap();
        assert_eq!(config.listen.port(), 8080);
    }

    #[test]
    fn test_custom_port() {
        let cli = CliArgs::try_parse_from(["request-echo", "--port", "9090"]).unwrap();
        let config = Config::merge(cli, TomlConfig::default()).unwrap();
        assert_eq!(config.listen.port(), 9090);
    }

    #[test]
    fn test_invalid_port() {
        let cli = CliArgs {
            port: Some("http".to_string()),
            ..Default::default()
        };
        match Config::merge(cli, TomlConfig::default()) {
            Err(ConfigError::InvalidPort(port)) => assert_eq!(port, "http"),
            other => panic!("unexpected: {:?}", other),
        }

        let cli = CliArgs {
            port: Some("70000".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Config::merge(cli, TomlConfig::default()),
            Err(ConfigError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_invalid_host() {
        let cli = CliArgs {
            host: Some("localhost".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Config::merge(cli, TomlConfig::default()),
            Err(ConfigError::InvalidHost(_))
        ));
    }

    #[test]
    fn test_ipv6_host() {
        let cli = CliArgs {
            host: Some("::1".to_string()),
            port: Some("9000".to_string()),
            ..Default::default()
        };
        let config = Config::merge(cli, TomlConfig::default()).unwrap();
        assert_eq!(config.listen, "[::1]:9000".parse().unwrap());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 9999
            shutdown_timeout = 10
            max_connections = 128
            workers = 4

            [http]
            max_header_size = 8192
            max_body_size = 65536

            [logging]
            level = "debug"
        "#;

        let toml_config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(toml_config.server.workers, Some(4));

        let config = Config::merge(CliArgs::default(), toml_config).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9999".parse().unwrap());
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(config.max_connections, 128);
        assert_eq!(config.workers, Some(4));
        assert_eq!(config.max_header_size, 8192);
        assert_eq!(config.max_body_size, Some(65536));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 9999
            shutdown_timeout = 10
        "#,
        )
        .unwrap();
        let cli = CliArgs {
            port: Some("7070".to_string()),
            shutdown_timeout: Some(1),
            log_level: Some("trace".to_string()),
            ..Default::default()
        };

        let config = Config::merge(cli, toml_config).unwrap();
        assert_eq!(config.listen.port(), 7070);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_zero_max_connections_clamped() {
        let cli = CliArgs {
            max_connections: Some(0),
            ..Default::default()
        };
        let config = Config::merge(cli, TomlConfig::default()).unwrap();
        assert_eq!(config.max_connections, 1);
    }
}
