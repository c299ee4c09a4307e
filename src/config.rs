//! Configuration for the rexpress demo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::net::socket::DEFAULT_PORT;
use crate::net::SocketConfig;
use crate::server::{
    ServerOptions, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_REQUEST_SIZE, DEFAULT_POLL_INTERVAL,
    DEFAULT_READ_TIMEOUT,
};
use clap::Parser;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the demo server
#[derive(Parser, Debug, Default)]
#[command(name = "rexpress")]
#[command(author = "rexpress authors")]
#[command(version)]
#[command(about = "A minimal Express-style HTTP server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Interface to bind to (e.g., 127.0.0.1)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Pending connection queue length
    #[arg(long)]
    pub backlog: Option<i32>,

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
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listening socket configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
        }
    }
}

/// Per-connection read limits and loop timing
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    /// Bytes requested per read
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Reading stops before a request grows past this many bytes
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
    /// 0 disables the read timeout
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_request_size: default_max_request_size(),
            read_timeout_ms: default_read_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
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

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_backlog() -> i32 {
    libc::SOMAXCONN
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_request_size() -> usize {
    DEFAULT_MAX_REQUEST_SIZE
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT.as_millis() as u64
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub backlog: i32,
    pub chunk_size: usize,
    pub max_request_size: usize,
    pub read_timeout: Duration,
    pub poll_interval: Duration,
    pub log_level: String,
}

impl Config {
    /// Load configuration from the process arguments and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve `cli` against its TOML file, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let host = cli.host.unwrap_or(toml_config.server.host);
        let host = host
            .parse()
            .map_err(|_| ConfigError::InvalidValue("host", host.clone()))?;

        let limits = toml_config.limits;
        if limits.chunk_size == 0 {
            return Err(ConfigError::InvalidValue("chunk_size", "0".to_string()));
        }
        if limits.max_request_size == 0 {
            return Err(ConfigError::InvalidValue("max_request_size", "0".to_string()));
        }
        if limits.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue("poll_interval_ms", "0".to_string()));
        }

        Ok(Config {
            host,
            port: cli.port.unwrap_or(toml_config.server.port),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            chunk_size: limits.chunk_size,
            max_request_size: limits.max_request_size,
            read_timeout: Duration::from_millis(limits.read_timeout_ms),
            poll_interval: Duration::from_millis(limits.poll_interval_ms),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }

    pub fn socket_config(&self) -> SocketConfig {
        SocketConfig::new(self.port)
            .with_interface(self.host)
            .with_backlog(self.backlog)
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            chunk_size: self.chunk_size,
            max_request_size: self.max_request_size,
            read_timeout: self.read_timeout,
            poll_interval: self.poll_interval,
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(key, value) => {
                write!(f, "Invalid value for '{}': {}", key, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
