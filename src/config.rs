//! Configuration module for the chat server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the chat server
#[derive(Parser, Debug)]
#[command(name = "latin-chat")]
#[command(author = "latin-chat authors")]
#[command(version = "0.1.0")]
#[command(about = "A length-prefixed text chat server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:5555)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Listen queue depth
    #[arg(short = 'b', long)]
    pub backlog: Option<i32>,

    /// Maximum number of simultaneous client connections
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Upper bound on a single reactor wait, in milliseconds
    #[arg(long)]
    pub poll_timeout_ms: Option<u64>,

    /// Unsent bytes allowed per client before it is disconnected
    #[arg(long)]
    pub max_pending_output: Option<usize>,

    /// Drop broadcast/whisper/list_users from clients that have not logged in
    #[arg(long)]
    pub require_login: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Listen queue depth
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Connection limit
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Bounded wait of one reactor iteration
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Per-connection output buffer limit in bytes
    #[serde(default = "default_max_pending_output")]
    pub max_pending_output: usize,
    /// Reject chat commands before login
    #[serde(default)]
    pub require_login: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            poll_timeout_ms: default_poll_timeout_ms(),
            max_pending_output: default_max_pending_output(),
            require_login: false,
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

fn default_listen() -> String {
    "0.0.0.0:5555".to_string()
}

fn default_backlog() -> i32 {
    5
}

fn default_max_connections() -> usize {
    1024
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

fn default_max_pending_output() -> usize {
    1024 * 1024 // 1 MB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub backlog: i32,
    pub max_connections: usize,
    pub poll_timeout: Duration,
    pub max_pending_output: usize,
    pub require_login: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 5555)),
            backlog: server.backlog,
            max_connections: server.max_connections,
            poll_timeout: Duration::from_millis(server.poll_timeout_ms),
            max_pending_output: server.max_pending_output,
            require_login: server.require_login,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen: SocketAddr = listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(listen.clone()))?;

        Ok(Config {
            listen,
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            poll_timeout: Duration::from_millis(
                cli.poll_timeout_ms
                    .unwrap_or(toml_config.server.poll_timeout_ms),
            ),
            max_pending_output: cli
                .max_pending_output
                .unwrap_or(toml_config.server.max_pending_output),
            require_login: cli.require_login || toml_config.server.require_login,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, toml::de::Error),
    #[error("Invalid listen address '{0}'")]
    InvalidListen(String),
}
