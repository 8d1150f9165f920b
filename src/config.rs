//! Configuration for the ingest server.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values. Invalid values are
//! rejected up front (clap exits non-zero on malformed options) instead of
//! silently falling back to defaults.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the ingest server
#[derive(Parser, Debug)]
#[command(name = "bulk-ingest")]
#[command(author = "bulk-ingest authors")]
#[command(version = "0.1.0")]
#[command(about = "A TCP ingest server batching line commands", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// TCP port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Number of commands per bulk
    #[arg(long, alias = "bulk_size")]
    pub bulk_size: Option<usize>,

    /// TCP port to listen on (positional form)
    #[arg(index = 1, value_name = "PORT", conflicts_with = "port")]
    pub port_pos: Option<u16>,

    /// Number of commands per bulk (positional form)
    #[arg(index = 2, value_name = "BULK_SIZE", conflicts_with = "bulk_size")]
    pub bulk_size_pos: Option<usize>,

    /// Log every received command
    #[arg(short, long)]
    pub verbose: bool,

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
    pub batch: BatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// TCP port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Batching-related configuration
#[derive(Debug, Deserialize)]
pub struct BatchConfig {
    /// Number of commands per bulk
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            bulk_size: default_bulk_size(),
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

fn default_port() -> u16 {
    9000
}

fn default_bulk_size() -> usize {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bulk_size: usize,
    pub verbose: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse())
    }

    fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Config {
            port: cli
                .port
                .or(cli.port_pos)
                .unwrap_or(toml_config.server.port),
            bulk_size: cli
                .bulk_size
                .or(cli.bulk_size_pos)
                .unwrap_or(toml_config.batch.bulk_size),
            verbose: cli.verbose,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        if config.bulk_size == 0 {
            return Err(ConfigError::InvalidBulkSize);
        }

        Ok(config)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidBulkSize,
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
            ConfigError::InvalidBulkSize => {
                write!(f, "bulk_size must be at least 1")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
