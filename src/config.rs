use crate::core::{GatewayError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: Option<LoggingConfig>,
}

/// Connection parameters for the single database session.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database (schema) name
    pub name: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Seconds of inactivity before the server drops the session.
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// One of `trace`, `debug`, `info`, `warn`, `error`
    pub level: Option<String>,
}

fn default_port() -> u16 {
    3306
}

fn default_wait_timeout() -> u32 {
    300
}

impl DatabaseConfig {
    /// Builds a configuration with default port and wait timeout.
    pub fn new(host: &str, name: &str, username: &str, password: &str) -> Self {
        DatabaseConfig {
            host: host.to_string(),
            port: default_port(),
            name: name.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            wait_timeout: default_wait_timeout(),
        }
    }
}

impl Config {
    /// Parses configuration from TOML text and checks required fields.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.database.host.trim().is_empty() {
            return Err(GatewayError::Config("database.host must not be empty".to_string()));
        }
        if config.database.name.trim().is_empty() {
            return Err(GatewayError::Config("database.name must not be empty".to_string()));
        }
        Ok(config)
    }

    /// Log level from the `[logging]` table, defaulting to `info`.
    pub fn log_level(&self) -> tracing::Level {
        self.logging
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .and_then(|level| level.parse().ok())
            .unwrap_or(tracing::Level::INFO)
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// let config = tablegate::config::load_config("config.toml").expect("Failed to load config");
/// println!("{:?}", config.database.host);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path.as_ref()).map_err(|e| {
        GatewayError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
    })?;
    Config::from_toml_str(&content)
}

/// Default configuration location: `<config dir>/tablegate/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tablegate").join("config.toml"))
}
