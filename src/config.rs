use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub data_dir: PathBuf,
    pub database_path: PathBuf,

    // Scraping
    pub max_concurrent_scrapes: usize,
    pub fetch_timeout: Duration,

    // Wayback Machine
    pub wayback_timeout: Duration,

    // Renderer
    pub renderer_pool_size: usize,
    pub chromium_enabled: bool,
    pub chromium_path: Option<PathBuf>,

    // Web Server
    pub web_host: String,
    pub web_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable holds an unparseable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Storage
            data_dir: PathBuf::from(env_or_default("DATA_DIR", "./data")),
            database_path: PathBuf::from(env_or_default("DATABASE_PATH", "./data/archiver.sqlite")),

            // Scraping
            max_concurrent_scrapes: parse_env_usize("MAX_CONCURRENT_SCRAPES", 4)?,
            fetch_timeout: Duration::from_secs(parse_env_u64("FETCH_TIMEOUT_SECS", 30)?),

            // Wayback Machine
            wayback_timeout: Duration::from_secs(parse_env_u64("WAYBACK_TIMEOUT_SECS", 10)?),

            // Renderer
            renderer_pool_size: parse_env_usize("RENDERER_POOL_SIZE", 2)?,
            chromium_enabled: parse_env_bool("CHROMIUM_ENABLED", true)?,
            chromium_path: optional_env("CHROMIUM_PATH").map(PathBuf::from),

            // Web Server
            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("WEB_PORT", 8080)?,
        })
    }

    /// Configuration with fixed defaults for tests, read from no environment.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            database_path: PathBuf::from("./data/archiver.sqlite"),
            max_concurrent_scrapes: 2,
            fetch_timeout: Duration::from_secs(5),
            wayback_timeout: Duration::from_secs(5),
            renderer_pool_size: 1,
            chromium_enabled: false,
            chromium_path: None,
            web_host: "127.0.0.1".to_string(),
            web_port: 0,
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_scrapes == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_CONCURRENT_SCRAPES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.renderer_pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RENDERER_POOL_SIZE".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "FETCH_TIMEOUT_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}
