use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_path: PathBuf,

    // S3 Storage
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,

    // Rendering
    pub render_concurrency: usize,
    pub navigation_timeout: Duration,
    pub network_idle: Duration,
    pub selector_timeout: Duration,
    pub chrome_path: Option<String>,

    // Block lists
    pub blocklist_cache_ttl: Duration,

    // Origin policy
    pub allowed_origins: Vec<String>,

    // Web Server
    pub web_host: String,
    pub web_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Database
            database_path: PathBuf::from(env_or_default(
                "DATABASE_PATH",
                "./data/screenshots.sqlite",
            )),

            // S3 Storage
            s3_bucket: required_env("S3_BUCKET")?,
            s3_region: env_or_default("S3_REGION", "us-east-1"),
            s3_endpoint: optional_env("S3_ENDPOINT"),

            // Rendering
            render_concurrency: parse_env_usize("RENDER_CONCURRENCY", 10)?,
            navigation_timeout: Duration::from_secs(parse_env_u64("NAVIGATION_TIMEOUT_SECS", 30)?),
            network_idle: Duration::from_millis(parse_env_u64("NETWORK_IDLE_MS", 500)?),
            selector_timeout: Duration::from_secs(parse_env_u64("SELECTOR_TIMEOUT_SECS", 10)?),
            chrome_path: optional_env("SCREENSHOT_CHROME_PATH"),

            // Block lists
            blocklist_cache_ttl: Duration::from_secs(parse_env_u64(
                "BLOCKLIST_CACHE_TTL_SECS",
                86_400,
            )?),

            // Origin policy
            allowed_origins: parse_list(&env_or_default("ALLOWED_ORIGINS", "")),

            // Web Server
            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("WEB_PORT", 8080)?,
        })
    }

    /// Configuration with fixed values, independent of the environment.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            database_path: PathBuf::from(":memory:"),
            s3_bucket: "test-bucket".to_string(),
            s3_region: "us-east-1".to_string(),
            s3_endpoint: None,
            render_concurrency: 10,
            navigation_timeout: Duration::from_secs(5),
            network_idle: Duration::from_millis(50),
            selector_timeout: Duration::from_secs(1),
            chrome_path: None,
            blocklist_cache_ttl: Duration::from_secs(60),
            allowed_origins: Vec::new(),
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
        if self.render_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RENDER_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.s3_bucket.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "S3_BUCKET".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.navigation_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "NAVIGATION_TIMEOUT_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.network_idle >= self.navigation_timeout {
            return Err(ConfigError::InvalidValue {
                name: "NETWORK_IDLE_MS".to_string(),
                message: "must be shorter than the navigation timeout".to_string(),
            });
        }
        Ok(())
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
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

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
