//! Server Configuration
//!
//! All configuration comes from environment variables:
//!
//! ## Required
//! - `DATABASE_URL`: SQLite database path or `sqlite://` URL
//! - `JWT_SECRET`: HMAC secret for session tokens
//!
//! ## Optional
//! - `SERVER_PORT`: listen port (default: 8080)
//! - `ENVIRONMENT`: `development` or `production` (default: development);
//!   controls the secure-cookie and HSTS flags
//! - `JWT_EXPIRY`: token lifetime (default: `24h`)
//! - `WAL_PATH`: append log path (default: `data/wal_messages`)
//! - `RATE_LIMIT_MAX_REQUESTS`: admissions per window (default: 100)
//! - `RATE_LIMIT_WINDOW`: admission window (default: `1m`)
//! - `RATE_LIMIT_BLOCK_TIME`: advisory block duration (default: `5m`)
//! - `DRAIN_INTERVAL`: log-to-store drain tick (default: `1m`)
//!
//! Durations accept `ms`, `s`, `m` and `h` suffixes; a bare number means
//! seconds.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Deployment environment, controlling transport-security behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    fn parse(value: &str) -> Environment {
        match value {
            "production" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_port: u16,
    pub environment: Environment,
    pub jwt_expiry: Duration,
    pub wal_path: PathBuf,

    pub rate_limit_max_requests: u64,
    pub rate_limit_window: Duration,
    /// Advisory only: carried for compatibility with existing deployments;
    /// the limiter itself is a plain fixed window.
    pub rate_limit_block_time: Duration,

    pub drain_interval: Duration,
}

impl Config {
    /// Load configuration from the environment. Missing required values are
    /// fatal startup errors.
    pub fn from_env() -> Result<Config, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;
        let jwt_secret =
            std::env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;

        Ok(Config {
            database_url,
            jwt_secret,
            server_port: env_parse("SERVER_PORT", 8080)?,
            environment: Environment::parse(&env_or("ENVIRONMENT", "development")),
            jwt_expiry: env_duration("JWT_EXPIRY", "24h")?,
            wal_path: PathBuf::from(env_or("WAL_PATH", "data/wal_messages")),
            rate_limit_max_requests: env_parse("RATE_LIMIT_MAX_REQUESTS", 100)?,
            rate_limit_window: env_duration("RATE_LIMIT_WINDOW", "1m")?,
            rate_limit_block_time: env_duration("RATE_LIMIT_BLOCK_TIME", "5m")?,
            drain_interval: env_duration("DRAIN_INTERVAL", "1m")?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr + Copy>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}

fn env_duration(key: &'static str, default: &str) -> Result<Duration, ConfigError> {
    let value = env_or(key, default);
    parse_duration(&value).ok_or(ConfigError::Invalid { key, value })
}

/// Parse `300ms`, `30s`, `5m`, `2h` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits.parse().ok()?;

    match unit {
        "ms" => Some(Duration::from_millis(amount)),
        "" | "s" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_secs(amount * 60)),
        "h" => Some(Duration::from_secs(amount * 3600)),
        _ => None,
    }
}
