//! Environment configuration.
//!
//! Loaded once at startup. An optional `.env` file is read first (via
//! `dotenvy`); real environment variables win over it.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use portico_auth::TokenConfig;

const DEV_JWT_SECRET: &str = "portico-dev-secret-change-me";

/// Upper bound for any credential lifetime.
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(3_650 * 86_400);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid duration '{value}' (expected <n>s, <n>m, <n>h or <n>d)")]
    InvalidDuration { var: &'static str, value: String },

    #[error("{var}: invalid number '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var}: invalid listen address '{value}'")]
    InvalidAddress { var: &'static str, value: String },

    #[error("{var}: lifetime '{value}' exceeds the 3650d maximum")]
    TtlTooLong { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse().map_err(|_| ConfigError::InvalidAddress {
            var: "SERVER_HOST",
            value: raw,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `None` selects the in-memory store.
    pub url: Option<String>,
    pub max_connections: u32,
    pub call_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub tokens: TokenConfig,
    pub sweep_interval: Duration,
}

impl AppConfig {
    /// Read `.env` (if any) and then the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let server = ServerConfig {
            host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: number(&get, "SERVER_PORT", 8000)?,
            shutdown_grace: duration(&get, "SHUTDOWN_GRACE", Duration::from_secs(10))?,
        };

        let database = DatabaseConfig {
            url: get("DATABASE_URL"),
            max_connections: number(&get, "DB_MAX_CONNECTIONS", 10)?,
            call_timeout: duration(&get, "STORE_CALL_TIMEOUT", Duration::from_secs(5))?,
        };

        let secret = match get("JWT_SECRET") {
            Some(secret) => secret,
            None => {
                warn!("JWT_SECRET is not set; using the development secret");
                DEV_JWT_SECRET.to_string()
            }
        };

        let mut tokens = TokenConfig::new(secret);
        if let Some(issuer) = get("JWT_ISSUER") {
            tokens.issuer = issuer;
        }
        tokens.platform_ttl = ttl(&get, "JWT_PLATFORM_EXPIRY", tokens.platform_ttl)?;
        tokens.system_ttl = ttl(&get, "JWT_SYSTEM_EXPIRY", tokens.system_ttl)?;
        tokens.refresh_ttl = ttl(&get, "JWT_REFRESH_EXPIRY", tokens.refresh_ttl)?;

        Ok(Self {
            server,
            database,
            tokens,
            sweep_interval: duration(&get, "SESSION_SWEEP_INTERVAL", Duration::from_secs(300))?,
        })
    }
}

/// Parse `<n>s|m|h|d`. A bare number is read as seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value.find(|c: char| !c.is_ascii_digit()).unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let n: u64 = digits.parse().ok()?;
    let secs = match unit {
        "" | "s" => n,
        "m" => n.checked_mul(60)?,
        "h" => n.checked_mul(3_600)?,
        "d" => n.checked_mul(86_400)?,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

fn duration<G>(get: &G, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(value) => parse_duration(&value).ok_or(ConfigError::InvalidDuration { var, value }),
    }
}

fn ttl<G>(get: &G, var: &'static str, default: chrono::Duration) -> Result<chrono::Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(value) = get(var) else {
        return Ok(default);
    };
    let Some(parsed) = parse_duration(&value).filter(|d| !d.is_zero()) else {
        return Err(ConfigError::InvalidDuration { var, value });
    };
    if parsed > MAX_TOKEN_TTL {
        return Err(ConfigError::TtlTooLong { var, value });
    }
    chrono::Duration::from_std(parsed).map_err(|_| ConfigError::InvalidDuration { var, value })
}

fn number<G, T>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(var) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidNumber { var, value }),
    }
}
