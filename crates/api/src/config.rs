//! Environment-driven configuration.
//!
//! Everything the server needs is read once at startup; a missing or
//! invalid required variable aborts boot rather than failing later.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub bind_addr: String,
    pub frontend_url: String,
    pub free_daily_signal_limit: u32,
    pub auth_rate_limit_per_minute: u32,
    pub signal_cache_ttl_seconds: u64,
    pub webhook_dedupe_ttl_seconds: u64,
    pub quota_store_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        anyhow::ensure!(
            jwt_secret.len() >= 32,
            "JWT_SECRET must be at least 32 characters"
        );

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env_or("REDIS_URL", "redis://localhost:6379"),
            jwt_secret,
            jwt_expiry_hours: env_parse("JWT_EXPIRY_HOURS", 24)?,
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8080"),
            frontend_url: env_or("FRONTEND_URL", "http://localhost:3000"),
            free_daily_signal_limit: env_parse("FREE_DAILY_SIGNAL_LIMIT", 3)?,
            auth_rate_limit_per_minute: env_parse("AUTH_RATE_LIMIT_PER_MINUTE", 10)?,
            signal_cache_ttl_seconds: env_parse("SIGNAL_CACHE_TTL_SECONDS", 300)?,
            webhook_dedupe_ttl_seconds: env_parse("WEBHOOK_DEDUPE_TTL_SECONDS", 86_400)?,
            quota_store_timeout: Duration::from_millis(env_parse("QUOTA_STORE_TIMEOUT_MS", 2_000)?),
        })
    }

    #[cfg(test)]
    pub(crate) fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/signals_test".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            jwt_secret: "test-secret-that-is-at-least-32-chars!!".to_string(),
            jwt_expiry_hours: 24,
            bind_addr: "127.0.0.1:0".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            free_daily_signal_limit: 3,
            auth_rate_limit_per_minute: 10,
            signal_cache_ttl_seconds: 300,
            webhook_dedupe_ttl_seconds: 86_400,
            quota_store_timeout: Duration::from_millis(2_000),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{name} is not a valid value")),
        Err(_) => Ok(default),
    }
}
