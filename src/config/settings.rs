//! Environment-driven application settings.
//!
//! Version dependencies:
//! - dotenv = "0.15"
//! - url = "2.3"

use std::env;
use std::time::Duration;

use dotenv::dotenv;
use thiserror::Error;
use url::Url;

use crate::resilience::circuit_breaker::CircuitBreakerConfig;

// Defaults
pub const BASE_CURRENCY: &str = "TRY";
pub const DEFAULT_COLLECT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TREND_HISTORY_LIMIT: i64 = 10;
pub const DEFAULT_TRENDING_TOP_N: usize = 5;
pub const DEFAULT_ARBITRAGE_THRESHOLD: f64 = 10.0;

// Required environment variables
const REQUIRED_ENV_VARS: &[&str] = &[
    "DATABASE_URL",
    "REDIS_URL",
    "EXCHANGE_RATE_URL",
    "PROVIDER_BASE_URL",
];

/// Configuration error. Raised only at bootstrap; nothing downstream
/// re-validates the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),
    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub redis_url: String,
    pub exchange_rate_url: String,
    pub provider_base_url: String,
    pub base_currency: String,
    pub collect_interval: Duration,
    pub collector_cache_ttl_secs: u64,
    pub collector_timeout: Duration,
    pub collector_max_retries: u32,
    pub breaker_failure_threshold: u32,
    pub breaker_success_threshold: u32,
    pub breaker_timeout: Duration,
    pub breaker_half_open_max_calls: u32,
    pub trend_history_limit: i64,
    pub trending_top_n: usize,
    pub arbitrage_threshold_percent: f64,
    pub log_level: Option<String>,
}

impl Settings {
    /// Loads settings from the process environment (and `.env` if present),
    /// validating required variables and endpoint URLs.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        for var in REQUIRED_ENV_VARS {
            if env::var(var).is_err() {
                return Err(ConfigError::MissingVar(var.to_string()));
            }
        }

        let settings = Settings {
            database_url: env::var("DATABASE_URL").unwrap_or_default(),
            redis_url: env::var("REDIS_URL").unwrap_or_default(),
            exchange_rate_url: env::var("EXCHANGE_RATE_URL").unwrap_or_default(),
            provider_base_url: env::var("PROVIDER_BASE_URL").unwrap_or_default(),
            base_currency: env::var("BASE_CURRENCY").unwrap_or_else(|_| BASE_CURRENCY.to_string()),
            collect_interval: Duration::from_secs(parse_var(
                "COLLECT_INTERVAL_SECS",
                DEFAULT_COLLECT_INTERVAL_SECS,
            )?),
            collector_cache_ttl_secs: parse_var("COLLECTOR_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)?,
            collector_timeout: Duration::from_secs(parse_var(
                "COLLECTOR_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            collector_max_retries: parse_var("COLLECTOR_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            breaker_failure_threshold: parse_var("BREAKER_FAILURE_THRESHOLD", 5)?,
            breaker_success_threshold: parse_var("BREAKER_SUCCESS_THRESHOLD", 2)?,
            breaker_timeout: Duration::from_secs(parse_var("BREAKER_TIMEOUT_SECS", 60)?),
            breaker_half_open_max_calls: parse_var("BREAKER_HALF_OPEN_MAX_CALLS", 3)?,
            trend_history_limit: parse_var("TREND_HISTORY_LIMIT", DEFAULT_TREND_HISTORY_LIMIT)?,
            trending_top_n: parse_var("TRENDING_TOP_N", DEFAULT_TRENDING_TOP_N)?,
            arbitrage_threshold_percent: parse_var(
                "ARBITRAGE_THRESHOLD_PERCENT",
                DEFAULT_ARBITRAGE_THRESHOLD,
            )?,
            log_level: env::var("LOG_LEVEL").ok(),
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (value, var) in [
            (&self.exchange_rate_url, "EXCHANGE_RATE_URL"),
            (&self.provider_base_url, "PROVIDER_BASE_URL"),
        ] {
            Url::parse(value).map_err(|e| ConfigError::InvalidValue {
                var: var.to_string(),
                message: e.to_string(),
            })?;
        }

        if self.collector_timeout < Duration::from_secs(1) {
            return Err(ConfigError::InvalidValue {
                var: "COLLECTOR_TIMEOUT_SECS".to_string(),
                message: "timeout must be at least 1 second".to_string(),
            });
        }

        Ok(())
    }

    /// Full products URL for one provider.
    pub fn provider_url(&self, slug: &str) -> String {
        format!(
            "{}/api/v1/providers/{}/products",
            self.provider_base_url.trim_end_matches('/'),
            slug
        )
    }

    /// Circuit-breaker configuration for one provider. Historically noisy
    /// sources get a tighter failure threshold.
    pub fn breaker_config(&self, slug: &str) -> CircuitBreakerConfig {
        let failure_threshold = match slug {
            "alpine-gear" => self.breaker_failure_threshold.min(3),
            "dag-spor" => self.breaker_failure_threshold.min(4),
            _ => self.breaker_failure_threshold,
        };
        CircuitBreakerConfig {
            failure_threshold,
            success_threshold: self.breaker_success_threshold,
            timeout: self.breaker_timeout,
            half_open_max_calls: self.breaker_half_open_max_calls,
        }
    }
}

fn parse_var<T: std::str::FromStr>(var: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: var.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
