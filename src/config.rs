//! Engine and server configuration, sourced from the environment.
//!
//! Everything has a usable default so tests and demos run with zero setup;
//! deployments override through `STEPFLOW_*` variables (a local `.env` file
//! is honored via `dotenvy`).

use std::time::Duration;

/// Tunables consulted by node executors and the engine scheduler.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Per-attempt timeout for outbound webhook/api calls.
    pub http_timeout: Duration,
    /// Additional attempts after a transport failure (not HTTP error codes).
    pub http_retries: u32,
    /// Upper clamp on delay-node durations.
    pub max_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            http_retries: 2,
            max_delay: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl EngineConfig {
    /// Read overrides from `STEPFLOW_HTTP_TIMEOUT_SECS`,
    /// `STEPFLOW_HTTP_RETRIES`, and `STEPFLOW_MAX_DELAY_SECS`.
    /// Unset or unparsable values fall back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            http_timeout: env_secs("STEPFLOW_HTTP_TIMEOUT_SECS")
                .unwrap_or(defaults.http_timeout),
            http_retries: env_parse("STEPFLOW_HTTP_RETRIES").unwrap_or(defaults.http_retries),
            max_delay: env_secs("STEPFLOW_MAX_DELAY_SECS").unwrap_or(defaults.max_delay),
        }
    }
}

/// HTTP surface configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Shared secret expected in the `x-api-key` request header.
    pub api_key: String,
    /// Listen address, e.g. `127.0.0.1:3000`.
    pub bind: String,
}

impl ServerConfig {
    /// Read `STEPFLOW_API_KEY` (required) and `STEPFLOW_BIND` (defaulted).
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("STEPFLOW_API_KEY").ok()?;
        let bind =
            std::env::var("STEPFLOW_BIND").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
        Some(Self { api_key, bind })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}
