//! Client configuration
//!
//! Every knob is overridable: start from [`ClientConfig::default`], a JSON
//! file, or `DAYBOOK_*` environment variables, then adjust with `with_*`.

use daybook_resilience::{BackoffConfig, BackoffPolicy, CircuitBreakerConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A URL did not parse
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL
        url: String,
        /// Parser message
        reason: String,
    },

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// An endpoint name is missing from the table
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Reading or writing the config file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The HTTP client could not be built
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Endpoint names present in the default table
pub mod endpoints {
    /// Login
    pub const LOGIN: &str = "login";
    /// Account registration
    pub const REGISTER: &str = "register";
    /// Logout
    pub const LOGOUT: &str = "logout";
    /// Journal entries collection
    pub const ENTRIES: &str = "entries";
    /// Liveness probe
    pub const HEALTH: &str = "health";
}

/// Configuration for the HTTP pipeline and the persistent socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL that endpoint paths are joined onto
    pub base_url: String,
    /// Endpoint name to path
    pub endpoints: BTreeMap<String, String>,
    /// Base per-attempt request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Retry backoff base delay in milliseconds
    pub retry_base_delay_ms: u64,
    /// Retry backoff cap in milliseconds
    pub retry_max_delay_ms: u64,
    /// Retry jitter bound in milliseconds
    pub retry_jitter_ms: u64,
    /// Socket connection timeout in milliseconds
    pub connection_timeout_ms: u64,
    /// WebSocket URL
    pub socket_url: String,
    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Reconnect backoff base delay in milliseconds
    pub reconnect_base_delay_ms: u64,
    /// Consecutive failures that open the circuit
    pub breaker_threshold: u32,
    /// Cool-down before a half-open probe, in milliseconds
    pub breaker_reset_timeout_ms: u64,
    /// Pause between drained offline requests, in milliseconds
    pub queue_item_delay_ms: u64,
    /// Age of the last successful request after which the client
    /// considers itself offline, in milliseconds
    pub stale_after_ms: u64,
    /// User agent sent with HTTP requests
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let endpoints = [
            (endpoints::LOGIN, "/api/auth/login"),
            (endpoints::REGISTER, "/api/auth/register"),
            (endpoints::LOGOUT, "/api/auth/logout"),
            (endpoints::ENTRIES, "/api/entries"),
            (endpoints::HEALTH, "/api/health"),
        ]
        .into_iter()
        .map(|(name, path)| (name.to_string(), path.to_string()))
        .collect();

        Self {
            base_url: "http://localhost:3000".to_string(),
            endpoints,
            request_timeout_ms: 30_000,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 10_000,
            retry_jitter_ms: 1_000,
            connection_timeout_ms: 5_000,
            socket_url: "ws://localhost:3000".to_string(),
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1_000,
            breaker_threshold: 5,
            breaker_reset_timeout_ms: 60_000,
            queue_item_delay_ms: 100,
            stale_after_ms: 5 * 60 * 1_000,
            user_agent: format!("Daybook/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration for the given server
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Sets the socket URL
    pub fn with_socket_url(mut self, url: impl Into<String>) -> Self {
        self.socket_url = url.into();
        self
    }

    /// Sets the base request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = duration_ms(timeout);
        self
    }

    /// Sets the retry count
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the retry backoff
    pub fn with_retry_backoff(mut self, base: Duration, max: Duration, jitter: Duration) -> Self {
        self.retry_base_delay_ms = duration_ms(base);
        self.retry_max_delay_ms = duration_ms(max);
        self.retry_jitter_ms = duration_ms(jitter);
        self
    }

    /// Sets the socket connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_ms = duration_ms(timeout);
        self
    }

    /// Sets the reconnect policy
    pub fn with_reconnect(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_base_delay_ms = duration_ms(base_delay);
        self
    }

    /// Sets the circuit breaker threshold and reset timeout
    pub fn with_breaker(mut self, threshold: u32, reset_timeout: Duration) -> Self {
        self.breaker_threshold = threshold;
        self.breaker_reset_timeout_ms = duration_ms(reset_timeout);
        self
    }

    /// Sets the pause between drained offline requests
    pub fn with_queue_item_delay(mut self, delay: Duration) -> Self {
        self.queue_item_delay_ms = duration_ms(delay);
        self
    }

    /// Sets the staleness window of the connectivity heuristic
    pub fn with_stale_after(mut self, window: Duration) -> Self {
        self.stale_after_ms = duration_ms(window);
        self
    }

    /// Adds or replaces an endpoint path
    pub fn with_endpoint(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.endpoints.insert(name.into(), path.into());
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_url(&self.base_url)?;
        parse_url(&self.socket_url)?;
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be > 0".into()));
        }
        if self.connection_timeout_ms == 0 {
            return Err(ConfigError::Invalid("connection_timeout_ms must be > 0".into()));
        }
        if self.breaker_threshold == 0 {
            return Err(ConfigError::Invalid("breaker_threshold must be > 0".into()));
        }
        Ok(())
    }

    /// Loads a configuration from a JSON file; missing fields take defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Writes the configuration as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Applies `DAYBOOK_*` overrides from the process environment
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies `DAYBOOK_*` overrides from an arbitrary lookup
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DAYBOOK_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = lookup("DAYBOOK_SOCKET_URL") {
            self.socket_url = v;
        }
        override_num(&lookup, "DAYBOOK_REQUEST_TIMEOUT_MS", &mut self.request_timeout_ms)?;
        override_num(&lookup, "DAYBOOK_MAX_RETRIES", &mut self.max_retries)?;
        override_num(&lookup, "DAYBOOK_RETRY_BASE_DELAY_MS", &mut self.retry_base_delay_ms)?;
        override_num(&lookup, "DAYBOOK_RETRY_MAX_DELAY_MS", &mut self.retry_max_delay_ms)?;
        override_num(&lookup, "DAYBOOK_RETRY_JITTER_MS", &mut self.retry_jitter_ms)?;
        override_num(&lookup, "DAYBOOK_CONNECTION_TIMEOUT_MS", &mut self.connection_timeout_ms)?;
        override_num(&lookup, "DAYBOOK_MAX_RECONNECT_ATTEMPTS", &mut self.max_reconnect_attempts)?;
        override_num(&lookup, "DAYBOOK_RECONNECT_BASE_DELAY_MS", &mut self.reconnect_base_delay_ms)?;
        override_num(&lookup, "DAYBOOK_BREAKER_THRESHOLD", &mut self.breaker_threshold)?;
        override_num(&lookup, "DAYBOOK_BREAKER_RESET_TIMEOUT_MS", &mut self.breaker_reset_timeout_ms)?;
        Ok(self)
    }

    /// Resolves an endpoint name against the base URL
    pub fn endpoint_url(&self, name: &str) -> Result<String, ConfigError> {
        let path = self
            .endpoints
            .get(name)
            .ok_or_else(|| ConfigError::UnknownEndpoint(name.to_string()))?;
        let base = parse_url(&self.base_url)?;
        base.join(path)
            .map(String::from)
            .map_err(|e| ConfigError::InvalidUrl {
                url: path.clone(),
                reason: e.to_string(),
            })
    }

    /// Base per-attempt request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Socket connection timeout
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Pause between drained offline requests
    pub fn queue_item_delay(&self) -> Duration {
        Duration::from_millis(self.queue_item_delay_ms)
    }

    /// Staleness window of the connectivity heuristic
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    /// Backoff used between request retries
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            BackoffConfig::retry()
                .with_base_delay(Duration::from_millis(self.retry_base_delay_ms))
                .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
                .with_jitter(Duration::from_millis(self.retry_jitter_ms)),
        )
    }

    /// Backoff used between socket reconnects
    pub fn reconnect_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(BackoffConfig::reconnect(Duration::from_millis(
            self.reconnect_base_delay_ms,
        )))
    }

    /// Circuit breaker settings
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new("daybook_api")
            .with_failure_threshold(self.breaker_threshold)
            .with_reset_timeout(Duration::from_millis(self.breaker_reset_timeout_ms))
    }
}

fn parse_url(url: &str) -> Result<Url, ConfigError> {
    Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn override_num<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{key} is not a number: {raw}")))?;
    }
    Ok(())
}
