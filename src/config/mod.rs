//! # Controller Configuration
//!
//! Controller-level configuration loaded from environment variables
//! (populated from a ConfigMap via `envFrom` in the deployment).
//!
//! All configuration has sensible defaults and can be overridden via
//! environment variables. Values are validated once at startup; an invalid
//! time layout or unknown poll status policy aborts initialization.

use crate::constants::*;
use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;

/// Timeout, scheduling, and collaborator settings for the reconciler
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Multiplier applied to `webhook_timeout` to derive the overall
    /// reconciliation budget
    pub timeout_factor: u32,
    /// Per-call webhook timeout ceiling and per-webhook default
    pub webhook_timeout: Duration,
    /// Requeue spacing when the descriptor declares no retry interval
    pub requeue_interval: Duration,
    /// Persisted timestamp layout; only RFC3339 with nanoseconds is valid
    pub time_layout: TimeLayout,
    /// Worker pool bound for concurrent reconciles
    pub max_concurrent_reconciles: u16,
    /// Director GraphQL endpoint
    pub director_url: String,
    /// Bounded attempts for the optimistic-concurrency status update loop
    pub status_update_attempts: u32,
    /// Delay step between status update conflict retries
    pub status_retry_delay: Duration,
    /// What to do when a poll returns a status string the descriptor's
    /// identifiers don't cover
    pub unknown_poll_status_policy: UnknownPollStatusPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            timeout_factor: DEFAULT_TIMEOUT_FACTOR,
            webhook_timeout: Duration::from_secs(DEFAULT_WEBHOOK_TIMEOUT_SECS),
            requeue_interval: Duration::from_secs(DEFAULT_REQUEUE_INTERVAL_SECS),
            time_layout: TimeLayout::Rfc3339Nano,
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            director_url: DEFAULT_DIRECTOR_URL.to_string(),
            status_update_attempts: DEFAULT_STATUS_UPDATE_ATTEMPTS,
            status_retry_delay: Duration::from_millis(DEFAULT_STATUS_RETRY_DELAY_MS),
            unknown_poll_status_policy: UnknownPollStatusPolicy::Ignore,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    ///
    /// Returns a validation error for an unsupported `TIME_LAYOUT` or
    /// `UNKNOWN_POLL_STATUS_POLICY` value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let time_layout = match std::env::var("TIME_LAYOUT") {
            Ok(value) => TimeLayout::parse(&value)?,
            Err(_) => TimeLayout::Rfc3339Nano,
        };
        let unknown_poll_status_policy = match std::env::var("UNKNOWN_POLL_STATUS_POLICY") {
            Ok(value) => UnknownPollStatusPolicy::parse(&value)?,
            Err(_) => UnknownPollStatusPolicy::Ignore,
        };

        Ok(Self {
            timeout_factor: env_var_or_default("TIMEOUT_FACTOR", DEFAULT_TIMEOUT_FACTOR),
            webhook_timeout: Duration::from_secs(env_var_or_default(
                "WEBHOOK_TIMEOUT_SECS",
                DEFAULT_WEBHOOK_TIMEOUT_SECS,
            )),
            requeue_interval: Duration::from_secs(env_var_or_default(
                "REQUEUE_INTERVAL_SECS",
                DEFAULT_REQUEUE_INTERVAL_SECS,
            )),
            time_layout,
            max_concurrent_reconciles: env_var_or_default(
                "MAX_CONCURRENT_RECONCILES",
                DEFAULT_MAX_CONCURRENT_RECONCILES,
            ),
            director_url: std::env::var("DIRECTOR_URL")
                .unwrap_or_else(|_| DEFAULT_DIRECTOR_URL.to_string()),
            status_update_attempts: env_var_or_default(
                "STATUS_UPDATE_ATTEMPTS",
                DEFAULT_STATUS_UPDATE_ATTEMPTS,
            ),
            status_retry_delay: Duration::from_millis(env_var_or_default(
                "STATUS_RETRY_DELAY_MS",
                DEFAULT_STATUS_RETRY_DELAY_MS,
            )),
            unknown_poll_status_policy,
        })
    }

    /// The overall reconciliation budget: `timeout_factor × webhook_timeout`
    pub fn reconciliation_timeout(&self) -> Duration {
        self.webhook_timeout * self.timeout_factor
    }
}

/// HTTP server configuration
///
/// All settings have sensible defaults and can be overridden via environment
/// variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP server port for metrics and health probes
    pub metrics_port: u16,
    /// Server startup timeout (seconds)
    pub startup_timeout_secs: u64,
    /// Server readiness poll interval (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
        }
    }
}

/// Layout used for every persisted timestamp
///
/// Fixed to RFC3339 with nanosecond precision. The variant exists so the
/// layout is configured, validated, and threaded explicitly rather than
/// assumed at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeLayout {
    Rfc3339Nano,
}

impl TimeLayout {
    /// Parse the configured layout name; anything but `rfc3339nano` is a
    /// startup validation error
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            DEFAULT_TIME_LAYOUT => Ok(TimeLayout::Rfc3339Nano),
            other => Err(ConfigError::UnsupportedTimeLayout {
                value: other.to_string(),
            }),
        }
    }

    /// Format a timestamp in the persisted layout
    pub fn format(&self, timestamp: DateTime<Utc>) -> String {
        match self {
            TimeLayout::Rfc3339Nano => timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
        }
    }

    /// Parse a persisted timestamp; any other format is an error the caller
    /// treats as fatal for the current pass
    pub fn parse_timestamp(&self, value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        match self {
            TimeLayout::Rfc3339Nano => {
                DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc))
            }
        }
    }
}

/// Policy for a poll status string not covered by the descriptor identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownPollStatusPolicy {
    /// Stop polling without failing the Operation; it stays InProgress and is
    /// only visible through logs
    Ignore,
    /// Terminate the Operation as Failed with an unknown-status message
    Fail,
}

impl UnknownPollStatusPolicy {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "ignore" | "Ignore" => Ok(UnknownPollStatusPolicy::Ignore),
            "fail" | "Fail" => Ok(UnknownPollStatusPolicy::Fail),
            other => Err(ConfigError::UnsupportedPollStatusPolicy {
                value: other.to_string(),
            }),
        }
    }
}

/// Startup validation failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("unsupported time layout {value:?}: only \"rfc3339nano\" is supported")]
    UnsupportedTimeLayout { value: String },
    #[error("unsupported unknown-poll-status policy {value:?}: expected \"ignore\" or \"fail\"")]
    UnsupportedPollStatusPolicy { value: String },
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
