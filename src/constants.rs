//! # Constants
//!
//! Default tunables for the controller. Every value can be overridden via
//! environment variables; see `crate::config`.

/// Multiplier applied to the webhook timeout to derive the overall
/// reconciliation budget
pub const DEFAULT_TIMEOUT_FACTOR: u32 = 2;

/// Per-call webhook timeout ceiling and per-webhook default (seconds)
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 120;

/// Default requeue spacing when the descriptor declares no retry interval
/// (seconds)
pub const DEFAULT_REQUEUE_INTERVAL_SECS: u64 = 60;

/// The only supported persisted timestamp layout
pub const DEFAULT_TIME_LAYOUT: &str = "rfc3339nano";

/// Worker pool bound for concurrent reconciles of distinct Operation keys
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: u16 = 10;

/// Default Director GraphQL endpoint
pub const DEFAULT_DIRECTOR_URL: &str = "http://director:3000/graphql";

/// Bounded attempts for the optimistic-concurrency status update loop
pub const DEFAULT_STATUS_UPDATE_ATTEMPTS: u32 = 8;

/// Delay step between status update conflict retries (milliseconds)
pub const DEFAULT_STATUS_RETRY_DELAY_MS: u64 = 50;

/// HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// How long to wait for the HTTP server to become ready (seconds)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 30;

/// How often to check server readiness during startup (milliseconds)
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 100;

/// Fraction of the webhook timeout after which an in-flight Operation is
/// counted as near its timeout
pub const NEAR_TIMEOUT_FRACTION: f64 = 0.9;
