//! # Reconcile Context
//!
//! Per-pass deadline math. The context is computed once after status
//! initialization and discarded at the end of the pass; nothing here is
//! persisted.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::ControllerConfig;
use crate::constants::NEAR_TIMEOUT_FRACTION;
use crate::crd::Operation;
use crate::webhook::Webhook;

/// Ephemeral deadline state for one reconcile pass
#[derive(Debug, Clone, Copy)]
pub struct ReconcileContext {
    /// When the status was initialized for the current generation
    pub initialized_at: DateTime<Utc>,
    /// Absolute time after which the Operation is abandoned regardless of
    /// webhook state: `initialized_at + timeout_factor × webhook_timeout`
    pub reconciliation_deadline: DateTime<Utc>,
    configured_webhook_timeout: Duration,
}

/// The status carries no parseable `initializedAt`; handled like any other
/// malformed persisted timestamp (fatal for this pass)
#[derive(Debug, Clone, thiserror::Error)]
pub enum ContextError {
    #[error("operation status carries no initializedAt timestamp")]
    MissingInitializedAt,
    #[error("unable to parse initializedAt timestamp: {0}")]
    MalformedInitializedAt(#[from] chrono::ParseError),
}

impl ReconcileContext {
    pub fn new(operation: &Operation, config: &ControllerConfig) -> Result<Self, ContextError> {
        let initialized_at = operation
            .status
            .as_ref()
            .and_then(|s| s.initialized_at.as_deref())
            .ok_or(ContextError::MissingInitializedAt)?;
        let initialized_at = config.time_layout.parse_timestamp(initialized_at)?;

        Ok(Self {
            initialized_at,
            reconciliation_deadline: initialized_at
                + chrono_duration(config.reconciliation_timeout()),
            configured_webhook_timeout: config.webhook_timeout,
        })
    }

    /// Effective per-call timeout: the descriptor override bounded by the
    /// configured ceiling
    pub fn webhook_timeout(&self, webhook: Option<&Webhook>) -> Duration {
        webhook
            .and_then(|w| w.timeout_secs)
            .map(Duration::from_secs)
            .map_or(self.configured_webhook_timeout, |override_timeout| {
                override_timeout.min(self.configured_webhook_timeout)
            })
    }

    /// Absolute time bounding a single Do/Poll call
    pub fn webhook_deadline(&self, webhook: Option<&Webhook>) -> DateTime<Utc> {
        self.initialized_at + chrono_duration(self.webhook_timeout(webhook))
    }

    pub fn reconciliation_deadline_passed(&self, now: DateTime<Utc>) -> bool {
        now > self.reconciliation_deadline
    }

    pub fn webhook_deadline_passed(&self, webhook: Option<&Webhook>, now: DateTime<Utc>) -> bool {
        now > self.webhook_deadline(webhook)
    }

    /// Whether the Operation has consumed most of its webhook timeout;
    /// terminal transitions record this as a metric
    pub fn is_close_to_timeout(&self, webhook: Option<&Webhook>, now: DateTime<Utc>) -> bool {
        let in_flight = (now - self.initialized_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        in_flight.as_secs_f64() > self.webhook_timeout(webhook).as_secs_f64() * NEAR_TIMEOUT_FRACTION
    }
}

/// Poll spacing for an async webhook: descriptor interval or the configured
/// requeue interval
pub fn retry_interval(webhook: &Webhook, config: &ControllerConfig) -> Duration {
    webhook
        .retry_interval_secs
        .map_or(config.requeue_interval, Duration::from_secs)
}

/// Time remaining until the next poll is due; zero when the Operation has
/// never been polled or the interval has elapsed
pub fn next_poll_duration(
    operation: &Operation,
    webhook: &Webhook,
    config: &ControllerConfig,
    now: DateTime<Utc>,
) -> Result<Duration, chrono::ParseError> {
    let last_poll_timestamp = operation
        .webhook_status()
        .map(|w| w.last_poll_timestamp.as_str())
        .unwrap_or_default();
    if last_poll_timestamp.is_empty() {
        return Ok(Duration::ZERO);
    }

    let last_poll = config.time_layout.parse_timestamp(last_poll_timestamp)?;
    let next_poll = last_poll + chrono_duration(retry_interval(webhook, config));
    if next_poll > now {
        Ok((next_poll - now).to_std().unwrap_or(Duration::ZERO))
    } else {
        Ok(Duration::ZERO)
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}
