//! # Operation Status
//!
//! Status types for the Operation CRD and the pure status transition
//! functions applied by the status manager.
//!
//! Transitions are side-effect free so the persistence layer can re-apply
//! them after a conflict reload, and so they are testable without a cluster.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Operation;

/// Execution state of an Operation or of one webhook within it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum OperationState {
    InProgress,
    Success,
    Failed,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::InProgress => write!(f, "InProgress"),
            OperationState::Success => write!(f, "Success"),
            OperationState::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition type reported on the Operation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionType {
    Ready,
    Error,
}

/// Boolean-like condition status, persisted as "True"/"False"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
}

/// A single observed condition of the Operation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperationCondition {
    pub r#type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Execution status of the single webhook declared by the Operation spec
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookStatus {
    /// Webhook id mirrored from the spec
    pub webhook_id: String,
    /// State of this webhook's execution
    pub state: OperationState,
    /// Number of polls that found the webhook still in progress
    #[serde(default)]
    pub retries_count: i32,
    /// Poll URL returned by an async webhook; empty until the call starts
    #[serde(default)]
    pub webhook_poll_url: String,
    /// RFC3339-nanosecond timestamp of the last poll; empty until first poll
    #[serde(default)]
    pub last_poll_timestamp: String,
}

/// Status of the Operation resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    /// Top-level phase of the Operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<OperationState>,
    /// Ready and Error conditions
    #[serde(default)]
    pub conditions: Vec<OperationCondition>,
    /// At most one webhook sub-status, mirroring the spec's webhook id
    #[serde(default)]
    pub webhooks: Vec<WebhookStatus>,
    /// Spec generation the status reflects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// RFC3339-nanosecond timestamp set when the status was initialized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialized_at: Option<String>,
}

impl OperationStatus {
    /// Look up a condition by type
    pub fn condition(&self, condition_type: ConditionType) -> Option<&OperationCondition> {
        self.conditions.iter().find(|c| c.r#type == condition_type)
    }
}

/// Spec validation error raised during status initialization
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected 0 or 1 webhook for execution, found: {found}")]
pub struct OperationValidationError {
    pub found: usize,
}

/// One status transition, applied as a pure mutation of the Operation status
///
/// The persistence layer re-applies the same transition after a conflict
/// reload, so transitions must be deterministic: timestamps are passed in
/// preformatted rather than read from the clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusTransition {
    /// Reset the status for the current spec generation. No-op when the
    /// observed generation already matches.
    Initialize { initialized_at: String },
    /// Record the poll URL returned by an async webhook invocation
    InProgressWithPollUrl { poll_url: String },
    /// Record poll progress: URL, last poll timestamp, and retry count
    InProgressWithPollUrlAndTimestamp {
        poll_url: String,
        last_poll_timestamp: String,
        retries_count: i32,
    },
    /// Terminal success
    Success,
    /// Terminal failure with a user-visible message
    Failed { message: String },
}

/// Validate the spec's webhook declaration: exactly 0 or 1 webhook ids
pub fn validate_webhook_ids(webhook_ids: &[String]) -> Result<(), OperationValidationError> {
    if webhook_ids.len() > 1 {
        return Err(OperationValidationError {
            found: webhook_ids.len(),
        });
    }
    Ok(())
}

/// Apply a status transition to the Operation in place
///
/// Terminal transitions preserve previously recorded poll metadata
/// (poll URL, retries, last poll timestamp) on the webhook sub-status.
pub fn apply_transition(
    operation: &mut Operation,
    transition: &StatusTransition,
) -> Result<(), OperationValidationError> {
    match transition {
        StatusTransition::Initialize { initialized_at } => {
            validate_webhook_ids(&operation.spec.webhook_ids)?;

            let generation = operation.metadata.generation;
            let observed = operation
                .status
                .as_ref()
                .and_then(|s| s.observed_generation);
            if generation.is_some() && observed == generation {
                return Ok(());
            }

            let webhooks = operation
                .spec
                .webhook_ids
                .iter()
                .map(|id| WebhookStatus {
                    webhook_id: id.clone(),
                    state: OperationState::InProgress,
                    retries_count: 0,
                    webhook_poll_url: String::new(),
                    last_poll_timestamp: String::new(),
                })
                .collect();

            operation.status = Some(OperationStatus {
                phase: Some(OperationState::InProgress),
                conditions: initial_conditions(),
                webhooks,
                observed_generation: generation,
                initialized_at: Some(initialized_at.clone()),
            });
        }
        StatusTransition::InProgressWithPollUrl { poll_url } => {
            let status = operation.status.get_or_insert_with(OperationStatus::default);
            status.phase = Some(OperationState::InProgress);
            status.conditions = initial_conditions();
            if let Some(webhook) = status.webhooks.first_mut() {
                webhook.state = OperationState::InProgress;
                webhook.webhook_poll_url = poll_url.clone();
            }
        }
        StatusTransition::InProgressWithPollUrlAndTimestamp {
            poll_url,
            last_poll_timestamp,
            retries_count,
        } => {
            let status = operation.status.get_or_insert_with(OperationStatus::default);
            status.phase = Some(OperationState::InProgress);
            status.conditions = initial_conditions();
            if let Some(webhook) = status.webhooks.first_mut() {
                webhook.state = OperationState::InProgress;
                webhook.webhook_poll_url = poll_url.clone();
                webhook.last_poll_timestamp = last_poll_timestamp.clone();
                webhook.retries_count = *retries_count;
            }
        }
        StatusTransition::Success => {
            finalize(operation, OperationState::Success, None);
        }
        StatusTransition::Failed { message } => {
            finalize(operation, OperationState::Failed, Some(message.clone()));
        }
    }

    Ok(())
}

/// Both conditions False with no message, as set on every in-progress write
fn initial_conditions() -> Vec<OperationCondition> {
    vec![
        OperationCondition {
            r#type: ConditionType::Ready,
            status: ConditionStatus::False,
            message: None,
        },
        OperationCondition {
            r#type: ConditionType::Error,
            status: ConditionStatus::False,
            message: None,
        },
    ]
}

/// Terminal transition: phase, conditions, and webhook state move together
/// while poll metadata is carried forward untouched.
fn finalize(operation: &mut Operation, state: OperationState, error_message: Option<String>) {
    let status = operation.status.get_or_insert_with(OperationStatus::default);
    status.phase = Some(state);
    status.conditions = vec![
        OperationCondition {
            r#type: ConditionType::Ready,
            status: ConditionStatus::True,
            message: None,
        },
        OperationCondition {
            r#type: ConditionType::Error,
            status: if error_message.is_some() {
                ConditionStatus::True
            } else {
                ConditionStatus::False
            },
            message: error_message,
        },
    ];
    for webhook in &mut status.webhooks {
        webhook.state = state;
    }
}
