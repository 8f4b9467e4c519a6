//! # Error Taxonomy
//!
//! Closed error classification shared by the reconciler and its
//! collaborators. Every failure a collaborator can return carries one of the
//! kinds below, so the reconciler's branching is exhaustive matching instead
//! of ad hoc error inspection.

use crate::crd::OperationValidationError;

/// Classification of a collaborator failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Target resource or Operation resource absent
    NotFound,
    /// Any other failure while budgets remain; retried via requeue
    Transient,
    /// Retrying cannot help (bad template, unparsable output)
    Fatal,
    /// The external target is confirmed already absent
    Gone,
    /// A per-call or reconciliation deadline has elapsed
    Timeout,
    /// Malformed spec or malformed persisted timestamp
    Validation,
}

/// Terminal failure message when the overall reconciliation budget elapses
pub const ERR_RECONCILIATION_TIMEOUT: &str = "reconciliation timeout reached";

/// Terminal failure message when the per-call webhook budget elapses
pub const ERR_WEBHOOK_TIMEOUT: &str = "webhook timeout reached";

/// Terminal failure message when a poll reports the webhook failed
pub const ERR_FAILED_WEBHOOK_STATUS: &str = "failed webhook status";

/// Webhook execution failure with its classification
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct WebhookError {
    pub kind: ErrorKind,
    pub message: String,
    /// HTTP status that matched the descriptor's gone status code, if any
    pub gone_status_code: Option<u16>,
}

impl WebhookError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
            gone_status_code: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Fatal,
            message: message.into(),
            gone_status_code: None,
        }
    }

    pub fn gone(status_code: u16) -> Self {
        Self {
            kind: ErrorKind::Gone,
            message: format!("webhook responded with gone status {status_code}"),
            gone_status_code: Some(status_code),
        }
    }

    pub fn is_gone(&self) -> bool {
        self.kind == ErrorKind::Gone
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::Fatal
    }
}

/// Director call failure with its classification
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct DirectorError {
    pub kind: ErrorKind,
    pub message: String,
}

impl DirectorError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

/// Status persistence failure
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    /// Spec validation failed during initialization
    #[error(transparent)]
    Validation(#[from] OperationValidationError),
    /// Optimistic-concurrency retry budget exhausted
    #[error("status update conflict not resolved after {attempts} attempts")]
    ConflictBudgetExhausted { attempts: u32 },
    /// Status serialization failed
    #[error("unable to serialize operation status: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Any other API server failure
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

/// Error surfaced to the scheduling layer; triggers its backoff
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("unable to retrieve operation: {0}")]
    Kube(#[from] kube::Error),
    #[error("status update failed: {0}")]
    Status(#[from] StatusError),
    #[error("director request failed: {0}")]
    Director(#[from] DirectorError),
    #[error("webhook request failed: {0}")]
    Webhook(#[from] WebhookError),
}
