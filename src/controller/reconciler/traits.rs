//! # Collaborator Contracts
//!
//! Narrow interfaces the reconciler depends on. Each has one production
//! implementation and one test double; the reconciler never touches a
//! concrete transport.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::crd::Operation;
use crate::director::{ApplicationSnapshot, OperationReport};
use crate::errors::{DirectorError, StatusError, WebhookError};
use crate::webhook::{PollOutcome, PollRequest, WebhookRequest, WebhookResponse};

/// Fetches and deletes the Operation custom resource
#[async_trait]
pub trait KubernetesClient: Send + Sync {
    async fn get_operation(&self, namespace: &str, name: &str) -> Result<Operation, kube::Error>;
    async fn delete_operation(&self, operation: &Operation) -> Result<(), kube::Error>;
}

/// Applies status transitions and persists them with conflict retry
///
/// On success the passed Operation reflects the persisted object.
#[async_trait]
pub trait StatusManager: Send + Sync {
    /// Validate the spec and reset the status for the current generation;
    /// no-op when the observed generation already matches
    async fn initialize(&self, operation: &mut Operation) -> Result<(), StatusError>;
    /// Record the poll URL returned by an async webhook invocation
    async fn in_progress_with_poll_url(
        &self,
        operation: &mut Operation,
        poll_url: &str,
    ) -> Result<(), StatusError>;
    /// Record poll progress: URL, last poll timestamp, and retry count
    async fn in_progress_with_poll_url_and_timestamp(
        &self,
        operation: &mut Operation,
        poll_url: &str,
        last_poll_timestamp: &str,
        retries_count: i32,
    ) -> Result<(), StatusError>;
    /// Terminal success
    async fn success(&self, operation: &mut Operation) -> Result<(), StatusError>;
    /// Terminal failure with a user-visible message
    async fn failed(&self, operation: &mut Operation, message: &str) -> Result<(), StatusError>;
}

/// Fetches the external resource state and pushes outcomes back
#[async_trait]
pub trait DirectorClient: Send + Sync {
    async fn fetch_application(
        &self,
        tenant: &str,
        resource_id: &str,
    ) -> Result<ApplicationSnapshot, DirectorError>;
    /// Report an interim or terminal outcome; `tenant` is absent on failure
    /// paths reached before the request object could be decoded
    async fn update_operation(
        &self,
        tenant: Option<&str>,
        report: &OperationReport,
    ) -> Result<(), DirectorError>;
}

/// Executes a single webhook call or poll, bounded by an explicit deadline
#[async_trait]
pub trait WebhookClient: Send + Sync {
    async fn do_request(
        &self,
        request: &WebhookRequest,
        deadline: DateTime<Utc>,
    ) -> Result<WebhookResponse, WebhookError>;
    async fn poll(
        &self,
        request: &PollRequest,
        deadline: DateTime<Utc>,
    ) -> Result<PollOutcome, WebhookError>;
}
