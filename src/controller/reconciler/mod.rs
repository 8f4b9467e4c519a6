//! # Operation Reconciler
//!
//! Drives one Operation through webhook invocation, polling, timeout
//! enforcement, and terminal status reporting.
//!
//! Each reconcile pass loads the resource, initializes its status if the
//! generation changed, computes the reconciliation and per-call webhook
//! deadlines, and resolves to exactly one scheduling directive: await change,
//! requeue immediately, requeue after a delay, or an error handed to the
//! scheduling layer for backoff. At most one status transition and at most
//! one Director report are emitted per pass.

use chrono::Utc;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

pub mod context;
pub mod traits;

pub use context::{next_poll_duration, retry_interval, ReconcileContext};
pub use traits::{DirectorClient, KubernetesClient, StatusManager, WebhookClient};

use crate::config::{ControllerConfig, UnknownPollStatusPolicy};
use crate::crd::{Operation, OperationState, OperationType, RequestObject};
use crate::director::OperationReport;
use crate::errors::{
    DirectorError, ReconcileError, StatusError, WebhookError, ERR_FAILED_WEBHOOK_STATUS,
    ERR_RECONCILIATION_TIMEOUT, ERR_WEBHOOK_TIMEOUT,
};
use crate::k8s::is_not_found;
use crate::observability::metrics;
use crate::webhook::{PollOutcome, PollRequest, Webhook, WebhookMode, WebhookRequest};

/// Orchestrates Operation reconciliation over the four collaborator contracts
pub struct OperationReconciler {
    config: ControllerConfig,
    status_manager: Arc<dyn StatusManager>,
    k8s_client: Arc<dyn KubernetesClient>,
    director_client: Arc<dyn DirectorClient>,
    webhook_client: Arc<dyn WebhookClient>,
    /// Consecutive reconcile error counts per resource key, consumed by the
    /// error policy's backoff
    error_counts: Mutex<HashMap<String, u32>>,
}

impl fmt::Debug for OperationReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationReconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// kube-runtime entry point: reconcile one Operation key
pub async fn reconcile(
    operation: Arc<Operation>,
    reconciler: Arc<OperationReconciler>,
) -> Result<Action, ReconcileError> {
    let namespace = operation.namespace().unwrap_or_else(|| "default".to_string());
    let name = operation.name_any();

    let result = reconciler.reconcile_operation(&namespace, &name).await;
    if result.is_ok() {
        reconciler.clear_errors(&format!("{namespace}/{name}"));
    }
    result
}

impl OperationReconciler {
    pub fn new(
        config: ControllerConfig,
        status_manager: Arc<dyn StatusManager>,
        k8s_client: Arc<dyn KubernetesClient>,
        director_client: Arc<dyn DirectorClient>,
        webhook_client: Arc<dyn WebhookClient>,
    ) -> Self {
        Self {
            config,
            status_manager,
            k8s_client,
            director_client,
            webhook_client,
            error_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Run one reconcile pass for the Operation identified by key
    pub async fn reconcile_operation(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Action, ReconcileError> {
        let span = tracing::info_span!(
            "reconcile",
            operation.namespace = namespace,
            operation.name = name
        );
        self.run_pass(namespace, name).instrument(span).await
    }

    async fn run_pass(&self, namespace: &str, name: &str) -> Result<Action, ReconcileError> {
        metrics::increment_reconciliations();

        let mut operation = match self.k8s_client.get_operation(namespace, name).await {
            Ok(operation) => operation,
            Err(err) if is_not_found(&err) => {
                info!("operation no longer exists, nothing to reconcile");
                return Ok(Action::await_change());
            }
            Err(err) => {
                error!(error = %err, "unable to retrieve operation from API server");
                return Err(err.into());
            }
        };

        // Whether a previous pass had already started working on this
        // generation; Initialize below sets InProgress unconditionally, so
        // the distinction must be captured before it runs
        let already_in_progress = operation
            .status
            .as_ref()
            .and_then(|s| s.observed_generation)
            .is_some_and(|observed| Some(observed) == operation.metadata.generation)
            && operation.phase() == Some(OperationState::InProgress);

        if let Err(err) = self.status_manager.initialize(&mut operation).await {
            return self.handle_initialization_error(&mut operation, err).await;
        }

        let request_object = match operation.request_object() {
            Ok(request_object) => request_object,
            Err(err) => {
                error!(error = %err, "unable to parse request object");
                let message = format!("unable to parse request object: {err}");
                return self.finalize_failed(&mut operation, None, false, message).await;
            }
        };
        let tenant = request_object.tenant_id.clone();

        let ctx = match ReconcileContext::new(&operation, &self.config) {
            Ok(ctx) => ctx,
            Err(err) => {
                error!(error = %err, "unable to compute reconciliation deadlines");
                return self
                    .finalize_failed(&mut operation, Some(&tenant), false, err.to_string())
                    .await;
            }
        };

        let application = match self
            .director_client
            .fetch_application(&tenant, &operation.spec.resource_id)
            .await
        {
            Ok(application) => application,
            Err(err) => {
                return self
                    .handle_fetch_application_error(
                        &mut operation,
                        &tenant,
                        &ctx,
                        already_in_progress,
                        err,
                    )
                    .await;
            }
        };

        if application.ready {
            let near_timeout = ctx.is_close_to_timeout(None, Utc::now());
            return match application.error.filter(|message| !message.is_empty()) {
                Some(message) => {
                    info!("application is ready but carries an error, finalizing as failed");
                    self.finalize_failed(&mut operation, Some(&tenant), near_timeout, message)
                        .await
                }
                None => {
                    info!("application is already ready, finalizing as successful");
                    self.finalize_success(&mut operation, Some(&tenant), near_timeout)
                        .await
                }
            };
        }

        let Some(webhook_id) = operation.spec.webhook_ids.first().cloned() else {
            info!("no webhook defined, operation executed successfully");
            let near_timeout = ctx.is_close_to_timeout(None, Utc::now());
            return self
                .finalize_success(&mut operation, Some(&tenant), near_timeout)
                .await;
        };

        let Some(webhook) = application
            .webhooks
            .iter()
            .find(|webhook| webhook.id == webhook_id)
            .cloned()
        else {
            error!(webhook_id = %webhook_id, "unable to retrieve webhook");
            let message = format!("missing webhook with ID: {webhook_id}");
            let near_timeout = ctx.is_close_to_timeout(None, Utc::now());
            return self
                .finalize_failed(&mut operation, Some(&tenant), near_timeout, message)
                .await;
        };

        let now = Utc::now();
        if ctx.reconciliation_deadline_passed(now) {
            info!("reconciliation timeout reached");
            let near_timeout = ctx.is_close_to_timeout(Some(&webhook), now);
            return self
                .finalize_failed(
                    &mut operation,
                    Some(&tenant),
                    near_timeout,
                    ERR_RECONCILIATION_TIMEOUT.to_string(),
                )
                .await;
        }

        if operation.has_poll_url() {
            self.poll_webhook(&mut operation, &tenant, &request_object, &ctx, &webhook)
                .await
        } else {
            self.execute_webhook(&mut operation, &tenant, &request_object, &ctx, &webhook)
                .await
        }
    }

    /// Step 8: no poll URL yet, invoke the webhook
    async fn execute_webhook(
        &self,
        operation: &mut Operation,
        tenant: &str,
        request_object: &RequestObject,
        ctx: &ReconcileContext,
        webhook: &Webhook,
    ) -> Result<Action, ReconcileError> {
        info!("webhook poll URL not found, executing webhook");
        let request = WebhookRequest::new(
            webhook.clone(),
            request_object.clone(),
            operation.spec.correlation_id.clone(),
        );
        let deadline = ctx.webhook_deadline(Some(webhook));

        match self.webhook_client.do_request(&request, deadline).await {
            Ok(response) => match webhook.mode {
                WebhookMode::Sync => {
                    info!("synchronous webhook executed successfully");
                    let near_timeout = ctx.is_close_to_timeout(Some(webhook), Utc::now());
                    self.finalize_success(operation, Some(tenant), near_timeout)
                        .await
                }
                WebhookMode::Async => {
                    let poll_url = response.location.unwrap_or_default();
                    self.status_manager
                        .in_progress_with_poll_url(operation, &poll_url)
                        .await?;
                    info!(poll_url = %poll_url, "updated operation status with poll URL");
                    Ok(Action::requeue(Duration::ZERO))
                }
            },
            Err(err)
                if err.is_gone() && operation.spec.operation_type == OperationType::Delete =>
            {
                info!(
                    gone_status_code = ?err.gone_status_code,
                    "webhook reports target already gone, finalizing delete as successful"
                );
                let near_timeout = ctx.is_close_to_timeout(Some(webhook), Utc::now());
                self.finalize_success(operation, Some(tenant), near_timeout)
                    .await
            }
            Err(err) => {
                error!(error = %err, "unable to execute webhook request");
                self.requeue_unless_timeout_or_fatal(operation, tenant, ctx, webhook, err)
                    .await
            }
        }
    }

    /// Step 9: poll URL present, poll the webhook
    async fn poll_webhook(
        &self,
        operation: &mut Operation,
        tenant: &str,
        request_object: &RequestObject,
        ctx: &ReconcileContext,
        webhook: &Webhook,
    ) -> Result<Action, ReconcileError> {
        info!("webhook poll URL found, calculating next poll time");
        let now = Utc::now();
        let remaining = match next_poll_duration(operation, webhook, &self.config, now) {
            Ok(remaining) => remaining,
            Err(err) => {
                error!(error = %err, "unable to parse last poll timestamp");
                let message = format!("unable to parse last poll timestamp: {err}");
                let near_timeout = ctx.is_close_to_timeout(Some(webhook), now);
                return self
                    .finalize_failed(operation, Some(tenant), near_timeout, message)
                    .await;
            }
        };
        if remaining > Duration::ZERO {
            debug!(
                requeue_after_secs = remaining.as_secs(),
                "poll interval has not elapsed, requeueing"
            );
            metrics::increment_requeues_total("poll-interval");
            return Ok(Action::requeue(remaining));
        }

        let poll_url = operation.poll_url().unwrap_or_default().to_string();
        let request = PollRequest::new(
            webhook.clone(),
            request_object.clone(),
            operation.spec.correlation_id.clone(),
            poll_url.clone(),
        );
        let deadline = ctx.webhook_deadline(Some(webhook));

        let outcome = match self.webhook_client.poll(&request, deadline).await {
            Ok(outcome) => outcome,
            Err(err)
                if err.is_gone() && operation.spec.operation_type == OperationType::Delete =>
            {
                info!(
                    gone_status_code = ?err.gone_status_code,
                    "webhook poll reports target already gone, finalizing delete as successful"
                );
                let near_timeout = ctx.is_close_to_timeout(Some(webhook), Utc::now());
                return self
                    .finalize_success(operation, Some(tenant), near_timeout)
                    .await;
            }
            Err(err) => {
                error!(error = %err, "unable to execute webhook poll request");
                return self
                    .requeue_unless_timeout_or_fatal(operation, tenant, ctx, webhook, err)
                    .await;
            }
        };

        info!(outcome = ?outcome, "webhook poll executed successfully");
        match outcome {
            PollOutcome::Succeeded => {
                let near_timeout = ctx.is_close_to_timeout(Some(webhook), Utc::now());
                self.finalize_success(operation, Some(tenant), near_timeout)
                    .await
            }
            PollOutcome::Failed => {
                let near_timeout = ctx.is_close_to_timeout(Some(webhook), Utc::now());
                self.finalize_failed(
                    operation,
                    Some(tenant),
                    near_timeout,
                    ERR_FAILED_WEBHOOK_STATUS.to_string(),
                )
                .await
            }
            PollOutcome::InProgress => {
                let now = Utc::now();
                if ctx.webhook_deadline_passed(Some(webhook), now) {
                    info!("webhook timeout reached while still in progress");
                    let near_timeout = ctx.is_close_to_timeout(Some(webhook), now);
                    return self
                        .finalize_failed(
                            operation,
                            Some(tenant),
                            near_timeout,
                            ERR_WEBHOOK_TIMEOUT.to_string(),
                        )
                        .await;
                }

                let last_poll_timestamp = self.config.time_layout.format(now);
                let retries_count = operation.retries_count() + 1;
                self.status_manager
                    .in_progress_with_poll_url_and_timestamp(
                        operation,
                        &poll_url,
                        &last_poll_timestamp,
                        retries_count,
                    )
                    .await?;
                info!(
                    last_poll_timestamp = %last_poll_timestamp,
                    retries_count,
                    "updated operation poll progress"
                );
                let requeue_after = retry_interval(webhook, &self.config);
                metrics::increment_requeues_total("poll-in-progress");
                Ok(Action::requeue(requeue_after))
            }
            PollOutcome::Unknown(status) => match self.config.unknown_poll_status_policy {
                UnknownPollStatusPolicy::Ignore => {
                    error!(
                        status = %status,
                        "unknown webhook poll status, polling stopped; operation remains in progress"
                    );
                    Ok(Action::await_change())
                }
                UnknownPollStatusPolicy::Fail => {
                    let near_timeout = ctx.is_close_to_timeout(Some(webhook), Utc::now());
                    self.finalize_failed(
                        operation,
                        Some(tenant),
                        near_timeout,
                        format!("unexpected webhook poll status: {status}"),
                    )
                    .await
                }
            },
        }
    }

    /// A transient webhook failure requeues while budgets remain; a fatal
    /// classification or an elapsed webhook deadline terminates the Operation
    async fn requeue_unless_timeout_or_fatal(
        &self,
        operation: &mut Operation,
        tenant: &str,
        ctx: &ReconcileContext,
        webhook: &Webhook,
        err: WebhookError,
    ) -> Result<Action, ReconcileError> {
        let now = Utc::now();
        let near_timeout = ctx.is_close_to_timeout(Some(webhook), now);

        if err.is_fatal() {
            return self
                .finalize_failed(operation, Some(tenant), near_timeout, err.to_string())
                .await;
        }
        if ctx.webhook_deadline_passed(Some(webhook), now) {
            let message = format!("{ERR_WEBHOOK_TIMEOUT}: {err}");
            return self
                .finalize_failed(operation, Some(tenant), near_timeout, message)
                .await;
        }

        let requeue_after = retry_interval(webhook, &self.config);
        info!(
            requeue_after_secs = requeue_after.as_secs(),
            "transient webhook failure, requeueing"
        );
        metrics::increment_requeues_total("webhook-transient");
        Ok(Action::requeue(requeue_after))
    }

    /// A validation error is terminal; everything else is handed to the
    /// scheduling layer for backoff
    async fn handle_initialization_error(
        &self,
        operation: &mut Operation,
        err: StatusError,
    ) -> Result<Action, ReconcileError> {
        error!(error = %err, "failed to initialize operation status");
        match err {
            StatusError::Validation(validation) => {
                self.finalize_failed(operation, None, false, validation.to_string())
                    .await
            }
            other => Err(other.into()),
        }
    }

    /// Step-5 error policy. `already_in_progress` distinguishes an Operation
    /// a previous pass had started from one whose target may simply not
    /// exist yet.
    async fn handle_fetch_application_error(
        &self,
        operation: &mut Operation,
        tenant: &str,
        ctx: &ReconcileContext,
        already_in_progress: bool,
        err: DirectorError,
    ) -> Result<Action, ReconcileError> {
        error!(
            error = %err,
            resource_id = %operation.spec.resource_id,
            "unable to fetch application"
        );

        if err.is_not_found() {
            let now = Utc::now();
            if operation.spec.operation_type == OperationType::Delete {
                info!("target already absent for delete operation, finalizing as successful");
                let near_timeout = ctx.is_close_to_timeout(None, now);
                return self
                    .finalize_success(operation, Some(tenant), near_timeout)
                    .await;
            }
            if already_in_progress {
                let message = format!(
                    "resource with id {} not found",
                    operation.spec.resource_id
                );
                let near_timeout = ctx.is_close_to_timeout(None, now);
                return self
                    .finalize_failed(operation, Some(tenant), near_timeout, message)
                    .await;
            }
            // the resource may simply not exist yet (async create); backoff retries
            return Err(err.into());
        }

        if ctx.reconciliation_deadline_passed(Utc::now()) {
            warn!("reconciliation deadline passed while the director is unreachable, deleting abandoned operation");
            self.k8s_client
                .delete_operation(operation)
                .await
                .map_err(ReconcileError::Kube)?;
            info!("successfully deleted operation");
            return Ok(Action::await_change());
        }

        Err(err.into())
    }

    /// Terminal success: status write first, then the Director report
    async fn finalize_success(
        &self,
        operation: &mut Operation,
        tenant: Option<&str>,
        near_timeout: bool,
    ) -> Result<Action, ReconcileError> {
        if near_timeout {
            metrics::increment_operations_near_timeout(&operation.spec.operation_type.to_string());
        }

        self.status_manager.success(operation).await?;
        self.director_client
            .update_operation(tenant, &self.report(operation, None))
            .await?;
        info!("successfully updated operation status to succeeded");

        self.observe_duration(operation);
        Ok(Action::await_change())
    }

    /// Terminal failure: status write first, then the Director report with
    /// the failure message
    async fn finalize_failed(
        &self,
        operation: &mut Operation,
        tenant: Option<&str>,
        near_timeout: bool,
        message: String,
    ) -> Result<Action, ReconcileError> {
        let operation_type = operation.spec.operation_type.to_string();
        if near_timeout {
            metrics::increment_operations_near_timeout(&operation_type);
        }
        metrics::increment_failed_operations(&operation_type);
        error!(
            error = %message,
            correlation_id = %operation.spec.correlation_id,
            request_object = %trim_request_object(&operation.spec.request_object),
            "operation failed"
        );

        self.status_manager.failed(operation, &message).await?;
        self.director_client
            .update_operation(tenant, &self.report(operation, Some(message)))
            .await?;
        info!("successfully updated operation status to failed");

        self.observe_duration(operation);
        Ok(Action::await_change())
    }

    fn report(&self, operation: &Operation, error: Option<String>) -> OperationReport {
        OperationReport {
            operation_type: operation.spec.operation_type,
            resource_type: operation.spec.resource_type.clone(),
            resource_id: operation.spec.resource_id.clone(),
            error,
        }
    }

    fn observe_duration(&self, operation: &Operation) {
        let initialized_at = operation
            .status
            .as_ref()
            .and_then(|s| s.initialized_at.as_deref())
            .and_then(|text| self.config.time_layout.parse_timestamp(text).ok());
        if let Some(initialized_at) = initialized_at {
            let duration = (Utc::now() - initialized_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            metrics::observe_operation_duration(
                &operation.spec.operation_type.to_string(),
                duration.as_secs_f64(),
            );
        }
    }

    /// Record a reconcile error for the resource and return its new count
    pub fn record_error(&self, resource_key: &str) -> u32 {
        match self.error_counts.lock() {
            Ok(mut counts) => {
                let count = counts.entry(resource_key.to_string()).or_insert(0);
                *count += 1;
                *count
            }
            Err(err) => {
                warn!(error = %err, "failed to lock error counts, using default backoff");
                0
            }
        }
    }

    /// Reset the error count after a successful pass
    pub fn clear_errors(&self, resource_key: &str) {
        if let Ok(mut counts) = self.error_counts.lock() {
            counts.remove(resource_key);
        }
    }
}

/// Strip the caller-supplied headers payload before recording the request
/// object in logs and metrics
pub fn trim_request_object(request_object: &str) -> String {
    match request_object.find(",\"headers\"") {
        Some(index) => {
            let mut trimmed = request_object[..index].to_string();
            trimmed.push('}');
            trimmed
        }
        None => request_object.to_string(),
    }
}
