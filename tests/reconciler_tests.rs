//! # Operation Reconciler Tests
//!
//! Scenario tests for the reconciler state machine using in-memory doubles
//! for the four collaborator contracts. Each test drives one or more
//! reconcile passes against a fake cluster store and asserts on the
//! scheduling directive, the persisted status, and the Director reports.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use kube::api::ObjectMeta;
use kube_runtime::controller::Action;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use operations_controller::config::{ControllerConfig, TimeLayout, UnknownPollStatusPolicy};
use operations_controller::controller::reconciler::traits::{
    DirectorClient, KubernetesClient, StatusManager, WebhookClient,
};
use operations_controller::controller::reconciler::OperationReconciler;
use operations_controller::crd::status::{apply_transition, validate_webhook_ids};
use operations_controller::crd::{
    ConditionType, Operation, OperationSpec, OperationState, OperationStatus, OperationType,
    StatusTransition, WebhookStatus,
};
use operations_controller::director::{ApplicationSnapshot, OperationReport};
use operations_controller::errors::{DirectorError, ReconcileError, StatusError, WebhookError};
use operations_controller::webhook::{
    PollOutcome, PollRequest, Webhook, WebhookMode, WebhookRequest, WebhookResponse,
};

const WEBHOOK_ID: &str = "866e6b9c-f03b-442b-a6a5-4b90e21e503a";
const POLL_URL: &str = "https://test-domain.com/operation";
const RESOURCE_ID: &str = "6b9f2dcd-4c2e-4c48-9f63-e489a89b9c5e";
const REQUEST_OBJECT: &str = r#"{"tenantId":"tenant-a","headers":{},"context":{"id":"app"}}"#;

// ---------------------------------------------------------------------------
// Doubles

/// Shared in-memory stand-in for the API server
#[derive(Default)]
struct Cluster {
    operation: Mutex<Option<Operation>>,
    deleted: Mutex<bool>,
}

impl Cluster {
    fn store(&self, operation: &Operation) {
        *self.operation.lock().unwrap() = Some(operation.clone());
    }

    fn current(&self) -> Operation {
        self.operation.lock().unwrap().clone().expect("no operation in cluster")
    }

    fn was_deleted(&self) -> bool {
        *self.deleted.lock().unwrap()
    }
}

fn not_found_error() -> kube::Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: "operation not found".to_string(),
        reason: "NotFound".to_string(),
        code: 404,
    })
}

struct FakeKubernetesClient {
    cluster: Arc<Cluster>,
}

#[async_trait]
impl KubernetesClient for FakeKubernetesClient {
    async fn get_operation(&self, _namespace: &str, _name: &str) -> Result<Operation, kube::Error> {
        self.cluster
            .operation
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(not_found_error)
    }

    async fn delete_operation(&self, _operation: &Operation) -> Result<(), kube::Error> {
        *self.cluster.deleted.lock().unwrap() = true;
        *self.cluster.operation.lock().unwrap() = None;
        Ok(())
    }
}

struct FakeStatusManager {
    cluster: Arc<Cluster>,
    time_layout: TimeLayout,
    /// When set, terminal transitions fail with a conflict error
    fail_terminal_writes: bool,
}

impl FakeStatusManager {
    fn persist(
        &self,
        operation: &mut Operation,
        transition: StatusTransition,
    ) -> Result<(), StatusError> {
        apply_transition(operation, &transition)?;
        self.cluster.store(operation);
        Ok(())
    }
}

#[async_trait]
impl StatusManager for FakeStatusManager {
    async fn initialize(&self, operation: &mut Operation) -> Result<(), StatusError> {
        validate_webhook_ids(&operation.spec.webhook_ids)?;
        let observed = operation.status.as_ref().and_then(|s| s.observed_generation);
        if operation.metadata.generation.is_some() && observed == operation.metadata.generation {
            return Ok(());
        }
        let initialized_at = self.time_layout.format(Utc::now());
        self.persist(operation, StatusTransition::Initialize { initialized_at })
    }

    async fn in_progress_with_poll_url(
        &self,
        operation: &mut Operation,
        poll_url: &str,
    ) -> Result<(), StatusError> {
        self.persist(
            operation,
            StatusTransition::InProgressWithPollUrl {
                poll_url: poll_url.to_string(),
            },
        )
    }

    async fn in_progress_with_poll_url_and_timestamp(
        &self,
        operation: &mut Operation,
        poll_url: &str,
        last_poll_timestamp: &str,
        retries_count: i32,
    ) -> Result<(), StatusError> {
        self.persist(
            operation,
            StatusTransition::InProgressWithPollUrlAndTimestamp {
                poll_url: poll_url.to_string(),
                last_poll_timestamp: last_poll_timestamp.to_string(),
                retries_count,
            },
        )
    }

    async fn success(&self, operation: &mut Operation) -> Result<(), StatusError> {
        if self.fail_terminal_writes {
            return Err(StatusError::ConflictBudgetExhausted { attempts: 8 });
        }
        self.persist(operation, StatusTransition::Success)
    }

    async fn failed(&self, operation: &mut Operation, message: &str) -> Result<(), StatusError> {
        if self.fail_terminal_writes {
            return Err(StatusError::ConflictBudgetExhausted { attempts: 8 });
        }
        self.persist(
            operation,
            StatusTransition::Failed {
                message: message.to_string(),
            },
        )
    }
}

struct FakeDirectorClient {
    application: Mutex<VecDeque<Result<ApplicationSnapshot, DirectorError>>>,
    update_result: Mutex<Result<(), DirectorError>>,
    reports: Mutex<Vec<(Option<String>, OperationReport)>>,
}

impl FakeDirectorClient {
    fn new(application: Result<ApplicationSnapshot, DirectorError>) -> Self {
        Self {
            application: Mutex::new(VecDeque::from([application])),
            update_result: Mutex::new(Ok(())),
            reports: Mutex::new(Vec::new()),
        }
    }

    fn reports(&self) -> Vec<(Option<String>, OperationReport)> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl DirectorClient for FakeDirectorClient {
    async fn fetch_application(
        &self,
        _tenant: &str,
        _resource_id: &str,
    ) -> Result<ApplicationSnapshot, DirectorError> {
        let mut queue = self.application.lock().unwrap();
        match queue.len() {
            0 => panic!("no application snapshot queued"),
            1 => queue.front().unwrap().clone(),
            _ => queue.pop_front().unwrap(),
        }
    }

    async fn update_operation(
        &self,
        tenant: Option<&str>,
        report: &OperationReport,
    ) -> Result<(), DirectorError> {
        self.reports
            .lock()
            .unwrap()
            .push((tenant.map(str::to_string), report.clone()));
        self.update_result.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct FakeWebhookClient {
    do_results: Mutex<VecDeque<Result<WebhookResponse, WebhookError>>>,
    poll_results: Mutex<VecDeque<Result<PollOutcome, WebhookError>>>,
    do_calls: AtomicUsize,
    poll_calls: AtomicUsize,
}

#[async_trait]
impl WebhookClient for FakeWebhookClient {
    async fn do_request(
        &self,
        _request: &WebhookRequest,
        _deadline: chrono::DateTime<Utc>,
    ) -> Result<WebhookResponse, WebhookError> {
        self.do_calls.fetch_add(1, Ordering::SeqCst);
        self.do_results
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected webhook invocation")
    }

    async fn poll(
        &self,
        _request: &PollRequest,
        _deadline: chrono::DateTime<Utc>,
    ) -> Result<PollOutcome, WebhookError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.poll_results
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected webhook poll")
    }
}

// ---------------------------------------------------------------------------
// Harness

struct Harness {
    cluster: Arc<Cluster>,
    director: Arc<FakeDirectorClient>,
    webhook_client: Arc<FakeWebhookClient>,
    reconciler: OperationReconciler,
}

struct HarnessOptions {
    config: ControllerConfig,
    application: Result<ApplicationSnapshot, DirectorError>,
    fail_terminal_writes: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            config: test_config(),
            application: Ok(application_with(vec![async_webhook()])),
            fail_terminal_writes: false,
        }
    }
}

fn test_config() -> ControllerConfig {
    ControllerConfig {
        timeout_factor: 2,
        webhook_timeout: Duration::from_secs(60),
        requeue_interval: Duration::from_secs(30),
        ..ControllerConfig::default()
    }
}

fn harness(operation: Operation, options: HarnessOptions) -> Harness {
    let cluster = Arc::new(Cluster::default());
    cluster.store(&operation);

    let director = Arc::new(FakeDirectorClient::new(options.application));
    let webhook_client = Arc::new(FakeWebhookClient::default());
    let status_manager = Arc::new(FakeStatusManager {
        cluster: Arc::clone(&cluster),
        time_layout: options.config.time_layout,
        fail_terminal_writes: options.fail_terminal_writes,
    });
    let k8s_client = Arc::new(FakeKubernetesClient {
        cluster: Arc::clone(&cluster),
    });

    let reconciler = OperationReconciler::new(
        options.config,
        status_manager,
        k8s_client,
        Arc::clone(&director) as Arc<dyn DirectorClient>,
        Arc::clone(&webhook_client) as Arc<dyn WebhookClient>,
    );

    Harness {
        cluster,
        director,
        webhook_client,
        reconciler,
    }
}

impl Harness {
    async fn reconcile(&self) -> Result<Action, ReconcileError> {
        self.reconciler
            .reconcile_operation("default", "test-operation")
            .await
    }

    fn queue_do(&self, result: Result<WebhookResponse, WebhookError>) {
        self.webhook_client.do_results.lock().unwrap().push_back(result);
    }

    fn queue_poll(&self, result: Result<PollOutcome, WebhookError>) {
        self.webhook_client
            .poll_results
            .lock()
            .unwrap()
            .push_back(result);
    }

    fn status(&self) -> OperationStatus {
        self.cluster.current().status.expect("operation has no status")
    }

    fn error_message(&self) -> Option<String> {
        self.status()
            .condition(ConditionType::Error)
            .and_then(|c| c.message.clone())
    }
}

fn operation(operation_type: OperationType, webhook_ids: Vec<String>) -> Operation {
    Operation {
        metadata: ObjectMeta {
            name: Some("test-operation".to_string()),
            namespace: Some("default".to_string()),
            generation: Some(1),
            ..ObjectMeta::default()
        },
        spec: OperationSpec {
            operation_type,
            resource_type: "application".to_string(),
            resource_id: RESOURCE_ID.to_string(),
            correlation_id: "corr-id".to_string(),
            webhook_ids,
            request_object: REQUEST_OBJECT.to_string(),
        },
        status: None,
    }
}

/// Seed a status as if a previous pass had initialized it `age` ago
fn seeded_status(age: ChronoDuration, poll_url: &str, last_poll_timestamp: &str) -> OperationStatus {
    let layout = TimeLayout::Rfc3339Nano;
    OperationStatus {
        phase: Some(OperationState::InProgress),
        conditions: Vec::new(),
        webhooks: vec![WebhookStatus {
            webhook_id: WEBHOOK_ID.to_string(),
            state: OperationState::InProgress,
            retries_count: 0,
            webhook_poll_url: poll_url.to_string(),
            last_poll_timestamp: last_poll_timestamp.to_string(),
        }],
        observed_generation: Some(1),
        initialized_at: Some(layout.format(Utc::now() - age)),
    }
}

fn async_webhook() -> Webhook {
    Webhook {
        id: WEBHOOK_ID.to_string(),
        mode: WebhookMode::Async,
        timeout_secs: None,
        retry_interval_secs: Some(0),
        url_template: None,
        input_template: None,
        header_template: None,
        output_template: None,
        status_template: None,
        correlation_id_key: None,
    }
}

fn sync_webhook() -> Webhook {
    Webhook {
        mode: WebhookMode::Sync,
        ..async_webhook()
    }
}

fn application_with(webhooks: Vec<Webhook>) -> ApplicationSnapshot {
    ApplicationSnapshot {
        ready: false,
        error: None,
        webhooks,
    }
}

fn ready_application(error: Option<&str>) -> ApplicationSnapshot {
    ApplicationSnapshot {
        ready: true,
        error: error.map(str::to_string),
        webhooks: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Scenarios

#[tokio::test]
async fn test_first_async_success() {
    let h = harness(
        operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]),
        HarnessOptions::default(),
    );
    h.queue_do(Ok(WebhookResponse {
        location: Some(POLL_URL.to_string()),
    }));
    h.queue_poll(Ok(PollOutcome::Succeeded));

    // First pass executes the webhook and records the poll URL
    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::requeue(Duration::ZERO));
    assert_eq!(h.status().phase, Some(OperationState::InProgress));
    assert_eq!(h.status().webhooks[0].webhook_poll_url, POLL_URL);
    assert!(h.director.reports().is_empty());

    // Second pass polls and finalizes
    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());

    let status = h.status();
    assert_eq!(status.phase, Some(OperationState::Success));
    assert_eq!(status.webhooks[0].state, OperationState::Success);
    assert_eq!(status.webhooks[0].webhook_poll_url, POLL_URL);

    let reports = h.director.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0.as_deref(), Some("tenant-a"));
    assert!(reports[0].1.error.is_none());
}

#[tokio::test]
async fn test_polling_then_failure_counts_retries() {
    let h = harness(
        operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]),
        HarnessOptions::default(),
    );
    h.queue_do(Ok(WebhookResponse {
        location: Some(POLL_URL.to_string()),
    }));
    for _ in 0..4 {
        h.queue_poll(Ok(PollOutcome::InProgress));
    }
    h.queue_poll(Ok(PollOutcome::Failed));

    h.reconcile().await.unwrap();
    for _ in 0..4 {
        let action = h.reconcile().await.unwrap();
        assert_eq!(action, Action::requeue(Duration::ZERO));
    }
    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());

    let status = h.status();
    assert_eq!(status.phase, Some(OperationState::Failed));
    assert_eq!(status.webhooks[0].retries_count, 4);
    assert_eq!(status.webhooks[0].webhook_poll_url, POLL_URL);
    assert!(!status.webhooks[0].last_poll_timestamp.is_empty());
    assert_eq!(h.error_message().as_deref(), Some("failed webhook status"));
}

#[tokio::test]
async fn test_sync_webhook_success() {
    let h = harness(
        operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]),
        HarnessOptions {
            application: Ok(application_with(vec![sync_webhook()])),
            ..HarnessOptions::default()
        },
    );
    h.queue_do(Ok(WebhookResponse { location: None }));

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.status().phase, Some(OperationState::Success));
    assert_eq!(h.director.reports().len(), 1);
}

#[tokio::test]
async fn test_webhook_missing_fails_without_invocation() {
    let h = harness(
        operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]),
        HarnessOptions {
            application: Ok(application_with(Vec::new())),
            ..HarnessOptions::default()
        },
    );

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.status().phase, Some(OperationState::Failed));
    assert_eq!(
        h.error_message().as_deref(),
        Some(format!("missing webhook with ID: {WEBHOOK_ID}").as_str())
    );
    assert_eq!(h.webhook_client.do_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_already_ready_application_succeeds_immediately() {
    let h = harness(
        operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]),
        HarnessOptions {
            application: Ok(ready_application(None)),
            ..HarnessOptions::default()
        },
    );

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.status().phase, Some(OperationState::Success));
    assert_eq!(h.webhook_client.do_calls.load(Ordering::SeqCst), 0);

    let reports = h.director.reports();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].1.error.is_none());
}

#[tokio::test]
async fn test_already_ready_application_with_error_fails() {
    let h = harness(
        operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]),
        HarnessOptions {
            application: Ok(ready_application(Some("provisioning failed"))),
            ..HarnessOptions::default()
        },
    );

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.status().phase, Some(OperationState::Failed));
    assert_eq!(h.error_message().as_deref(), Some("provisioning failed"));
    assert_eq!(
        h.director.reports()[0].1.error.as_deref(),
        Some("provisioning failed")
    );
}

#[tokio::test]
async fn test_no_webhook_defined_succeeds() {
    let h = harness(
        operation(OperationType::Create, Vec::new()),
        HarnessOptions {
            application: Ok(application_with(Vec::new())),
            ..HarnessOptions::default()
        },
    );

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.status().phase, Some(OperationState::Success));
    assert_eq!(h.webhook_client.do_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_delete_with_gone_webhook_succeeds() {
    let h = harness(
        operation(OperationType::Delete, vec![WEBHOOK_ID.to_string()]),
        HarnessOptions::default(),
    );
    h.queue_do(Err(WebhookError::gone(404)));

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.status().phase, Some(OperationState::Success));
    assert!(h.director.reports()[0].1.error.is_none());
}

#[tokio::test]
async fn test_delete_with_gone_poll_succeeds() {
    let mut op = operation(OperationType::Delete, vec![WEBHOOK_ID.to_string()]);
    op.status = Some(seeded_status(ChronoDuration::seconds(1), POLL_URL, ""));
    let h = harness(op, HarnessOptions::default());
    h.queue_poll(Err(WebhookError::gone(404)));

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.status().phase, Some(OperationState::Success));
}

#[tokio::test]
async fn test_gone_webhook_on_create_is_retried() {
    let h = harness(
        operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]),
        HarnessOptions::default(),
    );
    h.queue_do(Err(WebhookError::gone(404)));

    // gone only converges delete operations; for create it is an ordinary
    // transient failure
    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::requeue(Duration::ZERO));
    assert_eq!(h.status().phase, Some(OperationState::InProgress));
}

#[tokio::test]
async fn test_fatal_webhook_error_fails_terminally() {
    let h = harness(
        operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]),
        HarnessOptions::default(),
    );
    h.queue_do(Err(WebhookError::fatal("missing webhook output template")));

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.status().phase, Some(OperationState::Failed));
    assert_eq!(
        h.error_message().as_deref(),
        Some("missing webhook output template")
    );
}

#[tokio::test]
async fn test_transient_webhook_error_requeues_after_retry_interval() {
    let mut webhook = async_webhook();
    webhook.retry_interval_secs = Some(7);
    let h = harness(
        operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]),
        HarnessOptions {
            application: Ok(application_with(vec![webhook])),
            ..HarnessOptions::default()
        },
    );
    h.queue_do(Err(WebhookError::transient("connection refused")));

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(7)));
    assert_eq!(h.status().phase, Some(OperationState::InProgress));
    assert!(h.director.reports().is_empty());
}

#[tokio::test]
async fn test_transient_error_past_webhook_deadline_fails_with_timeout() {
    let mut op = operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]);
    op.status = Some(seeded_status(ChronoDuration::seconds(30), "", ""));
    let h = harness(
        op,
        HarnessOptions {
            config: ControllerConfig {
                timeout_factor: 10,
                webhook_timeout: Duration::from_secs(10),
                ..ControllerConfig::default()
            },
            ..HarnessOptions::default()
        },
    );
    h.queue_do(Err(WebhookError::transient("connection refused")));

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.status().phase, Some(OperationState::Failed));
    let message = h.error_message().unwrap();
    assert!(message.starts_with("webhook timeout reached"));
    assert!(message.contains("connection refused"));
}

#[tokio::test]
async fn test_reconciliation_timeout_fails_regardless_of_webhook_phase() {
    // factor 2 × 60s budget, initialized 150s ago
    let mut op = operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]);
    op.status = Some(seeded_status(ChronoDuration::seconds(150), POLL_URL, ""));
    let h = harness(op, HarnessOptions::default());

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.status().phase, Some(OperationState::Failed));
    assert_eq!(
        h.error_message().as_deref(),
        Some("reconciliation timeout reached")
    );
    assert_eq!(h.webhook_client.poll_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_poll_in_progress_past_webhook_deadline_fails_with_timeout() {
    let mut op = operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]);
    op.status = Some(seeded_status(ChronoDuration::seconds(30), POLL_URL, ""));
    let h = harness(
        op,
        HarnessOptions {
            config: ControllerConfig {
                timeout_factor: 10,
                webhook_timeout: Duration::from_secs(10),
                ..ControllerConfig::default()
            },
            ..HarnessOptions::default()
        },
    );
    h.queue_poll(Ok(PollOutcome::InProgress));

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.status().phase, Some(OperationState::Failed));
    assert_eq!(
        h.error_message().as_deref(),
        Some("webhook timeout reached")
    );
}

#[tokio::test]
async fn test_poll_interval_not_elapsed_requeues_remaining() {
    let mut webhook = async_webhook();
    webhook.retry_interval_secs = Some(120);
    let layout = TimeLayout::Rfc3339Nano;
    let mut op = operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]);
    op.status = Some(seeded_status(
        ChronoDuration::seconds(10),
        POLL_URL,
        &layout.format(Utc::now() - ChronoDuration::seconds(5)),
    ));
    let h = harness(
        op,
        HarnessOptions {
            application: Ok(application_with(vec![webhook])),
            ..HarnessOptions::default()
        },
    );

    let action = h.reconcile().await.unwrap();
    // roughly 115s of the 120s interval remain
    assert_ne!(action, Action::await_change());
    assert_ne!(action, Action::requeue(Duration::ZERO));
    assert_eq!(h.webhook_client.poll_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_malformed_last_poll_timestamp_fails() {
    let mut op = operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]);
    op.status = Some(seeded_status(
        ChronoDuration::seconds(10),
        POLL_URL,
        "not-a-timestamp",
    ));
    let h = harness(op, HarnessOptions::default());

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.status().phase, Some(OperationState::Failed));
    assert!(h
        .error_message()
        .unwrap()
        .contains("unable to parse last poll timestamp"));
}

#[tokio::test]
async fn test_unknown_poll_status_ignore_policy_stops_polling() {
    let mut op = operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]);
    op.status = Some(seeded_status(ChronoDuration::seconds(1), POLL_URL, ""));
    let h = harness(op, HarnessOptions::default());
    h.queue_poll(Ok(PollOutcome::Unknown("paused".to_string())));

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    // the operation is left in progress; only logs make this visible
    assert_eq!(h.status().phase, Some(OperationState::InProgress));
    assert!(h.director.reports().is_empty());
}

#[tokio::test]
async fn test_unknown_poll_status_fail_policy_terminates() {
    let mut op = operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]);
    op.status = Some(seeded_status(ChronoDuration::seconds(1), POLL_URL, ""));
    let h = harness(
        op,
        HarnessOptions {
            config: ControllerConfig {
                unknown_poll_status_policy: UnknownPollStatusPolicy::Fail,
                ..test_config()
            },
            ..HarnessOptions::default()
        },
    );
    h.queue_poll(Ok(PollOutcome::Unknown("paused".to_string())));

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.status().phase, Some(OperationState::Failed));
    assert_eq!(
        h.error_message().as_deref(),
        Some("unexpected webhook poll status: paused")
    );
}

#[tokio::test]
async fn test_validation_error_fails_without_in_progress() {
    let h = harness(
        operation(
            OperationType::Delete,
            vec!["first".to_string(), "second".to_string()],
        ),
        HarnessOptions::default(),
    );

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());

    let status = h.status();
    assert_eq!(status.phase, Some(OperationState::Failed));
    assert!(h.error_message().unwrap().contains("found: 2"));

    let reports = h.director.reports();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].1.error.as_deref().unwrap().contains("found: 2"));
}

#[tokio::test]
async fn test_malformed_request_object_fails() {
    let mut op = operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]);
    op.spec.request_object = "{not-json".to_string();
    let h = harness(op, HarnessOptions::default());

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.status().phase, Some(OperationState::Failed));
    assert!(h
        .error_message()
        .unwrap()
        .contains("unable to parse request object"));
}

#[tokio::test]
async fn test_operation_not_found_is_a_no_op() {
    let h = harness(
        operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]),
        HarnessOptions::default(),
    );
    *h.cluster.operation.lock().unwrap() = None;

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    assert!(h.director.reports().is_empty());
}

// ---------------------------------------------------------------------------
// Application fetch error policy

#[tokio::test]
async fn test_fetch_not_found_delete_converges_to_success() {
    let h = harness(
        operation(OperationType::Delete, vec![WEBHOOK_ID.to_string()]),
        HarnessOptions {
            application: Err(DirectorError::not_found("application not found")),
            ..HarnessOptions::default()
        },
    );

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.status().phase, Some(OperationState::Success));
    assert!(h.director.reports()[0].1.error.is_none());
}

#[tokio::test]
async fn test_fetch_not_found_on_in_progress_update_fails() {
    let mut op = operation(OperationType::Update, vec![WEBHOOK_ID.to_string()]);
    op.status = Some(seeded_status(ChronoDuration::seconds(1), "", ""));
    let h = harness(
        op,
        HarnessOptions {
            application: Err(DirectorError::not_found("application not found")),
            ..HarnessOptions::default()
        },
    );

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.status().phase, Some(OperationState::Failed));
    assert_eq!(
        h.error_message().as_deref(),
        Some(format!("resource with id {RESOURCE_ID} not found").as_str())
    );
}

#[tokio::test]
async fn test_fetch_not_found_on_fresh_create_is_retried() {
    // the application may not exist in the director yet; backoff retries
    let h = harness(
        operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]),
        HarnessOptions {
            application: Err(DirectorError::not_found("application not found")),
            ..HarnessOptions::default()
        },
    );

    let result = h.reconcile().await;
    assert!(matches!(result, Err(ReconcileError::Director(_))));
    assert_eq!(h.status().phase, Some(OperationState::InProgress));
    assert!(h.director.reports().is_empty());
}

#[tokio::test]
async fn test_fetch_not_found_on_terminal_phase_is_retried() {
    let mut op = operation(OperationType::Update, vec![WEBHOOK_ID.to_string()]);
    let mut status = seeded_status(ChronoDuration::seconds(1), "", "");
    status.phase = Some(OperationState::Success);
    op.status = Some(status);
    let h = harness(
        op,
        HarnessOptions {
            application: Err(DirectorError::not_found("application not found")),
            ..HarnessOptions::default()
        },
    );

    let result = h.reconcile().await;
    assert!(matches!(result, Err(ReconcileError::Director(_))));
}

#[tokio::test]
async fn test_fetch_error_past_reconciliation_deadline_deletes_operation() {
    let mut op = operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]);
    op.status = Some(seeded_status(ChronoDuration::seconds(150), "", ""));
    let h = harness(
        op,
        HarnessOptions {
            application: Err(DirectorError::transient("director unreachable")),
            ..HarnessOptions::default()
        },
    );

    let action = h.reconcile().await.unwrap();
    assert_eq!(action, Action::await_change());
    assert!(h.cluster.was_deleted());
    assert!(h.director.reports().is_empty());
}

#[tokio::test]
async fn test_fetch_error_within_deadline_is_retried() {
    let h = harness(
        operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]),
        HarnessOptions {
            application: Err(DirectorError::transient("director unreachable")),
            ..HarnessOptions::default()
        },
    );

    let result = h.reconcile().await;
    assert!(matches!(result, Err(ReconcileError::Director(_))));
    assert!(!h.cluster.was_deleted());
}

// ---------------------------------------------------------------------------
// Propagation precedence

#[tokio::test]
async fn test_failed_director_report_propagates_as_error() {
    let h = harness(
        operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]),
        HarnessOptions {
            application: Ok(ready_application(None)),
            ..HarnessOptions::default()
        },
    );
    *h.director.update_result.lock().unwrap() =
        Err(DirectorError::transient("director unreachable"));

    let result = h.reconcile().await;
    assert!(matches!(result, Err(ReconcileError::Director(_))));
    // the status write had already landed before the report failed
    assert_eq!(h.status().phase, Some(OperationState::Success));
}

#[tokio::test]
async fn test_status_write_failure_takes_precedence_over_report() {
    let h = harness(
        operation(OperationType::Create, vec![WEBHOOK_ID.to_string()]),
        HarnessOptions {
            application: Ok(ready_application(None)),
            fail_terminal_writes: true,
            ..HarnessOptions::default()
        },
    );

    let result = h.reconcile().await;
    assert!(matches!(result, Err(ReconcileError::Status(_))));
    assert!(h.director.reports().is_empty());
}
