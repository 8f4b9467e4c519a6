//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, Kubernetes client setup, and reconciler wiring.

use anyhow::{Context, Result};
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::{ControllerConfig, ServerConfig};
use crate::controller::reconciler::OperationReconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::Operation;
use crate::director::GraphqlDirectorClient;
use crate::k8s::{KubeOperationClient, KubeStatusManager};
use crate::observability;
use crate::webhook::DefaultWebhookClient;

/// Initialization result containing all necessary components for the
/// controller
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// API for the Operation CRD
    pub operations: Api<Operation>,
    /// Reconciler with its wired collaborators
    pub reconciler: Arc<OperationReconciler>,
    /// Validated controller configuration
    pub config: ControllerConfig,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Configuration loading and validation
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Reconciler and collaborator wiring
/// - Listing existing Operation resources
pub async fn initialize() -> Result<InitializationResult> {
    // Configure rustls crypto provider FIRST, before any other operations
    // Required for rustls 0.23+ when no default provider is set via features
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "operations_controller=info".into()),
        )
        .init();

    info!("Starting Operations Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    // An invalid time layout or poll status policy aborts startup here
    let config = ControllerConfig::from_env().context("Invalid controller configuration")?;
    let server_config = ServerConfig::from_env();
    info!(
        timeout_factor = config.timeout_factor,
        webhook_timeout_secs = config.webhook_timeout.as_secs(),
        requeue_interval_secs = config.requeue_interval.as_secs(),
        max_concurrent_reconciles = config.max_concurrent_reconciles,
        director_url = %config.director_url,
        "Controller configuration loaded"
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(std::sync::atomic::AtomicBool::new(false)),
    });

    // Start server in background task and wait for it to be ready so
    // readiness probes pass before reconciliation begins
    let server_state_clone = Arc::clone(&server_state);
    let server_port = server_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default().await?;

    // Watch all namespaces; callers create Operation resources wherever
    // their workloads live
    let operations: Api<Operation> = Api::all(client.clone());

    let status_manager = Arc::new(KubeStatusManager::new(client.clone(), &config));
    let k8s_client = Arc::new(KubeOperationClient::new(client.clone()));
    let director_client = Arc::new(
        GraphqlDirectorClient::new(config.director_url.clone(), config.webhook_timeout)
            .context("Failed to build director client")?,
    );
    let webhook_client =
        Arc::new(DefaultWebhookClient::new().context("Failed to build webhook client")?);

    let reconciler = Arc::new(OperationReconciler::new(
        config.clone(),
        status_manager,
        k8s_client,
        director_client,
        webhook_client,
    ));

    list_existing_operations(&operations).await;

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        operations,
        reconciler,
        config,
        server_state,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = std::time::Duration::from_secs(server_config.startup_timeout_secs);
    let poll_interval = std::time::Duration::from_millis(server_config.poll_interval_ms);
    let start_time = std::time::Instant::now();

    loop {
        // Check if server task crashed
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state
            .is_ready
            .load(std::sync::atomic::Ordering::Relaxed)
        {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}

/// Log a summary of existing Operation resources before the watch starts
///
/// The watch performs its own initial list and reconciles each existing
/// resource; this is operations visibility only.
async fn list_existing_operations(operations: &Api<Operation>) {
    match operations.list(&ListParams::default()).await {
        Ok(list) => {
            info!(
                "CRD is queryable, found {} existing Operation resources",
                list.items.len()
            );
            for item in &list.items {
                let phase = item
                    .phase()
                    .map_or_else(|| "Uninitialized".to_string(), |p| p.to_string());
                info!(
                    operation.namespace = item.namespace().as_deref().unwrap_or("default"),
                    operation.name = %item.name_any(),
                    operation_type = %item.spec.operation_type,
                    phase = %phase,
                    "Existing operation"
                );
            }
        }
        Err(e) => {
            error!("CRD is not queryable; {:?}. Is the CRD installed?", e);
            error!("Installation: kubectl apply -f config/crd/operation.yaml");
        }
    }
}
