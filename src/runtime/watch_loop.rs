//! # Watch Loop
//!
//! Runs the kube-runtime controller over the Operation CRD. One reconcile
//! pass per Operation key runs to completion; distinct keys are reconciled
//! concurrently up to the configured limit, and the scheduling layer
//! serializes passes for the same key.

use anyhow::Result;
use futures::StreamExt;
use kube::runtime::controller::Config as SchedulerConfig;
use kube::runtime::watcher;
use kube::runtime::Controller;
use kube::Api;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::controller::reconciler::{reconcile, OperationReconciler};
use crate::crd::Operation;
use crate::runtime::error_policy::handle_reconciliation_error;

/// Run the controller watch loop until shutdown
pub async fn run_watch_loop(
    operations: Api<Operation>,
    reconciler: Arc<OperationReconciler>,
    max_concurrent_reconciles: u16,
) -> Result<()> {
    info!(
        max_concurrent_reconciles,
        "Starting Operation watch loop"
    );

    Controller::new(operations, watcher::Config::default())
        .with_config(SchedulerConfig::default().concurrency(max_concurrent_reconciles))
        .shutdown_on_signal()
        .run(reconcile, handle_reconciliation_error, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((object_ref, action)) => {
                    debug!(object = %object_ref, ?action, "reconciliation completed");
                }
                Err(err) => {
                    warn!(error = %err, "reconciliation stream error");
                }
            }
        })
        .await;

    info!("Watch loop terminated, shutting down");
    Ok(())
}
