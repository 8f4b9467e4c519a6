//! # Error Policy
//!
//! Backoff applied when a reconcile pass surfaces an error to the scheduling
//! layer. Backoff state is tracked per resource so one failing Operation
//! cannot slow the others down.

use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::controller::reconciler::OperationReconciler;
use crate::crd::Operation;
use crate::errors::ReconcileError;
use crate::observability::metrics;

/// Handle reconciliation errors with progressive per-resource backoff
pub fn handle_reconciliation_error(
    operation: Arc<Operation>,
    error: &ReconcileError,
    reconciler: Arc<OperationReconciler>,
) -> Action {
    let name = operation.name_any();
    let namespace = operation.namespace().unwrap_or_else(|| "default".to_string());

    error!(
        operation.name = %name,
        operation.namespace = %namespace,
        error = %error,
        "reconciliation error"
    );
    metrics::increment_reconciliation_errors();

    let resource_key = format!("{namespace}/{name}");
    let error_count = reconciler.record_error(&resource_key);
    let backoff = calculate_progressive_backoff(error_count);

    info!(
        backoff_secs = backoff.as_secs(),
        error_count, "retrying with progressive backoff"
    );
    metrics::increment_requeues_total("error-backoff");
    Action::requeue(backoff)
}

/// Progressive backoff based on the consecutive error count of one resource
///
/// Fibonacci growth (in seconds): 5, 5, 10, 15, 25, 40, 65, 105, 170, then
/// capped at 300.
pub fn calculate_progressive_backoff(error_count: u32) -> Duration {
    let backoff_seconds = match error_count {
        0 | 1 | 2 => 5,
        3 => 10,
        4 => 15,
        5 => 25,
        6 => 40,
        7 => 65,
        8 => 105,
        9 => 170,
        _ => 300,
    };

    Duration::from_secs(backoff_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(calculate_progressive_backoff(1), Duration::from_secs(5));
        assert_eq!(calculate_progressive_backoff(4), Duration::from_secs(15));
        assert_eq!(calculate_progressive_backoff(9), Duration::from_secs(170));
        assert_eq!(calculate_progressive_backoff(10), Duration::from_secs(300));
        assert_eq!(calculate_progressive_backoff(100), Duration::from_secs(300));
    }

    #[test]
    fn test_backoff_is_monotonic() {
        let mut previous = Duration::ZERO;
        for error_count in 0..20 {
            let backoff = calculate_progressive_backoff(error_count);
            assert!(backoff >= previous);
            previous = backoff;
        }
    }
}
