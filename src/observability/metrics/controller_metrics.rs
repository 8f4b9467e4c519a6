//! # Controller Metrics
//!
//! Metrics for Operation reconciliation: pass counts, failures, durations,
//! near-timeout visibility, and requeues.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{HistogramVec, IntCounter, IntCounterVec};
use std::sync::LazyLock;

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "operations_controller_reconciliations_total",
        "Total number of reconciliation passes",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "operations_controller_reconciliation_errors_total",
        "Total number of reconciliation passes that surfaced an error to the scheduler",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "operations_controller_operation_duration_seconds",
            "Time from status initialization to a terminal phase",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["operation_type"],
    )
    .expect("Failed to create OPERATION_DURATION metric - this should never happen")
});

static FAILED_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "operations_controller_failed_operations_total",
            "Total number of operations that reached the Failed phase",
        ),
        &["operation_type"],
    )
    .expect("Failed to create FAILED_OPERATIONS_TOTAL metric - this should never happen")
});

static OPERATIONS_NEAR_TIMEOUT_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "operations_controller_operations_near_timeout_total",
            "Operations that finished after consuming most of their webhook timeout",
        ),
        &["operation_type"],
    )
    .expect("Failed to create OPERATIONS_NEAR_TIMEOUT_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "operations_controller_requeues_total",
            "Total number of reconciliation requeues",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

/// Register controller metrics with the registry
pub(crate) fn register_controller_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OPERATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(FAILED_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OPERATIONS_NEAR_TIMEOUT_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    Ok(())
}

// Public functions for controller metrics

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_operation_duration(operation_type: &str, seconds: f64) {
    OPERATION_DURATION
        .with_label_values(&[operation_type])
        .observe(seconds);
}

pub fn increment_failed_operations(operation_type: &str) {
    FAILED_OPERATIONS_TOTAL
        .with_label_values(&[operation_type])
        .inc();
}

pub fn increment_operations_near_timeout(operation_type: &str) {
    OPERATIONS_NEAR_TIMEOUT_TOTAL
        .with_label_values(&[operation_type])
        .inc();
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}
