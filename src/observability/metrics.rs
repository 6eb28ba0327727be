//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `image_registry_operator_reconciliations_total` - Reconcile passes started
//! - `image_registry_operator_reconciliation_errors_total` - Reconcile passes that failed
//! - `image_registry_operator_reconciliation_duration_seconds` - Reconcile pass duration
//! - `image_registry_operator_object_operations_total` - Writes per managed kind and operation
//! - `image_registry_operator_conflict_retries_total` - Conflict retries per managed kind
//! - `image_registry_operator_storage_operations_total` - Remote storage calls per backend and operation
//! - `image_registry_operator_storage_operation_errors_total` - Failed remote storage calls

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "image_registry_operator_reconciliations_total",
        "Total number of reconcile passes",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "image_registry_operator_reconciliation_errors_total",
        "Total number of failed reconcile passes",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "image_registry_operator_reconciliation_duration_seconds",
            "Duration of reconcile passes in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 120.0, 300.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static OBJECT_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "image_registry_operator_object_operations_total",
            "Total number of writes to managed objects by kind and operation",
        ),
        &["kind", "operation"],
    )
    .expect("Failed to create OBJECT_OPERATIONS_TOTAL metric - this should never happen")
});

static CONFLICT_RETRIES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "image_registry_operator_conflict_retries_total",
            "Total number of retries caused by resourceVersion conflicts",
        ),
        &["kind"],
    )
    .expect("Failed to create CONFLICT_RETRIES_TOTAL metric - this should never happen")
});

static STORAGE_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "image_registry_operator_storage_operations_total",
            "Total number of remote storage operations by backend and operation",
        ),
        &["backend", "operation"],
    )
    .expect("Failed to create STORAGE_OPERATIONS_TOTAL metric - this should never happen")
});

static STORAGE_OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "image_registry_operator_storage_operation_errors_total",
            "Total number of failed remote storage operations by backend",
        ),
        &["backend"],
    )
    .expect("Failed to create STORAGE_OPERATION_ERRORS_TOTAL metric - this should never happen")
});

/// Register all metrics with the process-wide registry
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(OBJECT_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONFLICT_RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORAGE_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORAGE_OPERATION_ERRORS_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

/// Record a create, update or delete of a managed object
pub fn record_object_operation(kind: &str, operation: &str) {
    OBJECT_OPERATIONS_TOTAL
        .with_label_values(&[kind, operation])
        .inc();
}

pub fn increment_conflict_retries(kind: &str) {
    CONFLICT_RETRIES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_storage_operation(backend: &str, operation: &str) {
    STORAGE_OPERATIONS_TOTAL
        .with_label_values(&[backend, operation])
        .inc();
}

pub fn increment_storage_operation_errors(backend: &str) {
    STORAGE_OPERATION_ERRORS_TOTAL
        .with_label_values(&[backend])
        .inc();
}
