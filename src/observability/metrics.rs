//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `secrets_manager_secret_sync_errors_count` - Sync errors per secret and target namespace
//! - `secrets_manager_secret_last_updated` - Unix time of the last successful write per secret and namespace
//! - `secrets_manager_reconciliations_total` - Total number of reconciliations
//! - `secrets_manager_reconciliation_errors_total` - Total number of failed reconciliations
//! - `secrets_manager_reconciliation_duration_seconds` - Duration of reconciliations
//! - `secrets_manager_reconciliation_dropped_total` - Keys dropped after exhausting their retries
//! - `secrets_manager_queue_depth` - Keys waiting in the work queue

use anyhow::Result;
use prometheus::{GaugeVec, Histogram, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::LazyLock;

// `name` holds the Secret name, the `secretName` of `secretSyncErrorsCount{secretName, namespace}`
const SECRET_LABELS: &[&str] = &["name", "namespace"];

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static SECRET_SYNC_ERRORS_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "secrets_manager_secret_sync_errors_count",
            "Number of errors while syncing a secret into a namespace",
        ),
        SECRET_LABELS,
    )
    .expect("Failed to create SECRET_SYNC_ERRORS_COUNT metric - this should never happen")
});

static SECRET_LAST_UPDATED: LazyLock<GaugeVec> = LazyLock::new(|| {
    GaugeVec::new(
        Opts::new(
            "secrets_manager_secret_last_updated",
            "Unix timestamp of the last successful write of a secret into a namespace",
        ),
        SECRET_LABELS,
    )
    .expect("Failed to create SECRET_LAST_UPDATED metric - this should never happen")
});

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secrets_manager_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secrets_manager_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "secrets_manager_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static RECONCILIATION_DROPPED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secrets_manager_reconciliation_dropped_total",
        "Total number of keys dropped from the queue after too many failures",
    )
    .expect("Failed to create RECONCILIATION_DROPPED_TOTAL metric - this should never happen")
});

static QUEUE_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "secrets_manager_queue_depth",
        "Number of keys ready to be processed",
    )
    .expect("Failed to create QUEUE_DEPTH metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
/// Register every metric in the process registry. Call once at startup.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(SECRET_SYNC_ERRORS_COUNT.clone()))?;
    REGISTRY.register(Box::new(SECRET_LAST_UPDATED.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DROPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone()))?;

    Ok(())
}

/// Gather all registered metric families
#[must_use]
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

pub fn increment_secret_sync_errors(name: &str, namespace: &str) {
    SECRET_SYNC_ERRORS_COUNT
        .with_label_values(&[name, namespace])
        .inc();
}

#[must_use]
pub fn secret_sync_errors(name: &str, namespace: &str) -> u64 {
    SECRET_SYNC_ERRORS_COUNT
        .with_label_values(&[name, namespace])
        .get()
}

#[allow(
    clippy::cast_precision_loss,
    reason = "Unix seconds fit in f64 mantissa for the foreseeable future"
)]
pub fn set_secret_last_updated(name: &str, namespace: &str, unix_seconds: i64) {
    SECRET_LAST_UPDATED
        .with_label_values(&[name, namespace])
        .set(unix_seconds as f64);
}

#[must_use]
pub fn secret_last_updated(name: &str, namespace: &str) -> f64 {
    SECRET_LAST_UPDATED
        .with_label_values(&[name, namespace])
        .get()
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

pub fn increment_reconciliation_dropped() {
    RECONCILIATION_DROPPED_TOTAL.inc();
}

#[must_use]
pub fn reconciliation_dropped() -> u64 {
    RECONCILIATION_DROPPED_TOTAL.get()
}

#[allow(
    clippy::cast_possible_wrap,
    reason = "Queue depth never approaches i64::MAX"
)]
pub fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(depth as i64);
}
