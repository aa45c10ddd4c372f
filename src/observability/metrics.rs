//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `dockhand_reconciliations_total` - Total number of reconciliations
//! - `dockhand_reconciliation_errors_total` - Total number of reconciliation errors
//! - `dockhand_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `dockhand_backend_fetch_total{backend}` - Secret reads that reached a backend
//! - `dockhand_backend_fetch_errors_total{backend}` - Failed backend reads
//! - `dockhand_backend_fetch_duration_seconds{backend}` - Duration of backend reads
//! - `dockhand_backend_cache_hits_total{backend}` - Reads served from the TTL cache
//! - `dockhand_workloads_patched_total{kind}` - Workloads patched with a new checksum
//! - `dockhand_webhook_admissions_total{kind,result}` - Admission reviews handled
//! - `dockhand_certificate_rotations_total` - Webhook certificates issued
//! - `dockhand_requeues_total{reason}` - Requeues scheduled by the controller

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dockhand_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dockhand_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "dockhand_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static BACKEND_FETCH_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "dockhand_backend_fetch_total",
            "Total number of secret reads sent to a backend",
        ),
        &["backend"],
    )
    .expect("Failed to create BACKEND_FETCH_TOTAL metric - this should never happen")
});

static BACKEND_FETCH_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "dockhand_backend_fetch_errors_total",
            "Total number of failed secret reads by backend",
        ),
        &["backend"],
    )
    .expect("Failed to create BACKEND_FETCH_ERRORS_TOTAL metric - this should never happen")
});

static BACKEND_FETCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "dockhand_backend_fetch_duration_seconds",
            "Duration of backend secret reads in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        &["backend"],
    )
    .expect("Failed to create BACKEND_FETCH_DURATION metric - this should never happen")
});

static BACKEND_CACHE_HITS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "dockhand_backend_cache_hits_total",
            "Total number of secret reads served from the TTL cache",
        ),
        &["backend"],
    )
    .expect("Failed to create BACKEND_CACHE_HITS_TOTAL metric - this should never happen")
});

static WORKLOADS_PATCHED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "dockhand_workloads_patched_total",
            "Total number of workloads patched with a new secret checksum",
        ),
        &["kind"],
    )
    .expect("Failed to create WORKLOADS_PATCHED_TOTAL metric - this should never happen")
});

static WEBHOOK_ADMISSIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "dockhand_webhook_admissions_total",
            "Total number of admission reviews by kind and result",
        ),
        &["kind", "result"],
    )
    .expect("Failed to create WEBHOOK_ADMISSIONS_TOTAL metric - this should never happen")
});

static CERTIFICATE_ROTATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dockhand_certificate_rotations_total",
        "Total number of webhook certificates issued",
    )
    .expect("Failed to create CERTIFICATE_ROTATIONS_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "dockhand_requeues_total",
            "Total number of requeues scheduled by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Registration only fails when called twice"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(BACKEND_FETCH_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BACKEND_FETCH_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BACKEND_FETCH_DURATION.clone()))?;
    REGISTRY.register(Box::new(BACKEND_CACHE_HITS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WORKLOADS_PATCHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WEBHOOK_ADMISSIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CERTIFICATE_ROTATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    Ok(())
}

/// Render the registry in the Prometheus text format
#[must_use]
pub fn gather_text() -> String {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
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

/// Record a successful backend read and its latency
pub fn record_backend_fetch(backend: &str, duration: f64) {
    BACKEND_FETCH_TOTAL.with_label_values(&[backend]).inc();
    BACKEND_FETCH_DURATION
        .with_label_values(&[backend])
        .observe(duration);
}

pub fn increment_backend_fetch_errors(backend: &str) {
    BACKEND_FETCH_ERRORS_TOTAL.with_label_values(&[backend]).inc();
}

pub fn increment_backend_cache_hits(backend: &str) {
    BACKEND_CACHE_HITS_TOTAL.with_label_values(&[backend]).inc();
}

pub fn increment_workloads_patched(kind: &str) {
    WORKLOADS_PATCHED_TOTAL.with_label_values(&[kind]).inc();
}

/// `result` is one of `patched`, `allowed` or `error`
pub fn increment_webhook_admissions(kind: &str, result: &str) {
    WEBHOOK_ADMISSIONS_TOTAL
        .with_label_values(&[kind, result])
        .inc();
}

pub fn increment_certificate_rotations() {
    CERTIFICATE_ROTATIONS_TOTAL.inc();
}

pub fn increment_requeues(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}
