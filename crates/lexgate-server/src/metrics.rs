//! Prometheus metrics for lexgate.
//!
//! This module provides:
//! - Rate limit decision counters (allowed, denied, degraded)
//! - Derived cache hit/miss counters
//! - Store degradation counters

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    pub const RATE_LIMIT_DECISIONS_TOTAL: &str = "rate_limit_decisions_total";
    pub const QUOTA_WARNINGS_TOTAL: &str = "rate_limit_quota_warnings_total";

    pub const DERIVED_CACHE_HITS_TOTAL: &str = "derived_cache_hits_total";
    pub const DERIVED_CACHE_MISSES_TOTAL: &str = "derived_cache_misses_total";

    pub const STORE_DEGRADED_TOTAL: &str = "store_degraded_total";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// Record a rate check outcome: `allowed`, `denied`, `degraded` or `rejected`.
pub fn record_rate_decision(outcome: &'static str) {
    counter!(names::RATE_LIMIT_DECISIONS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_quota_warning() {
    counter!(names::QUOTA_WARNINGS_TOTAL).increment(1);
}

pub fn record_derived_hit(kind: &'static str) {
    counter!(names::DERIVED_CACHE_HITS_TOTAL, "kind" => kind).increment(1);
}

/// Record a derived cache miss with its reason.
pub fn record_derived_miss(kind: &'static str, reason: &'static str) {
    counter!(names::DERIVED_CACHE_MISSES_TOTAL, "kind" => kind, "reason" => reason).increment(1);
}

/// Record an absorbed store failure.
pub fn record_store_degraded(operation: String) {
    counter!(names::STORE_DEGRADED_TOTAL, "operation" => operation).increment(1);
}
