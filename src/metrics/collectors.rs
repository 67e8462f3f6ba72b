//! Recording helpers for drupal-bench metrics.
//!
//! `MetricsCollector` wraps the raw Prometheus statics so call sites do not
//! care whether `init_metrics()` has run; every method is a no-op until it has.

use std::time::Duration;

use super::prometheus::{
    EXEC_DURATION, MODEL_REQUESTS_TOTAL, SAMPLES_TOTAL, SANDBOX_RECOVERIES_TOTAL, TASKS_TOTAL,
};

/// Metrics collector for recording evaluation metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a scored sample.
    ///
    /// `status` is `passed`, `failed`, or a failure kind such as `patch_rejected`.
    pub fn record_sample(&self, status: &str) {
        if let Some(samples) = SAMPLES_TOTAL.get() {
            samples.with_label_values(&[status]).inc();
        }
        tracing::trace!(status = status, "Recorded sample metric");
    }

    /// Record a processed task.
    pub fn record_task(&self, outcome: &str) {
        if let Some(tasks) = TASKS_TOTAL.get() {
            tasks.with_label_values(&[outcome]).inc();
        }
    }

    /// Record a recovered sandbox fault.
    pub fn record_recovery(&self, fault: &str) {
        if let Some(recoveries) = SANDBOX_RECOVERIES_TOTAL.get() {
            recoveries.with_label_values(&[fault]).inc();
        }
        tracing::trace!(fault = fault, "Recorded recovery metric");
    }

    /// Record how long a sandbox command took.
    pub fn record_exec(&self, elapsed: Duration) {
        if let Some(hist) = EXEC_DURATION.get() {
            hist.observe(elapsed.as_secs_f64());
        }
    }

    /// Record a model sampling request.
    pub fn record_model_request(&self, success: bool) {
        if let Some(requests) = MODEL_REQUESTS_TOTAL.get() {
            let status = if success { "success" } else { "error" };
            requests.with_label_values(&[status]).inc();
        }
    }
}
