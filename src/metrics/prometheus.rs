//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by drupal-bench and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use std::path::Path;
use std::sync::OnceLock;

/// Global Prometheus registry for all drupal-bench metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Scored samples, labeled by status (`passed`, `failed`, or a failure kind).
pub static SAMPLES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Tasks processed by the orchestrator, labeled by outcome
/// (`passed`, `failed`, `skipped`).
pub static TASKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Sandbox fault recoveries, labeled by fault class.
pub static SANDBOX_RECOVERIES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Sandbox command latency in seconds.
pub static EXEC_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Model sampling requests, labeled by status.
pub static MODEL_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Safe to call more than once; later calls leave the first registry in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric construction or registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let samples_total = CounterVec::new(
        Opts::new("bench_samples_total", "Total number of scored samples"),
        &["status"],
    )?;

    let tasks_total = CounterVec::new(
        Opts::new("bench_tasks_total", "Total number of tasks processed"),
        &["outcome"],
    )?;

    let recoveries_total = CounterVec::new(
        Opts::new(
            "bench_sandbox_recoveries_total",
            "Sandbox runtime faults recovered from",
        ),
        &["fault"],
    )?;

    let exec_duration = Histogram::with_opts(
        HistogramOpts::new(
            "bench_exec_duration_seconds",
            "Sandbox command duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
    )?;

    let model_requests_total = CounterVec::new(
        Opts::new("bench_model_requests_total", "Model sampling requests"),
        &["status"],
    )?;

    registry.register(Box::new(samples_total.clone()))?;
    registry.register(Box::new(tasks_total.clone()))?;
    registry.register(Box::new(recoveries_total.clone()))?;
    registry.register(Box::new(exec_duration.clone()))?;
    registry.register(Box::new(model_requests_total.clone()))?;

    // If any of these fail, another thread initialized first.
    let _ = REGISTRY.set(registry);
    let _ = SAMPLES_TOTAL.set(samples_total);
    let _ = TASKS_TOTAL.set(tasks_total);
    let _ = SANDBOX_RECOVERIES_TOTAL.set(recoveries_total);
    let _ = EXEC_DURATION.set(exec_duration);
    let _ = MODEL_REQUESTS_TOTAL.set(model_requests_total);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an explanatory comment line if the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// Writes the text exposition to `path`, for node-exporter style textfile
/// collection at the end of a run.
pub fn write_textfile(path: &Path) -> std::io::Result<()> {
    std::fs::write(path, export_metrics())
}
