//! Metrics module for Prometheus-based monitoring.
//!
//! Counts scored samples, processed tasks, sandbox recoveries and model
//! requests, and times sandbox commands. Metrics can be written to a
//! text-exposition file at the end of a run.
//!
//! # Example
//!
//! ```ignore
//! use drupal_bench::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! let collector = MetricsCollector::new();
//! collector.record_sample("passed");
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics, write_textfile};

pub use prometheus::{
    EXEC_DURATION, MODEL_REQUESTS_TOTAL, REGISTRY, SAMPLES_TOTAL, SANDBOX_RECOVERIES_TOTAL,
    TASKS_TOTAL,
};
