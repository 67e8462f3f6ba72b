//! Evaluation pipeline.
//!
//! - **Config**: [`EvalConfig`], defaults overridden by `BENCH_*` variables
//! - **Orchestrator**: [`EvaluationOrchestrator`] runs a model over a catalog
//!   and persists each task as it completes
//! - **Progress**: [`ProgressMonitor`] logs run counters in the background
//!
//! # Flow
//!
//! 1. **Selection**: all catalog tasks, or the one named by `--task`
//! 2. **Resume**: tasks already in the results file are skipped unless forced
//! 3. **Sampling**: the task's completions are requested concurrently
//! 4. **Scoring**: each completion is reset, applied and validated in order,
//!    one at a time, against the single sandbox
//! 5. **Storage**: the task result is merged and the file rewritten atomically
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use drupal_bench::pipeline::{EvalConfig, EvaluationOrchestrator, RunOptions};
//!
//! let config = EvalConfig::from_env()?;
//! let orchestrator = EvaluationOrchestrator::new(sandbox, runner, sampler);
//! let mut store = ResultsStore::open(config.output_path(), &config.model)?;
//! let summary = orchestrator.run(&catalog, &mut store, &RunOptions::default()).await?;
//! println!("pass@1 {:.3}", summary.scores.pass_at_1);
//! ```

pub mod config;
pub mod orchestrator;
pub mod progress;

pub use config::{ConfigError, EvalConfig};
pub use orchestrator::{
    verify_catalog, CatalogVerification, EvaluationOrchestrator, PipelineError, RunOptions,
    RunSummary,
};
pub use progress::{ProgressCounters, ProgressMonitor, ProgressSnapshot};
