//! Evaluation orchestrator.
//!
//! Coordinates one model's run over a catalog:
//! - resume from the results file, skipping completed tasks unless forced
//! - request the task's completions from the sampling capability
//! - score each completion against the shared sandbox, one at a time
//! - persist the task result before moving on
//!
//! Only storage failures abort a run. Everything else becomes a scored,
//! failed sample.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::progress::ProgressCounters;
use crate::catalog::{Task, TaskCatalog};
use crate::error::StoreError;
use crate::execution::Sandbox;
use crate::llm::SampleSource;
use crate::metrics::MetricsCollector;
use crate::patch::{ApplyOutcome, PatchApplier};
use crate::runner::{SampleFailure, SampleOutcome, SampleRunner};
use crate::scoring::ScoreSummary;
use crate::storage::{ResultsStore, TaskResult};

/// Errors that abort an evaluation run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Results could not be persisted.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// The requested task is not in the catalog.
    #[error("Task '{0}' not found in the catalog")]
    UnknownTask(String),

    /// Nothing to evaluate.
    #[error("No tasks to evaluate")]
    NoTasks,
}

/// What to evaluate.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Restrict the run to one task identifier.
    pub task: Option<String>,
    /// Samples per task.
    pub samples: usize,
    /// Re-evaluate tasks already in the results file.
    pub force: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            task: None,
            samples: 5,
            force: false,
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Tasks evaluated in this run.
    pub evaluated: usize,
    /// Tasks skipped because they were already completed.
    pub skipped: usize,
    /// Aggregates over the whole results file afterwards.
    pub scores: ScoreSummary,
}

/// Runs a model over a task catalog against a single sandbox.
pub struct EvaluationOrchestrator {
    sandbox: Arc<dyn Sandbox>,
    runner: SampleRunner,
    source: Arc<dyn SampleSource>,
    counters: ProgressCounters,
    metrics: MetricsCollector,
}

impl EvaluationOrchestrator {
    pub fn new(
        sandbox: Arc<dyn Sandbox>,
        runner: SampleRunner,
        source: Arc<dyn SampleSource>,
    ) -> Self {
        Self {
            sandbox,
            runner,
            source,
            counters: ProgressCounters::new(),
            metrics: MetricsCollector::new(),
        }
    }

    /// Shares progress counters with a [`super::ProgressMonitor`].
    pub fn with_counters(mut self, counters: ProgressCounters) -> Self {
        self.counters = counters;
        self
    }

    pub fn counters(&self) -> &ProgressCounters {
        &self.counters
    }

    /// Evaluates every selected task not yet in `store`.
    ///
    /// Each task is persisted as soon as all its samples are scored, so an
    /// interrupted run resumes at the first unfinished task.
    pub async fn run(
        &self,
        catalog: &TaskCatalog,
        store: &mut ResultsStore,
        options: &RunOptions,
    ) -> Result<RunSummary, PipelineError> {
        let selected = match &options.task {
            Some(id) => catalog
                .select(id)
                .ok_or_else(|| PipelineError::UnknownTask(id.clone()))?,
            None => catalog.clone(),
        };
        if selected.is_empty() {
            return Err(PipelineError::NoTasks);
        }

        info!(
            tasks = selected.len(),
            samples = options.samples,
            force = options.force,
            results = %store.path().display(),
            "Starting evaluation"
        );

        let started = Instant::now();
        let mut evaluated = 0;
        let mut skipped = 0;

        for task in selected.iter() {
            if !options.force && store.is_completed(&task.id) {
                debug!(task_id = %task.id, "Already evaluated, skipping");
                self.counters.tasks_skipped.fetch_add(1, Ordering::Relaxed);
                skipped += 1;
                continue;
            }

            let result = self.evaluate_task(task, options.samples).await;
            info!(
                task_id = %task.id,
                passed = result.passed,
                correct = result.correct_samples,
                samples = result.total_samples,
                summary = %result.quality_summary,
                "Task evaluated"
            );
            self.metrics
                .record_task(if result.passed { "passed" } else { "failed" });

            store.append(result)?;
            self.counters.tasks_done.fetch_add(1, Ordering::Relaxed);
            evaluated += 1;
        }

        let scores = store.result().summary();
        info!(
            evaluated,
            skipped,
            total_tasks = scores.total_tasks,
            pass_at_1 = format!("{:.4}", scores.pass_at_1),
            pass_at_5 = format!("{:.4}", scores.pass_at_5),
            elapsed_secs = started.elapsed().as_secs(),
            "Evaluation finished"
        );

        Ok(RunSummary {
            evaluated,
            skipped,
            scores,
        })
    }

    /// Samples and scores one task. Never fails; faults become outcomes.
    pub async fn evaluate_task(&self, task: &Task, samples: usize) -> TaskResult {
        let outcomes = match self.source.complete(task, samples).await {
            Ok(completions) => self.score_completions(task, samples, completions).await,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Model unavailable, recording task as failed");
                let reason = format!("Model unavailable: {e}");
                (0..samples)
                    .map(|index| {
                        self.metrics.record_sample(SampleFailure::ModelUnavailable.label());
                        SampleOutcome::model_unavailable(index, reason.clone())
                    })
                    .collect()
            }
        };
        TaskResult::from_samples(task, outcomes)
    }

    async fn score_completions(
        &self,
        task: &Task,
        samples: usize,
        completions: Vec<String>,
    ) -> Vec<SampleOutcome> {
        if completions.len() != samples {
            warn!(
                task_id = %task.id,
                expected = samples,
                received = completions.len(),
                "Model returned an unexpected number of completions"
            );
        }

        let mut outcomes = Vec::with_capacity(samples);
        for index in 0..samples {
            let outcome = match completions.get(index) {
                Some(completion) => {
                    self.runner
                        .run(self.sandbox.as_ref(), task, index, completion)
                        .await
                }
                None => SampleOutcome::model_unavailable(
                    index,
                    format!(
                        "Model returned {} of {} completions.",
                        completions.len(),
                        samples
                    ),
                ),
            };

            self.counters.samples_evaluated.fetch_add(1, Ordering::Relaxed);
            if outcome.passed {
                self.counters.samples_passed.fetch_add(1, Ordering::Relaxed);
            }
            if matches!(
                outcome.failure,
                Some(SampleFailure::SandboxUnavailable | SampleFailure::Timeout)
            ) {
                self.counters.sandbox_faults.fetch_add(1, Ordering::Relaxed);
            }
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// Result of checking a catalog's reference solutions.
#[derive(Debug, Default)]
pub struct CatalogVerification {
    /// Tasks whose reference applies cleanly, in catalog order.
    pub kept: Vec<Task>,
    /// `(task_id, diagnostic)` for every task that was dropped.
    pub dropped: Vec<(String, String)>,
}

/// Resets the sandbox and applies each task's reference solution.
///
/// Sandbox faults drop the task with the fault as its diagnostic.
pub async fn verify_catalog(sandbox: &dyn Sandbox, catalog: &TaskCatalog) -> CatalogVerification {
    let applier = PatchApplier::new();
    let mut verification = CatalogVerification::default();

    for task in catalog.iter() {
        let result = match sandbox.reset().await {
            Ok(()) => applier.apply(sandbox, &task.ground_truth).await,
            Err(e) => Err(e),
        };
        let diagnostic = match result {
            Ok(application) => match application.outcome {
                ApplyOutcome::Applied => {
                    debug!(task_id = %task.id, "Reference applies");
                    verification.kept.push(task.clone());
                    continue;
                }
                ApplyOutcome::Empty => "Reference solution contains no diff.".to_string(),
                other => other.to_string(),
            },
            Err(e) => e.to_string(),
        };
        warn!(task_id = %task.id, diagnostic = %diagnostic, "Reference does not apply, dropping task");
        verification.dropped.push((task.id.clone(), diagnostic));
    }

    if let Err(e) = sandbox.reset().await {
        warn!(error = %e, "Failed to reset sandbox after verification");
    }
    info!(
        kept = verification.kept.len(),
        dropped = verification.dropped.len(),
        "Catalog verified"
    );
    verification
}
