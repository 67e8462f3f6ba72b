//! Background progress monitor for evaluation runs.
//!
//! Periodically logs run counters (tasks done and skipped, samples evaluated
//! and passed, sandbox faults) so operators can follow long runs without
//! reading per-sample log lines.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// Snapshot of run counters at a point in time.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub tasks_done: usize,
    pub tasks_skipped: usize,
    pub samples_evaluated: usize,
    pub samples_passed: usize,
    pub sandbox_faults: usize,
    pub elapsed: Duration,
}

/// Shared atomic counters, cloned into the orchestrator and the monitor.
#[derive(Debug, Clone)]
pub struct ProgressCounters {
    /// Tasks evaluated and persisted in this run.
    pub tasks_done: Arc<AtomicUsize>,
    /// Tasks skipped because the results file already had them.
    pub tasks_skipped: Arc<AtomicUsize>,
    pub samples_evaluated: Arc<AtomicUsize>,
    pub samples_passed: Arc<AtomicUsize>,
    /// Samples that ended in a sandbox fault.
    pub sandbox_faults: Arc<AtomicUsize>,
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self {
            tasks_done: Arc::new(AtomicUsize::new(0)),
            tasks_skipped: Arc::new(AtomicUsize::new(0)),
            samples_evaluated: Arc::new(AtomicUsize::new(0)),
            samples_passed: Arc::new(AtomicUsize::new(0)),
            sandbox_faults: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn snapshot(&self, start: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            tasks_done: self.tasks_done.load(Ordering::Relaxed),
            tasks_skipped: self.tasks_skipped.load(Ordering::Relaxed),
            samples_evaluated: self.samples_evaluated.load(Ordering::Relaxed),
            samples_passed: self.samples_passed.load(Ordering::Relaxed),
            sandbox_faults: self.sandbox_faults.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        }
    }
}

/// A background task that logs run progress every `interval`.
///
/// Call [`ProgressMonitor::stop`] to cancel; dropping it also stops the loop
/// at its next tick.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Starts the monitor.
    ///
    /// `total_tasks` is the number of tasks in the selected catalog and is
    /// only used for the percentage.
    pub fn start(counters: ProgressCounters, total_tasks: usize, interval: Duration) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = counters.snapshot(start);
                let finished = snap.tasks_done + snap.tasks_skipped;
                let pct = if total_tasks > 0 {
                    (finished as f64 / total_tasks as f64 * 100.0).min(100.0)
                } else {
                    0.0
                };
                let samples_per_min = if snap.elapsed.as_secs_f64() > 0.0 {
                    snap.samples_evaluated as f64 / snap.elapsed.as_secs_f64() * 60.0
                } else {
                    0.0
                };

                tracing::info!(
                    tasks_done = snap.tasks_done,
                    tasks_skipped = snap.tasks_skipped,
                    total_tasks,
                    samples_evaluated = snap.samples_evaluated,
                    samples_passed = snap.samples_passed,
                    sandbox_faults = snap.sandbox_faults,
                    progress_pct = format!("{:.1}%", pct),
                    elapsed_secs = snap.elapsed.as_secs(),
                    samples_per_min = format!("{:.2}", samples_per_min),
                    "Evaluation progress"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Signals the monitor to stop and waits for it.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}
