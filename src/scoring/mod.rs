//! Unbiased pass@k estimation.
//!
//! For a task with `n` samples of which `c` are correct:
//!
//! ```text
//! pass@k = 1 - C(n-c, k) / C(n, k)
//! ```
//!
//! computed as the numerically stable product
//! `1 - prod_{i=n-c+1}^{n} (1 - k/i)`. When `n - c < k` every draw of `k`
//! samples contains a correct one and the value is exactly 1.

use serde::{Deserialize, Serialize};

/// Estimates pass@k for one task.
///
/// Returns 0 when there are no samples, no correct samples, or `k` is 0.
pub fn pass_at_k(n: usize, c: usize, k: usize) -> f64 {
    let c = c.min(n);
    if n == 0 || c == 0 || k == 0 {
        return 0.0;
    }
    if n - c < k {
        return 1.0;
    }
    let product: f64 = ((n - c + 1)..=n)
        .map(|i| 1.0 - k as f64 / i as f64)
        .product();
    1.0 - product
}

/// Sample counts for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskCounts {
    pub samples: usize,
    pub correct: usize,
}

impl TaskCounts {
    pub fn new(samples: usize, correct: usize) -> Self {
        Self { samples, correct }
    }

    pub fn pass_at(&self, k: usize) -> f64 {
        pass_at_k(self.samples, self.correct, k)
    }
}

/// Mean of per-task pass@k. An empty set scores 0.
pub fn mean_pass_at_k(tasks: &[TaskCounts], k: usize) -> f64 {
    if tasks.is_empty() {
        return 0.0;
    }
    tasks.iter().map(|t| t.pass_at(k)).sum::<f64>() / tasks.len() as f64
}

/// Aggregate scores for a model.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub total_tasks: usize,
    pub total_samples: usize,
    pub total_correct: usize,
    pub pass_at_1: f64,
    pub pass_at_5: f64,
}

impl ScoreSummary {
    pub fn from_counts(tasks: &[TaskCounts]) -> Self {
        Self {
            total_tasks: tasks.len(),
            total_samples: tasks.iter().map(|t| t.samples).sum(),
            total_correct: tasks.iter().map(|t| t.correct).sum(),
            pass_at_1: mean_pass_at_k(tasks, 1),
            pass_at_5: mean_pass_at_k(tasks, 5),
        }
    }
}
