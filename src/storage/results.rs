//! Persisted result records.
//!
//! The stable fields (`model_name`, totals, `pass_at_1`, `pass_at_5`, and per
//! task `task_id`, `title`, `passed`, `quality_summary`, `domain_results`) are
//! read by the leaderboard front-end. Everything else is detail for
//! inspection and rescoring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{Domain, Provenance, Task};
use crate::runner::SampleOutcome;
use crate::scoring::{ScoreSummary, TaskCounts};
use crate::validators::ValidationOutcome;

/// Everything recorded about one evaluated task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub title: String,
    /// Whether sample 0 passed.
    pub passed: bool,
    pub quality_summary: String,
    #[serde(default)]
    pub domain_results: ValidationOutcome,
    #[serde(default)]
    pub total_samples: usize,
    #[serde(default)]
    pub correct_samples: usize,
    #[serde(default)]
    pub pass_at_1: f64,
    #[serde(default)]
    pub pass_at_5: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<SampleOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskResult {
    /// Builds the result for `task` from its scored samples.
    pub fn from_samples(task: &Task, mut samples: Vec<SampleOutcome>) -> Self {
        samples.sort_by_key(|s| s.index);
        let first = samples.first();
        let passed = first.is_some_and(|s| s.passed);
        let quality_summary = first.map_or_else(|| "Failed".to_string(), SampleOutcome::summary);

        let domain_results = samples
            .iter()
            .find(|s| s.passed)
            .or_else(|| samples.iter().find(|s| s.applied))
            .map(|s| s.validations.clone())
            .unwrap_or_default();

        let mut result = Self {
            task_id: task.id.clone(),
            title: task.title.clone(),
            passed,
            quality_summary,
            domain_results,
            total_samples: samples.len(),
            correct_samples: samples.iter().filter(|s| s.passed).count(),
            pass_at_1: 0.0,
            pass_at_5: 0.0,
            domain: task.domain,
            provenance: Some(task.provenance),
            samples,
            completed_at: Some(Utc::now()),
        };
        result.rescore();
        result
    }

    pub fn counts(&self) -> TaskCounts {
        TaskCounts::new(self.total_samples, self.correct_samples)
    }

    /// Files holding only the stable fields carry no sample counts; the
    /// recorded verdict stands in as a single sample.
    fn backfill_counts(&mut self) {
        if self.total_samples == 0 {
            self.total_samples = 1;
            self.correct_samples = usize::from(self.passed);
        }
    }

    /// Recomputes the per-task estimates from the stored counts.
    pub fn rescore(&mut self) {
        let counts = self.counts();
        self.pass_at_1 = counts.pass_at(1);
        self.pass_at_5 = counts.pass_at(5);
    }
}

/// One model's run over the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub model_name: String,
    #[serde(default)]
    pub total_tasks: usize,
    #[serde(default)]
    pub total_samples: usize,
    #[serde(default)]
    pub total_correct: usize,
    #[serde(default)]
    pub pass_at_1: f64,
    #[serde(default)]
    pub pass_at_5: f64,
    #[serde(default)]
    pub tasks: Vec<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ModelResult {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            total_tasks: 0,
            total_samples: 0,
            total_correct: 0,
            pass_at_1: 0.0,
            pass_at_5: 0.0,
            tasks: Vec::new(),
            updated_at: None,
        }
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskResult> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.get(task_id).is_some()
    }

    /// Replaces the task with the same id in place, or appends it.
    pub fn upsert(&mut self, task: TaskResult) {
        match self.tasks.iter_mut().find(|t| t.task_id == task.task_id) {
            Some(existing) => *existing = task,
            None => self.tasks.push(task),
        }
        self.recompute();
    }

    pub fn summary(&self) -> ScoreSummary {
        let counts: Vec<TaskCounts> = self.tasks.iter().map(TaskResult::counts).collect();
        ScoreSummary::from_counts(&counts)
    }

    /// Recomputes every derived score from the per-task counts.
    pub fn recompute(&mut self) {
        for task in &mut self.tasks {
            task.backfill_counts();
            task.rescore();
        }
        let summary = self.summary();
        self.total_tasks = summary.total_tasks;
        self.total_samples = summary.total_samples;
        self.total_correct = summary.total_correct;
        self.pass_at_1 = summary.pass_at_1;
        self.pass_at_5 = summary.pass_at_5;
    }
}
