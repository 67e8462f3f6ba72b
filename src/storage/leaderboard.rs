//! Leaderboard file consumed by the results front-end.
//!
//! The file is a JSON array of per-model entries carrying only the stable
//! result fields. Entries of other models are kept as they are.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::results::{ModelResult, TaskResult};
use super::store::write_json_atomic;
use crate::error::StoreError;
use crate::validators::ValidationOutcome;

#[derive(Debug, Serialize)]
struct PublishedTask<'a> {
    task_id: &'a str,
    title: &'a str,
    passed: bool,
    quality_summary: &'a str,
    domain_results: &'a ValidationOutcome,
}

impl<'a> From<&'a TaskResult> for PublishedTask<'a> {
    fn from(t: &'a TaskResult) -> Self {
        Self {
            task_id: &t.task_id,
            title: &t.title,
            passed: t.passed,
            quality_summary: &t.quality_summary,
            domain_results: &t.domain_results,
        }
    }
}

#[derive(Debug, Serialize)]
struct PublishedModel<'a> {
    model_name: &'a str,
    total_tasks: usize,
    total_samples: usize,
    total_correct: usize,
    pass_at_1: f64,
    pass_at_5: f64,
    tasks: Vec<PublishedTask<'a>>,
}

/// The leaderboard entry for a model result.
pub fn entry(result: &ModelResult) -> Result<Value, StoreError> {
    let published = PublishedModel {
        model_name: &result.model_name,
        total_tasks: result.total_tasks,
        total_samples: result.total_samples,
        total_correct: result.total_correct,
        pass_at_1: result.pass_at_1,
        pass_at_5: result.pass_at_5,
        tasks: result.tasks.iter().map(PublishedTask::from).collect(),
    };
    Ok(serde_json::to_value(published)?)
}

/// Replaces the entry with the same `model_name` or inserts a new one at the front.
pub fn merge(entries: &mut Vec<Value>, entry: Value) {
    let name = entry.get("model_name").cloned();
    match entries
        .iter_mut()
        .find(|e| name.is_some() && e.get("model_name") == name.as_ref())
    {
        Some(existing) => *existing = entry,
        None => entries.insert(0, entry),
    }
}

/// Merges `result` into the leaderboard file at `path`, creating it if needed.
///
/// Returns the number of models on the leaderboard.
pub fn publish(path: &Path, result: &ModelResult) -> Result<usize, StoreError> {
    let mut entries: Vec<Value> = match std::fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Vec::new(),
        Ok(content) => serde_json::from_str(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    merge(&mut entries, entry(result)?);
    write_json_atomic(path, &entries)?;
    info!(
        path = %path.display(),
        model = %result.model_name,
        models = entries.len(),
        "Published to leaderboard"
    );
    Ok(entries.len())
}
