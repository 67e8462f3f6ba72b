//! Incremental, crash-safe result persistence.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::results::{ModelResult, TaskResult};
use crate::error::StoreError;

/// Writes `value` as pretty JSON by renaming a synced sibling temp file over `path`.
///
/// Readers see either the previous file or the new one, never a partial write.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let bytes = serde_json::to_vec_pretty(value)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Persist {
        path: path.display().to_string(),
        reason: e.error.to_string(),
    })?;
    Ok(())
}

/// Owns one model's results file.
#[derive(Debug)]
pub struct ResultsStore {
    path: PathBuf,
    result: ModelResult,
}

impl ResultsStore {
    /// Reads a results file. A missing file is `None`.
    ///
    /// Aggregates are recomputed from the per-task counts.
    pub fn load(path: &Path) -> Result<Option<ModelResult>, StoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut result: ModelResult = serde_json::from_str(&content)?;
        result.recompute();
        Ok(Some(result))
    }

    /// Opens the store for `model_name`, resuming prior state if the file exists.
    pub fn open(path: impl Into<PathBuf>, model_name: &str) -> Result<Self, StoreError> {
        let path = path.into();
        let result = match Self::load(&path)? {
            Some(existing) if existing.model_name != model_name => {
                return Err(StoreError::ModelMismatch {
                    expected: model_name.to_string(),
                    found: existing.model_name,
                })
            }
            Some(existing) => {
                info!(
                    path = %path.display(),
                    completed = existing.tasks.len(),
                    "Resuming from existing results"
                );
                existing
            }
            None => ModelResult::new(model_name),
        };
        Ok(Self { path, result })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn result(&self) -> &ModelResult {
        &self.result
    }

    pub fn is_completed(&self, task_id: &str) -> bool {
        self.result.contains(task_id)
    }

    /// Merges a finished task, recomputes aggregates and persists the whole result.
    pub fn append(&mut self, task: TaskResult) -> Result<(), StoreError> {
        debug!(task_id = %task.task_id, passed = task.passed, "Recording task result");
        self.result.upsert(task);
        self.result.updated_at = Some(Utc::now());
        self.persist()
    }

    pub fn persist(&self) -> Result<(), StoreError> {
        write_json_atomic(&self.path, &self.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Task;
    use crate::runner::SampleOutcome;
    use tempfile::TempDir;

    fn result(id: &str) -> TaskResult {
        TaskResult::from_samples(
            &Task::new(id, "title", "p", "d"),
            vec![SampleOutcome::model_unavailable(0, "down")],
        )
    }

    #[test]
    fn test_open_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = ResultsStore::open(dir.path().join("results.json"), "m").unwrap();
        assert!(store.result().tasks.is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_append_persists_and_resumes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/results.json");
        let mut store = ResultsStore::open(&path, "m").unwrap();
        store.append(result("1")).unwrap();
        store.append(result("2")).unwrap();

        let reopened = ResultsStore::open(&path, "m").unwrap();
        assert!(reopened.is_completed("1"));
        assert!(reopened.is_completed("2"));
        assert_eq!(reopened.result().total_tasks, 2);
        assert_eq!(reopened.result().total_samples, 2);
    }

    #[test]
    fn test_model_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.json");
        ResultsStore::open(&path, "a").unwrap().append(result("1")).unwrap();
        let err = ResultsStore::open(&path, "b").unwrap_err();
        assert!(matches!(err, StoreError::ModelMismatch { .. }));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.json");
        std::fs::write(&path, "{\"model_name\": ").unwrap();
        assert!(matches!(ResultsStore::load(&path), Err(StoreError::Json(_))));
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();
        write_json_atomic(&path, &vec![4]).unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap().replace(char::is_whitespace, ""), "[4]");
    }
}
