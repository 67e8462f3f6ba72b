//! Task catalog loading.
//!
//! A catalog is a JSON array of task records. The evaluation set is the
//! union of the real-issue catalog and the synthetic catalog; identifiers
//! must be unique across both.

mod task;

pub use task::{Domain, Provenance, Task};

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info};

use crate::error::CatalogError;
use task::TaskRecord;

/// Ordered, duplicate-free collection of tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskCatalog {
    tasks: Vec<Task>,
    ids: HashSet<String>,
}

impl TaskCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from already-constructed tasks, rejecting duplicates.
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        for task in tasks {
            catalog.push(task)?;
        }
        Ok(catalog)
    }

    /// Parses a catalog from a JSON string.
    pub fn from_json(
        json: &str,
        provenance: Provenance,
        origin: &str,
    ) -> Result<Self, CatalogError> {
        let records: Vec<TaskRecord> =
            serde_json::from_str(json).map_err(|source| CatalogError::Json {
                path: origin.to_string(),
                source,
            })?;

        let mut catalog = Self::new();
        for record in records {
            catalog.push(record.into_task(provenance)?)?;
        }
        Ok(catalog)
    }

    /// Loads a catalog file.
    pub fn load(path: &Path, provenance: Provenance) -> Result<Self, CatalogError> {
        let origin = path.display().to_string();
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: origin.clone(),
            source,
        })?;
        let catalog = Self::from_json(&json, provenance, &origin)?;
        info!(
            path = %origin,
            provenance = %provenance,
            tasks = catalog.len(),
            "Loaded task catalog"
        );
        Ok(catalog)
    }

    /// Loads and merges real and synthetic catalog files, in that order.
    pub fn load_all(real: &[impl AsRef<Path>], synthetic: &[impl AsRef<Path>]) -> Result<Self, CatalogError> {
        let mut merged = Self::new();
        for path in real {
            merged.merge(Self::load(path.as_ref(), Provenance::Real)?)?;
        }
        for path in synthetic {
            merged.merge(Self::load(path.as_ref(), Provenance::Synthetic)?)?;
        }
        Ok(merged)
    }

    /// Appends a task, failing if its identifier is already present.
    pub fn push(&mut self, task: Task) -> Result<(), CatalogError> {
        if !self.ids.insert(task.id.clone()) {
            return Err(CatalogError::DuplicateTask(task.id));
        }
        self.tasks.push(task);
        Ok(())
    }

    /// Appends every task of `other`, preserving order.
    pub fn merge(&mut self, other: TaskCatalog) -> Result<(), CatalogError> {
        for task in other.tasks {
            self.push(task)?;
        }
        Ok(())
    }

    /// Restricts the catalog to the task with the given identifier.
    pub fn select(&self, task_id: &str) -> Option<TaskCatalog> {
        let task = self.get(task_id)?.clone();
        debug!(task_id, "Selected single task");
        Some(TaskCatalog {
            ids: HashSet::from([task.id.clone()]),
            tasks: vec![task],
        })
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Serializes tasks back into the on-disk record shape.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let records: Vec<TaskRecord> = self.tasks.iter().map(TaskRecord::from).collect();
        serde_json::to_string_pretty(&records)
    }
}

impl<'a> IntoIterator for &'a TaskCatalog {
    type Item = &'a Task;
    type IntoIter = std::slice::Iter<'a, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.iter()
    }
}
