//! Task records as consumed by the evaluation harness.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// Domain tag that scopes which structural validators apply to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Backend,
    Frontend,
    #[serde(alias = "recipe")]
    Recipes,
    Security,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend => write!(f, "backend"),
            Self::Frontend => write!(f, "frontend"),
            Self::Recipes => write!(f, "recipes"),
            Self::Security => write!(f, "security"),
        }
    }
}

/// Where a task came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Mined from a real upstream issue and its merged fix.
    Real,
    /// Generated from a change record.
    Synthetic,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real => write!(f, "real"),
            Self::Synthetic => write!(f, "synthetic"),
        }
    }
}

/// An immutable, validated engineering task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    /// Identifier, unique across the real and synthetic catalogs.
    pub id: String,
    pub title: String,
    /// Problem statement handed to the model.
    pub prompt: String,
    /// Reference fix. Used to build validated catalogs, never at scoring time.
    pub ground_truth: String,
    /// Test command override; the configured default applies when absent.
    pub test_command: Option<String>,
    pub domain: Option<Domain>,
    pub provenance: Provenance,
    /// Core version the issue was filed against.
    pub version: Option<String>,
    /// Upstream issue, merge request or change record.
    pub url: Option<String>,
}

impl Task {
    /// Creates a task with the required fields and no optional metadata.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        prompt: impl Into<String>,
        ground_truth: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            prompt: prompt.into(),
            ground_truth: ground_truth.into(),
            test_command: None,
            domain: None,
            provenance: Provenance::Real,
            version: None,
            url: None,
        }
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn with_test_command(mut self, command: impl Into<String>) -> Self {
        self.test_command = Some(command.into());
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    /// Returns true if the task carries the given domain tag.
    pub fn is_domain(&self, domain: Domain) -> bool {
        self.domain == Some(domain)
    }

    /// Resolves the test command, falling back to `default`.
    pub fn test_command_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.test_command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(default)
    }
}

/// Identifiers are numeric node ids for mined issues and strings for
/// synthetic tasks; both normalise to a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawTaskId {
    Number(u64),
    Text(String),
}

impl RawTaskId {
    fn into_string(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.trim().to_string(),
        }
    }
}

/// On-disk shape of a catalog entry. Unknown fields are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TaskRecord {
    task_id: RawTaskId,
    title: String,
    prompt: String,
    ground_truth: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    test_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    domain: Option<Domain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mr_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_url: Option<String>,
    /// Written by merged catalog output; takes precedence over the loader's
    /// provenance on reload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provenance: Option<Provenance>,
}

impl From<&Task> for TaskRecord {
    fn from(task: &Task) -> Self {
        Self {
            task_id: RawTaskId::Text(task.id.clone()),
            title: task.title.clone(),
            prompt: task.prompt.clone(),
            ground_truth: task.ground_truth.clone(),
            test_command: task.test_command.clone(),
            domain: task.domain,
            version: task.version.clone(),
            mr_id: None,
            url: task.url.clone(),
            source_url: None,
            provenance: Some(task.provenance),
        }
    }
}

impl TaskRecord {
    /// Validates the record and converts it into a [`Task`].
    pub(crate) fn into_task(self, provenance: Provenance) -> Result<Task, CatalogError> {
        let id = self.task_id.into_string();
        let invalid = |reason: &str| CatalogError::InvalidTask {
            id: id.clone(),
            reason: reason.to_string(),
        };

        if id.is_empty() {
            return Err(invalid("task_id is empty"));
        }
        if self.title.trim().is_empty() {
            return Err(invalid("title is empty"));
        }
        if self.prompt.trim().is_empty() {
            return Err(invalid("prompt is empty"));
        }
        if self.ground_truth.trim().is_empty() {
            return Err(invalid("ground_truth is empty"));
        }

        let url = self.url.or(self.source_url).or_else(|| {
            self.mr_id.map(|iid| {
                format!("https://git.drupalcode.org/project/drupal/-/merge_requests/{iid}")
            })
        });

        Ok(Task {
            id,
            title: self.title.trim().to_string(),
            prompt: self.prompt,
            ground_truth: self.ground_truth,
            test_command: self.test_command,
            domain: self.domain,
            provenance: self.provenance.unwrap_or(provenance),
            version: self.version,
            url,
        })
    }
}
