//! Applies a model completion to the sandbox.

use tracing::debug;

use crate::error::SandboxError;
use crate::execution::Sandbox;
use crate::patch::diff::{self, DiffError, FilePatch};
use crate::patch::extract::{extract_diff, normalize_prefixes};
use crate::patch::{strip_path, ApplyOutcome};

/// Strip levels tried in order.
const STRIP_LEVELS: [usize; 2] = [1, 0];

/// Outcome of an apply attempt plus what it touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchApplication {
    pub outcome: ApplyOutcome,
    /// Working-tree paths the diff touches, resolved at the strip level that applied.
    pub changed_files: Vec<String>,
    /// Strip level that applied.
    pub strip: Option<usize>,
}

impl PatchApplication {
    fn unapplied(outcome: ApplyOutcome) -> Self {
        Self {
            outcome,
            changed_files: Vec::new(),
            strip: None,
        }
    }
}

/// True when every error line of a `git apply` diagnostic is a missing file.
pub fn only_missing_files(reason: &str) -> bool {
    let errors: Vec<&str> = reason
        .lines()
        .filter(|l| l.trim_start().starts_with("error:"))
        .collect();
    !errors.is_empty()
        && errors.iter().all(|l| {
            l.contains("No such file or directory") || l.contains("does not exist in index")
        })
}

/// Working-tree paths touched by the diff at a strip level.
pub fn changed_files(files: &[FilePatch], strip: usize) -> Vec<String> {
    let mut paths: Vec<String> = files
        .iter()
        .filter_map(|f| f.target_path())
        .filter_map(|p| strip_path(p, strip))
        .collect();
    paths.sort();
    paths.dedup();
    paths
}

/// Extracts, checks and applies candidate patches.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchApplier;

impl PatchApplier {
    pub fn new() -> Self {
        Self
    }

    /// Prepares raw model output for application without touching the sandbox.
    ///
    /// Returns the normalized diff and its parsed files, or the terminal outcome.
    pub fn prepare(&self, raw: &str) -> Result<(String, Vec<FilePatch>), ApplyOutcome> {
        let Some(extracted) = extract_diff(raw) else {
            return Err(ApplyOutcome::Empty);
        };
        let normalized = normalize_prefixes(&extracted);
        match diff::parse(&normalized) {
            Ok(files) => Ok((normalized, files)),
            Err(DiffError::NoHunks) => Err(ApplyOutcome::Empty),
            Err(DiffError::Malformed(reason)) => Err(ApplyOutcome::Malformed(reason)),
        }
    }

    /// Applies raw model output, trying strip level 1 and falling back to 0
    /// when level 1 only reports missing files.
    ///
    /// Sandbox faults are returned as errors; everything about the patch
    /// itself is an [`ApplyOutcome`].
    pub async fn apply(
        &self,
        sandbox: &dyn Sandbox,
        raw: &str,
    ) -> Result<PatchApplication, SandboxError> {
        let (diff, files) = match self.prepare(raw) {
            Ok(prepared) => prepared,
            Err(outcome) => return Ok(PatchApplication::unapplied(outcome)),
        };

        let mut attempts: Vec<(usize, String)> = Vec::new();
        for strip in STRIP_LEVELS {
            match sandbox.apply_patch(&diff, strip).await? {
                ApplyOutcome::Applied => {
                    debug!(strip, files = files.len(), "Patch applied");
                    return Ok(PatchApplication {
                        outcome: ApplyOutcome::Applied,
                        changed_files: changed_files(&files, strip),
                        strip: Some(strip),
                    });
                }
                ApplyOutcome::Rejected(reason) => {
                    let retry = only_missing_files(&reason);
                    attempts.push((strip, reason));
                    if !retry {
                        break;
                    }
                    debug!(strip, "Every file missing at this strip level, trying next");
                }
                other => return Ok(PatchApplication::unapplied(other)),
            }
        }

        let reason = match attempts.as_slice() {
            [(_, only)] => only.clone(),
            _ => attempts
                .iter()
                .map(|(strip, r)| format!("-p{strip}: {r}"))
                .collect::<Vec<_>>()
                .join("\n"),
        };
        Ok(PatchApplication::unapplied(ApplyOutcome::Rejected(reason)))
    }
}
