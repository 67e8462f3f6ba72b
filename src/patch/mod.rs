//! Turning raw model output into an applied change.
//!
//! - [`extract`]: find the diff in prose or code fences and normalize it
//! - [`diff`]: structural parsing of unified diffs
//! - [`applier`]: drive the sandbox with strip-level fallback

pub mod applier;
pub mod diff;
pub mod extract;

pub use applier::{PatchApplication, PatchApplier};
pub use diff::{parse, strip_path, DiffError, FilePatch, Hunk, HunkLine};
pub use extract::{extract_diff, normalize_prefixes};

use std::fmt;

/// Result of trying to apply a candidate patch. Only `Applied` proceeds to
/// validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The sandbox refused one or more hunks.
    Rejected(String),
    /// The diff could not be parsed.
    Malformed(String),
    /// No recognizable diff in the output.
    Empty,
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }

    /// Diagnostic text, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            ApplyOutcome::Rejected(r) | ApplyOutcome::Malformed(r) => Some(r),
            ApplyOutcome::Applied | ApplyOutcome::Empty => None,
        }
    }
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyOutcome::Applied => write!(f, "applied"),
            ApplyOutcome::Rejected(r) => write!(f, "rejected: {r}"),
            ApplyOutcome::Malformed(r) => write!(f, "malformed: {r}"),
            ApplyOutcome::Empty => write!(f, "empty"),
        }
    }
}
