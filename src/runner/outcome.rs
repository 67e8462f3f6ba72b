//! Scored results of single sample attempts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SandboxError;
use crate::validators::ValidationOutcome;

/// Stage a sample attempt moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleState {
    Pending,
    Resetting,
    Applying,
    Validating,
    Scored,
}

impl fmt::Display for SampleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Resetting => write!(f, "resetting"),
            Self::Applying => write!(f, "applying"),
            Self::Validating => write!(f, "validating"),
            Self::Scored => write!(f, "scored"),
        }
    }
}

/// Why a sample was scored as failed before or outside its test verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFailure {
    /// The sandbox stayed unreachable after recovery.
    SandboxUnavailable,
    /// A command ran past its deadline.
    Timeout,
    /// The diff could not be parsed.
    PatchMalformed,
    /// The diff parsed but did not apply.
    PatchRejected,
    /// No diff in the model output.
    PatchEmpty,
    /// A validator faulted.
    ValidatorError,
    /// The model capability gave up.
    ModelUnavailable,
}

impl SampleFailure {
    /// Metric and log label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SandboxUnavailable => "sandbox_unavailable",
            Self::Timeout => "timeout",
            Self::PatchMalformed => "patch_malformed",
            Self::PatchRejected => "patch_rejected",
            Self::PatchEmpty => "patch_empty",
            Self::ValidatorError => "validator_error",
            Self::ModelUnavailable => "model_unavailable",
        }
    }

    /// Maps a sandbox fault raised during an attempt.
    pub fn from_sandbox(err: &SandboxError) -> Self {
        match err {
            SandboxError::Timeout { .. } => Self::Timeout,
            SandboxError::Unavailable(_) => Self::SandboxUnavailable,
            _ => Self::ValidatorError,
        }
    }
}

impl fmt::Display for SampleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One scored (task, sample) attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleOutcome {
    /// Ordinal of the sample within its task.
    pub index: usize,
    pub passed: bool,
    /// Whether the patch applied.
    #[serde(default)]
    pub applied: bool,
    /// Last stage entered before scoring.
    pub stage: SampleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<SampleFailure>,
    /// Verbatim failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    #[serde(default, skip_serializing_if = "ValidationOutcome::is_empty")]
    pub validations: ValidationOutcome,
    #[serde(default)]
    pub duration_ms: u64,
}

impl SampleOutcome {
    /// A failed outcome with no validation results.
    pub fn failed(
        index: usize,
        stage: SampleState,
        failure: SampleFailure,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self {
            index,
            passed: false,
            applied: false,
            stage,
            failure: Some(failure),
            diagnostic: Some(diagnostic.into()),
            validations: ValidationOutcome::new(),
            duration_ms: 0,
        }
    }

    /// Outcome for a sample the model never produced.
    pub fn model_unavailable(index: usize, reason: impl Into<String>) -> Self {
        Self::failed(index, SampleState::Pending, SampleFailure::ModelUnavailable, reason)
    }

    /// Metric label for this outcome.
    pub fn status(&self) -> &'static str {
        match (self.passed, self.failure) {
            (true, _) => "passed",
            (false, Some(failure)) => failure.label(),
            (false, None) => "failed",
        }
    }

    /// Short description used in result summaries.
    pub fn summary(&self) -> String {
        if self.passed {
            return "Clean".to_string();
        }
        if let Some(diagnostic) = self.diagnostic.as_deref().filter(|d| !d.trim().is_empty()) {
            return diagnostic.to_string();
        }
        if !self.validations.is_empty() {
            return "Test Failures".to_string();
        }
        "Failed".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::ValidationEntry;
    use std::time::Duration;

    #[test]
    fn test_failure_from_sandbox() {
        let timeout = SandboxError::Timeout {
            command: "phpunit".into(),
            after: Duration::from_secs(1),
        };
        assert_eq!(SampleFailure::from_sandbox(&timeout), SampleFailure::Timeout);
        assert_eq!(
            SampleFailure::from_sandbox(&SandboxError::Unavailable("gone".into())),
            SampleFailure::SandboxUnavailable
        );
        assert_eq!(
            SampleFailure::from_sandbox(&SandboxError::ExecFailed("x".into())),
            SampleFailure::ValidatorError
        );
    }

    #[test]
    fn test_summary() {
        let rejected = SampleOutcome::failed(
            0,
            SampleState::Applying,
            SampleFailure::PatchRejected,
            "error: patch failed: a.php:3",
        );
        assert_eq!(rejected.summary(), "error: patch failed: a.php:3");
        assert_eq!(rejected.status(), "patch_rejected");

        let mut tested = SampleOutcome {
            index: 0,
            passed: false,
            applied: true,
            stage: SampleState::Scored,
            failure: None,
            diagnostic: None,
            validations: ValidationOutcome::new(),
            duration_ms: 10,
        };
        assert_eq!(tested.summary(), "Failed");
        tested.validations.insert(
            "functional_test",
            ValidationEntry {
                passed: false,
                output: "FAILURES!".into(),
                required: true,
            },
        );
        assert_eq!(tested.summary(), "Test Failures");
        assert_eq!(tested.status(), "failed");

        tested.passed = true;
        assert_eq!(tested.summary(), "Clean");
    }

    #[test]
    fn test_serialized_shape() {
        let outcome = SampleOutcome::model_unavailable(3, "rate limited");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["failure"], "model_unavailable");
        assert_eq!(json["stage"], "pending");
        assert!(json.get("validations").is_none());

        let back: SampleOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, outcome);
    }
}
