//! Drives one (task, sample) attempt from reset to score.

use std::time::Instant;

use tracing::{debug, warn};

use super::outcome::{SampleFailure, SampleOutcome, SampleState};
use crate::catalog::Task;
use crate::execution::Sandbox;
use crate::metrics::MetricsCollector;
use crate::patch::{ApplyOutcome, PatchApplier};
use crate::validators::{SuiteReport, ValidationContext, ValidatorSuite};

/// Message recorded when a completion holds no diff.
pub const NO_DIFF_FOUND: &str = "No unified diff found in model output.";

/// Runs sample attempts against a sandbox.
///
/// Every attempt is scored exactly once; there are no retries at this
/// layer. Sandbox recovery happens inside the sandbox itself.
pub struct SampleRunner {
    applier: PatchApplier,
    suite: ValidatorSuite,
    metrics: MetricsCollector,
}

impl SampleRunner {
    pub fn new(suite: ValidatorSuite) -> Self {
        Self {
            applier: PatchApplier::new(),
            suite,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn suite(&self) -> &ValidatorSuite {
        &self.suite
    }

    /// Resets the sandbox, applies `completion` and validates the result.
    pub async fn run(
        &self,
        sandbox: &dyn Sandbox,
        task: &Task,
        index: usize,
        completion: &str,
    ) -> SampleOutcome {
        let started = Instant::now();
        let mut outcome = self.attempt(sandbox, task, index, completion).await;
        outcome.duration_ms = started.elapsed().as_millis() as u64;

        self.metrics.record_sample(outcome.status());
        if outcome.passed {
            debug!(task_id = %task.id, sample = index, "Sample passed");
        } else {
            warn!(
                task_id = %task.id,
                sample = index,
                stage = %outcome.stage,
                status = outcome.status(),
                "Sample failed"
            );
        }
        outcome
    }

    async fn attempt(
        &self,
        sandbox: &dyn Sandbox,
        task: &Task,
        index: usize,
        completion: &str,
    ) -> SampleOutcome {
        enter(task, index, SampleState::Resetting);
        if let Err(e) = sandbox.reset().await {
            return SampleOutcome::failed(
                index,
                SampleState::Resetting,
                SampleFailure::from_sandbox(&e),
                e.to_string(),
            );
        }

        enter(task, index, SampleState::Applying);
        let application = match self.applier.apply(sandbox, completion).await {
            Ok(application) => application,
            Err(e) => {
                return SampleOutcome::failed(
                    index,
                    SampleState::Applying,
                    SampleFailure::from_sandbox(&e),
                    e.to_string(),
                )
            }
        };
        let (failure, diagnostic) = match application.outcome {
            ApplyOutcome::Applied => (None, String::new()),
            ApplyOutcome::Rejected(reason) => (Some(SampleFailure::PatchRejected), reason),
            ApplyOutcome::Malformed(reason) => (Some(SampleFailure::PatchMalformed), reason),
            ApplyOutcome::Empty => (Some(SampleFailure::PatchEmpty), NO_DIFF_FOUND.to_string()),
        };
        if let Some(failure) = failure {
            return SampleOutcome::failed(index, SampleState::Applying, failure, diagnostic);
        }

        enter(task, index, SampleState::Validating);
        let ctx = ValidationContext::new(application.changed_files);
        let report = self.suite.run(sandbox, task, &ctx).await;
        let passed = report.outcome.passed();
        let (failure, diagnostic) = if passed {
            (None, None)
        } else {
            fault_of(&report)
        };

        SampleOutcome {
            index,
            passed,
            applied: true,
            stage: SampleState::Scored,
            failure,
            diagnostic,
            validations: report.outcome,
            duration_ms: 0,
        }
    }
}

fn enter(task: &Task, index: usize, state: SampleState) {
    debug!(task_id = %task.id, sample = index, state = %state, "Sample state");
}

/// Failure kind and detail for a failed validation run, if a fault caused it.
fn fault_of(report: &SuiteReport) -> (Option<SampleFailure>, Option<String>) {
    if let Some(err) = report.sandbox_fault() {
        return (Some(SampleFailure::from_sandbox(err)), Some(err.to_string()));
    }
    match report.required_faults().next() {
        Some((name, err)) => (
            Some(SampleFailure::ValidatorError),
            Some(format!("{name}: {err}")),
        ),
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::catalog::Domain;
    use crate::error::SandboxError;
    use crate::execution::memory::MemorySandbox;
    use crate::execution::ExecOutput;
    use crate::validators::{FunctionalTestValidator, ValidatorConfig, FUNCTIONAL_TEST};

    const FIX: &str = "```diff\n--- a/src/Foo.php\n+++ b/src/Foo.php\n@@ -1,2 +1,2 @@\n <?php\n-return 1;\n+return 2;\n```";

    fn runner() -> SampleRunner {
        SampleRunner::new(ValidatorSuite::with_validators(vec![Box::new(
            FunctionalTestValidator::new("phpunit", Duration::from_secs(30)),
        )]))
    }

    /// Tests pass only when the fix is present.
    fn sandbox() -> MemorySandbox {
        MemorySandbox::new()
            .with_file("src/Foo.php", "<?php\nreturn 1;\n")
            .on_command("phpunit", |_, tree| {
                let fixed = tree
                    .get("src/Foo.php")
                    .is_some_and(|b| b.as_slice() == b"<?php\nreturn 2;\n");
                Ok(ExecOutput {
                    stdout: if fixed { "OK (1 test)".into() } else { "FAILURES!".into() },
                    stderr: String::new(),
                    exit_code: if fixed { 0 } else { 1 },
                })
            })
    }

    fn task() -> Task {
        Task::new("42", "Fix Foo", "Return 2", "").with_domain(Domain::Backend)
    }

    #[tokio::test]
    async fn test_passing_sample() {
        let sb = sandbox();
        let outcome = runner().run(&sb, &task(), 0, FIX).await;
        assert!(outcome.passed);
        assert!(outcome.applied);
        assert_eq!(outcome.stage, SampleState::Scored);
        assert!(outcome.failure.is_none());
        assert!(outcome.validations.get(FUNCTIONAL_TEST).unwrap().passed);
        assert_eq!(sb.reset_count(), 1);
    }

    #[tokio::test]
    async fn test_each_attempt_starts_from_baseline() {
        let sb = sandbox();
        let runner = runner();
        sb.write("src/Leftover.php", "<?php\n");
        let first = runner.run(&sb, &task(), 0, FIX).await;
        // The same patch applies again because the tree was reset in between.
        let second = runner.run(&sb, &task(), 1, FIX).await;
        assert_eq!(first.passed, second.passed);
        assert_eq!(first.validations, second.validations);
        assert!(sb.file("src/Leftover.php").is_none());
        assert_eq!(sb.reset_count(), 2);
    }

    #[tokio::test]
    async fn test_rejected_patch_is_scored_with_verbatim_reason() {
        let sb = sandbox();
        let diff = "--- a/src/Foo.php\n+++ b/src/Foo.php\n@@ -1 +1 @@\n-nope\n+yes\n";
        let outcome = runner().run(&sb, &task(), 2, diff).await;
        assert!(!outcome.passed);
        assert_eq!(outcome.failure, Some(SampleFailure::PatchRejected));
        assert_eq!(outcome.stage, SampleState::Applying);
        assert!(outcome
            .diagnostic
            .as_deref()
            .unwrap()
            .contains("error: patch failed: src/Foo.php:1"));
        assert!(outcome.validations.is_empty());
    }

    #[tokio::test]
    async fn test_prose_only_completion_is_empty() {
        let sb = sandbox();
        let outcome = runner().run(&sb, &task(), 0, "Just change the return value.").await;
        assert_eq!(outcome.failure, Some(SampleFailure::PatchEmpty));
        assert_eq!(outcome.diagnostic.as_deref(), Some(NO_DIFF_FOUND));
    }

    #[tokio::test]
    async fn test_test_failure_has_no_failure_kind() {
        let sb = sandbox();
        let diff = "--- a/src/Foo.php\n+++ b/src/Foo.php\n@@ -1,2 +1,2 @@\n <?php\n-return 1;\n+return 3;\n";
        let outcome = runner().run(&sb, &task(), 0, diff).await;
        assert!(outcome.applied);
        assert!(!outcome.passed);
        assert!(outcome.failure.is_none());
        assert_eq!(outcome.summary(), "Test Failures");
    }

    #[tokio::test]
    async fn test_advisory_timeout_does_not_relabel_test_failure() {
        let sb = MemorySandbox::new()
            .with_file("src/Foo.php", "<?php\nreturn 1;\n")
            .with_file("recipe.yml", "name: Site\n")
            .on_command_output("phpunit", 1, "FAILURES!")
            .on_command("apply-recipe", |cmd, _| {
                Err(SandboxError::Timeout {
                    command: cmd.to_string(),
                    after: Duration::from_secs(30),
                })
            });
        let runner = SampleRunner::new(ValidatorSuite::standard(&ValidatorConfig {
            default_test_command: "phpunit".into(),
            recipe_command: "apply-recipe {recipe}".into(),
            advisory_domain_checks: true,
            ..ValidatorConfig::default()
        }));
        let task = Task::new("43", "Fix recipe", "Return 2", "").with_domain(Domain::Recipes);

        let outcome = runner.run(&sb, &task, 0, FIX).await;
        assert!(outcome.applied);
        assert!(!outcome.passed);
        assert!(!outcome.validations.get("recipe_idempotency").unwrap().passed);
        assert!(outcome.failure.is_none());
        assert!(outcome.diagnostic.is_none());
    }

    #[tokio::test]
    async fn test_reset_failure_is_sandbox_unavailable() {
        struct Down;

        #[async_trait::async_trait]
        impl Sandbox for Down {
            async fn reset(&self) -> Result<(), SandboxError> {
                Err(SandboxError::Unavailable("container drupal is gone".into()))
            }
            async fn apply_patch(&self, _: &str, _: usize) -> Result<ApplyOutcome, SandboxError> {
                unreachable!()
            }
            async fn exec(&self, _: &str, _: Duration) -> Result<ExecOutput, SandboxError> {
                unreachable!()
            }
            async fn read_file(&self, _: &str) -> Result<Vec<u8>, SandboxError> {
                unreachable!()
            }
            async fn exists(&self, _: &str) -> Result<bool, SandboxError> {
                unreachable!()
            }
        }

        let outcome = runner().run(&Down, &task(), 0, FIX).await;
        assert_eq!(outcome.failure, Some(SampleFailure::SandboxUnavailable));
        assert_eq!(outcome.stage, SampleState::Resetting);
        assert!(outcome.diagnostic.unwrap().contains("gone"));
    }

    #[tokio::test]
    async fn test_hanging_tests_are_a_timeout() {
        let sb = MemorySandbox::new()
            .with_file("src/Foo.php", "<?php\nreturn 1;\n")
            .on_command("phpunit", |cmd, _| {
                Err(SandboxError::Timeout {
                    command: cmd.to_string(),
                    after: Duration::from_secs(30),
                })
            });
        let outcome = runner().run(&sb, &task(), 0, FIX).await;
        assert!(outcome.applied);
        assert_eq!(outcome.failure, Some(SampleFailure::Timeout));
        assert!(!outcome.validations.get(FUNCTIONAL_TEST).unwrap().passed);
    }

    #[tokio::test]
    async fn test_standard_suite_runs_domain_validators() {
        let sb = sandbox();
        let runner = SampleRunner::new(ValidatorSuite::standard(&ValidatorConfig {
            default_test_command: "phpunit".into(),
            ..ValidatorConfig::default()
        }));
        let outcome = runner.run(&sb, &task(), 0, FIX).await;
        assert!(outcome.passed);
        let names: Vec<&String> = outcome.validations.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["functional_test", "backend_syntax"]);
    }
}
