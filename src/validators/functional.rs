use std::time::Duration;

use async_trait::async_trait;

use super::{ValidationContext, Validator, Verdict, FUNCTIONAL_TEST};
use crate::catalog::Task;
use crate::error::ValidatorError;
use crate::execution::Sandbox;

/// Output markers that mean the run failed even when the exit code says otherwise.
const FAILURE_MARKERS: &[&str] = &["FAILURES!", "ERRORS!", "No tests executed!", "Fatal error:"];

/// True if test output reports failures or errors.
pub fn has_failure_markers(output: &str) -> bool {
    FAILURE_MARKERS.iter().any(|m| output.contains(m))
}

/// Runs the task's test command. Always applicable.
pub struct FunctionalTestValidator {
    default_command: String,
    timeout: Duration,
}

impl FunctionalTestValidator {
    pub fn new(default_command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            default_command: default_command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Validator for FunctionalTestValidator {
    fn name(&self) -> &'static str {
        FUNCTIONAL_TEST
    }

    fn applicable(&self, _task: &Task) -> bool {
        true
    }

    async fn run(
        &self,
        sandbox: &dyn Sandbox,
        task: &Task,
        _ctx: &ValidationContext,
    ) -> Result<Verdict, ValidatorError> {
        let command = task.test_command_or(&self.default_command);
        let output = sandbox.exec(command, self.timeout).await?;
        let combined = output.combined();

        let passed = output.success() && !has_failure_markers(&combined);
        Ok(Verdict { passed, output: combined })
    }
}
