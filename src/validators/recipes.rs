use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{ValidationContext, Validator, Verdict};
use crate::catalog::{Domain, Task};
use crate::error::ValidatorError;
use crate::execution::{shell_quote, ExecOutput, Sandbox};

/// Exports active configuration and prints it in a stable order.
pub const DEFAULT_SNAPSHOT_COMMAND: &str = "rm -rf /tmp/bench-snapshot \
&& vendor/bin/drush config:export --destination=/tmp/bench-snapshot --yes >/dev/null \
&& find /tmp/bench-snapshot -type f -name '*.yml' | sort | xargs cat";

const RECIPE_FILE: &str = "recipe.yml";
const PLACEHOLDER: &str = "{recipe}";

fn digest(output: &ExecOutput) -> String {
    hex::encode(Sha256::digest(output.stdout.as_bytes()))
}

fn failure_text(output: &ExecOutput) -> String {
    let text = output.combined();
    let text = text.trim();
    if text.is_empty() {
        format!("exit code {}", output.exit_code)
    } else {
        text.to_string()
    }
}

/// Directories from `path`'s parent up to the tree root, innermost first.
fn ancestors(path: &str) -> Vec<&str> {
    let mut dirs = Vec::new();
    let mut current = path;
    while let Some((parent, _)) = current.rsplit_once('/') {
        dirs.push(parent);
        current = parent;
    }
    dirs.push("");
    dirs
}

fn recipe_file(dir: &str) -> String {
    if dir.is_empty() {
        RECIPE_FILE.to_string()
    } else {
        format!("{dir}/{RECIPE_FILE}")
    }
}

/// Applies each changed recipe twice and requires the second run to be a no-op.
pub struct RecipeIdempotencyValidator {
    command: String,
    snapshot_command: String,
    timeout: Duration,
}

impl RecipeIdempotencyValidator {
    pub fn new(
        command: impl Into<String>,
        snapshot_command: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            snapshot_command: snapshot_command.into(),
            timeout,
        }
    }

    /// Recipe directories containing a changed file.
    async fn changed_recipes(
        &self,
        sandbox: &dyn Sandbox,
        changed: &[String],
    ) -> Result<BTreeSet<String>, ValidatorError> {
        let mut found = BTreeSet::new();
        for path in changed {
            for dir in ancestors(path) {
                if found.contains(dir) {
                    break;
                }
                if sandbox.exists(&recipe_file(dir)).await? {
                    found.insert(dir.to_string());
                    break;
                }
            }
        }
        Ok(found)
    }

    async fn snapshot(&self, sandbox: &dyn Sandbox) -> Result<String, ValidatorError> {
        let output = sandbox.exec(&self.snapshot_command, self.timeout).await?;
        if !output.success() {
            return Err(ValidatorError::Configuration(format!(
                "state snapshot failed: {}",
                failure_text(&output)
            )));
        }
        Ok(digest(&output))
    }

    async fn check(
        &self,
        sandbox: &dyn Sandbox,
        recipe: &str,
    ) -> Result<Vec<String>, ValidatorError> {
        let target = if recipe.is_empty() { "." } else { recipe };
        let command = self.command.replace(PLACEHOLDER, &shell_quote(target));

        let first = sandbox.exec(&command, self.timeout).await?;
        if !first.success() {
            return Ok(vec![format!("First application failed: {}", failure_text(&first))]);
        }
        let before = self.snapshot(sandbox).await?;

        let second = sandbox.exec(&command, self.timeout).await?;
        if !second.success() {
            return Ok(vec![format!(
                "Second application (idempotency) failed: {}",
                failure_text(&second)
            )]);
        }
        let after = self.snapshot(sandbox).await?;

        debug!(recipe = target, %before, %after, "Recipe snapshots taken");
        if before != after {
            return Ok(vec![format!(
                "Second application changed site state (snapshot {} -> {}).",
                &before[..12],
                &after[..12]
            )]);
        }
        Ok(Vec::new())
    }
}

#[async_trait]
impl Validator for RecipeIdempotencyValidator {
    fn name(&self) -> &'static str {
        "recipe_idempotency"
    }

    fn applicable(&self, task: &Task) -> bool {
        task.is_domain(Domain::Recipes)
    }

    async fn run(
        &self,
        sandbox: &dyn Sandbox,
        _task: &Task,
        ctx: &ValidationContext,
    ) -> Result<Verdict, ValidatorError> {
        if !self.command.contains(PLACEHOLDER) {
            return Err(ValidatorError::Configuration(format!(
                "recipe command has no {PLACEHOLDER} placeholder: {}",
                self.command
            )));
        }

        let recipes = self.changed_recipes(sandbox, &ctx.changed_files).await?;
        if recipes.is_empty() {
            return Ok(Verdict::pass(
                "Recipe Idempotency Validation Passed. No recipes changed.",
            ));
        }

        let mut violations = BTreeMap::new();
        for recipe in &recipes {
            let found = self.check(sandbox, recipe).await?;
            if !found.is_empty() {
                let key = if recipe.is_empty() { "." } else { recipe.as_str() };
                violations.insert(key.to_string(), found);
            }
        }
        Ok(Verdict::from_violations("Recipe Idempotency", &violations))
    }
}
