use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::{read_text, ValidationContext, Validator, Verdict};
use crate::catalog::{Domain, Task};
use crate::error::ValidatorError;
use crate::execution::Sandbox;

static CACHE_CONTEXTS_RETURN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)function\s+getPersistentCacheContexts\b.*?return\s*(?:\[(.*?)\]|array\s*\((.*?)\))",
    )
    .expect("valid cache contexts regex")
});

/// Checks an access policy implementation.
///
/// Returns `(violations, warnings)`. Warnings are reported but never fail.
pub fn access_policy_findings(source: &str) -> (Vec<String>, Vec<String>) {
    let mut violations = Vec::new();
    let mut warnings = Vec::new();
    if !source.contains("AccessPolicyInterface") && !source.contains("AccessPolicyBase") {
        return (violations, warnings);
    }

    if source.contains("class ") && !source.contains("extends AccessPolicyBase") {
        warnings.push("Access policies should ideally extend AccessPolicyBase.".to_string());
    }
    if !source.contains("function calculatePermissions") {
        violations.push("Missing calculatePermissions() method.".to_string());
    }
    if !source.contains("function getPersistentCacheContexts") {
        violations.push("Missing getPersistentCacheContexts() method.".to_string());
    } else if let Some(caps) = CACHE_CONTEXTS_RETURN.captures(source) {
        let contexts = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        if contexts.trim().is_empty() {
            violations.push("getPersistentCacheContexts() returns an empty array.".to_string());
        }
    }
    (violations, warnings)
}

/// Checks access policy classes touched by the patch.
pub struct AccessPolicyValidator;

impl AccessPolicyValidator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AccessPolicyValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Validator for AccessPolicyValidator {
    fn name(&self) -> &'static str {
        "security_policy"
    }

    fn applicable(&self, task: &Task) -> bool {
        task.is_domain(Domain::Security)
    }

    async fn run(
        &self,
        sandbox: &dyn Sandbox,
        _task: &Task,
        ctx: &ValidationContext,
    ) -> Result<Verdict, ValidatorError> {
        let mut violations = BTreeMap::new();
        let mut warnings = Vec::new();
        for path in ctx.changed_with_extension(&[".php"]) {
            let Some(source) = read_text(sandbox, path).await? else {
                continue;
            };
            let (found, warned) = access_policy_findings(&source);
            if !found.is_empty() {
                violations.insert(path.to_string(), found);
            }
            warnings.extend(warned.into_iter().map(|w| format!("{path}: {w}")));
        }

        debug!(violations = violations.len(), warnings = warnings.len(), "Access policies checked");
        let mut verdict = Verdict::from_violations("Security (Access Policy)", &violations);
        for warning in warnings {
            verdict.output.push_str(&format!("\n  warning: {warning}"));
        }
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::memory::MemorySandbox;

    const GOOD: &str = r#"<?php
namespace Drupal\foo\Access;

final class FooAccessPolicy extends AccessPolicyBase {
  public function calculatePermissions(AccountInterface $account, string $scope): RefinableCalculatedPermissionsInterface {
    return parent::calculatePermissions($account, $scope);
  }

  public function getPersistentCacheContexts(): array {
    return ['user.roles'];
  }
}
"#;

    #[test]
    fn test_complete_policy_is_clean() {
        let (violations, warnings) = access_policy_findings(GOOD);
        assert!(violations.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_empty_cache_contexts() {
        let source = GOOD.replace("['user.roles']", "[]");
        let (violations, _) = access_policy_findings(&source);
        assert_eq!(violations, vec!["getPersistentCacheContexts() returns an empty array."]);

        let source = GOOD.replace("['user.roles']", "array( )");
        let (violations, _) = access_policy_findings(&source);
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn test_missing_methods_and_base_class_warning() {
        let source = "<?php\nclass Foo implements AccessPolicyInterface {}\n";
        let (violations, warnings) = access_policy_findings(source);
        assert_eq!(
            violations,
            vec![
                "Missing calculatePermissions() method.",
                "Missing getPersistentCacheContexts() method."
            ]
        );
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_unrelated_file_is_ignored() {
        let (violations, warnings) = access_policy_findings("<?php\nclass Foo {}\n");
        assert!(violations.is_empty() && warnings.is_empty());
    }

    #[tokio::test]
    async fn test_warning_alone_passes() {
        let source = GOOD.replace("extends AccessPolicyBase", "implements AccessPolicyInterface");
        let sb = MemorySandbox::new().with_file("modules/foo/src/Access/FooAccessPolicy.php", &source);
        let task = Task::new("1", "t", "p", "d").with_domain(Domain::Security);
        let ctx = ValidationContext::new(vec!["modules/foo/src/Access/FooAccessPolicy.php".into()]);
        let verdict = AccessPolicyValidator::new().run(&sb, &task, &ctx).await.unwrap();
        assert!(verdict.passed);
        assert!(verdict.output.contains("warning: modules/foo/src/Access/FooAccessPolicy.php"));
    }
}
