use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::{read_text, ValidationContext, Validator, Verdict};
use crate::catalog::{Domain, Task};
use crate::error::ValidatorError;
use crate::execution::Sandbox;

const PHP_EXTENSIONS: &[&str] = &[".php", ".module", ".inc", ".install", ".theme"];

/// Plugin annotations that have attribute replacements.
const LEGACY_ANNOTATIONS: &[&str] = &[
    "Block",
    "ContentEntityType",
    "ConfigEntityType",
    "Action",
    "Condition",
    "Constraint",
    "FieldFormatter",
    "FieldType",
    "FieldWidget",
    "Filter",
    "MigrateSource",
    "MigrateProcess",
    "MigrateDestination",
    "RestResource",
    "QueueWorker",
    "EntityType",
];

static DATA_PROVIDER_ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@dataProvider\s+\w+").expect("valid dataProvider regex"));

static DEPENDS_ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@depends\s+\w+").expect("valid depends regex"));

static EXPECT_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$this->expectError\(").expect("valid expectError regex"));

static PROVIDER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"#\[DataProvider\(\s*['"](\w+)['"]\s*\)\]|@dataProvider\s+(\w+)"#)
        .expect("valid provider name regex")
});

static LEGACY_ANNOTATION: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    LEGACY_ANNOTATIONS
        .iter()
        .map(|name| {
            let re = Regex::new(&format!(r"\*\s+@{name}\b")).expect("valid annotation regex");
            (*name, re)
        })
        .collect()
});

/// Checks PHP sources for constructs PHPUnit 10 and Drupal 11 reject.
pub fn php_violations(source: &str) -> Vec<String> {
    let mut out = Vec::new();

    if DATA_PROVIDER_ANNOTATION.is_match(source) {
        out.push(
            "Use #[DataProvider('methodName')] attribute instead of @dataProvider annotation."
                .to_string(),
        );
    }
    if DEPENDS_ANNOTATION.is_match(source) {
        out.push("Use #[Depends('methodName')] attribute instead of @depends annotation.".to_string());
    }
    if EXPECT_ERROR.is_match(source) {
        out.push(
            "expectError() is deprecated in PHPUnit 10. Use expectException() or attributes."
                .to_string(),
        );
    }

    let providers: BTreeSet<&str> = PROVIDER_NAME
        .captures_iter(source)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str())
        .collect();
    for provider in providers {
        let declared = Regex::new(&format!(r"public\s+function\s+{provider}\s*\("))
            .map(|re| re.is_match(source))
            .unwrap_or(false);
        let is_static = Regex::new(&format!(r"public\s+static\s+function\s+{provider}\b"))
            .map(|re| re.is_match(source))
            .unwrap_or(false);
        if declared && !is_static {
            out.push(format!(
                "Data provider method '{provider}' must be static in PHPUnit 10."
            ));
        }
    }

    for (name, re) in LEGACY_ANNOTATION.iter() {
        if re.is_match(source) {
            out.push(format!("Use #[{name}] attribute instead of @{name} annotation."));
        }
    }

    out
}

/// Flags deprecated PHPUnit and plugin-annotation usage in changed PHP files.
pub struct BackendSyntaxValidator;

impl BackendSyntaxValidator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BackendSyntaxValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Validator for BackendSyntaxValidator {
    fn name(&self) -> &'static str {
        "backend_syntax"
    }

    fn applicable(&self, task: &Task) -> bool {
        task.is_domain(Domain::Backend)
    }

    async fn run(
        &self,
        sandbox: &dyn Sandbox,
        _task: &Task,
        ctx: &ValidationContext,
    ) -> Result<Verdict, ValidatorError> {
        let mut violations = BTreeMap::new();
        for path in ctx.changed_with_extension(PHP_EXTENSIONS) {
            let Some(source) = read_text(sandbox, path).await? else {
                continue;
            };
            let found = php_violations(&source);
            if !found.is_empty() {
                violations.insert(path.to_string(), found);
            }
        }
        Ok(Verdict::from_violations("Backend", &violations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::memory::MemorySandbox;

    const LEGACY_TEST: &str = r#"<?php
class FooTest extends UnitTestCase {
  /**
   * @dataProvider providerFoo
   */
  public function testFoo($a) {
    $this->expectError(\Exception::class);
  }

  public function providerFoo() {
    return [[1]];
  }
}
"#;

    const MODERN_TEST: &str = r#"<?php
use PHPUnit\Framework\Attributes\DataProvider;

class FooTest extends UnitTestCase {
  #[DataProvider('providerFoo')]
  public function testFoo($a) {}

  public static function providerFoo(): array {
    return [[1]];
  }
}
"#;

    #[test]
    fn test_legacy_phpunit_is_flagged() {
        let found = php_violations(LEGACY_TEST);
        assert!(found.iter().any(|m| m.contains("#[DataProvider('methodName')]")));
        assert!(found.iter().any(|m| m.starts_with("expectError()")));
        assert!(found
            .iter()
            .any(|m| m == "Data provider method 'providerFoo' must be static in PHPUnit 10."));
    }

    #[test]
    fn test_modern_phpunit_is_clean() {
        assert!(php_violations(MODERN_TEST).is_empty());
    }

    #[test]
    fn test_attribute_provider_must_still_be_static() {
        let source = "#[DataProvider('cases')]\npublic function testX() {}\npublic function cases() {}\n";
        assert_eq!(
            php_violations(source),
            vec!["Data provider method 'cases' must be static in PHPUnit 10."]
        );
    }

    #[test]
    fn test_plugin_annotations() {
        let source = "/**\n * @Block(\n *   id = \"x\"\n * )\n */\nclass X {}\n";
        assert_eq!(
            php_violations(source),
            vec!["Use #[Block] attribute instead of @Block annotation."]
        );
        // A prefix of another annotation name must not match.
        let source = "/**\n * @FilterFormat(id = \"x\")\n */\n";
        assert!(php_violations(source).is_empty());
    }

    #[tokio::test]
    async fn test_only_changed_php_files_are_scanned() {
        let sb = MemorySandbox::new()
            .with_file("modules/foo/tests/src/Unit/FooTest.php", LEGACY_TEST)
            .with_file("modules/foo/src/Plugin/Block/Bar.php", MODERN_TEST)
            .with_file("modules/foo/README.md", "@dataProvider x");
        let task = Task::new("1", "t", "p", "d").with_domain(Domain::Backend);
        let ctx = ValidationContext::new(vec![
            "modules/foo/src/Plugin/Block/Bar.php".to_string(),
            "modules/foo/README.md".to_string(),
            "modules/foo/deleted.module".to_string(),
        ]);

        let verdict = BackendSyntaxValidator::new().run(&sb, &task, &ctx).await.unwrap();
        assert!(verdict.passed);
        assert_eq!(verdict.output, "Backend Validation Passed.");

        let ctx = ValidationContext::new(vec!["modules/foo/tests/src/Unit/FooTest.php".into()]);
        let verdict = BackendSyntaxValidator::new().run(&sb, &task, &ctx).await.unwrap();
        assert!(!verdict.passed);
        assert!(verdict
            .output
            .starts_with("Backend Validation Failed:\n  modules/foo/tests/src/Unit/FooTest.php:\n"));
    }

    #[test]
    fn test_applicability() {
        let v = BackendSyntaxValidator::new();
        assert!(v.applicable(&Task::new("1", "t", "p", "d").with_domain(Domain::Backend)));
        assert!(!v.applicable(&Task::new("1", "t", "p", "d").with_domain(Domain::Frontend)));
        assert!(!v.applicable(&Task::new("1", "t", "p", "d")));
    }
}
