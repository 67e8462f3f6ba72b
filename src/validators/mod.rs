//! Post-apply verification.
//!
//! A fixed, ordered set of validators runs after a patch applies. Each one
//! declares which tasks it applies to; non-applicable validators are left
//! out of the outcome map entirely. A validator that faults is recorded as
//! failed with the error text, never propagated.

mod backend;
mod frontend;
mod functional;
mod recipes;
mod security;

pub use backend::BackendSyntaxValidator;
pub use frontend::ComponentStructureValidator;
pub use functional::{has_failure_markers, FunctionalTestValidator};
pub use recipes::RecipeIdempotencyValidator;
pub use security::AccessPolicyValidator;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, warn};

use crate::catalog::Task;
use crate::error::{SandboxError, ValidatorError};
use crate::execution::Sandbox;

/// Persisted validator output is cut to this many bytes.
pub const MAX_OUTPUT_BYTES: usize = 4000;

/// Name of the functional test validator in outcome maps.
pub const FUNCTIONAL_TEST: &str = "functional_test";

/// Truncates to at most `max` bytes on a char boundary, appending a marker.
pub fn truncate_output(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}... [truncated]", &s[..end])
    }
}

/// What a validator decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    pub output: String,
}

impl Verdict {
    pub fn pass(output: impl Into<String>) -> Self {
        Self {
            passed: true,
            output: output.into(),
        }
    }

    pub fn fail(output: impl Into<String>) -> Self {
        Self {
            passed: false,
            output: output.into(),
        }
    }

    /// Builds the conventional report from per-file violations.
    pub fn from_violations(label: &str, violations: &BTreeMap<String, Vec<String>>) -> Self {
        if violations.is_empty() {
            return Self::pass(format!("{label} Validation Passed."));
        }
        let mut out = format!("{label} Validation Failed:\n");
        for (path, messages) in violations {
            out.push_str(&format!("  {path}:\n"));
            for m in messages {
                out.push_str(&format!("    - {m}\n"));
            }
        }
        Self::fail(out)
    }
}

/// One entry of a [`ValidationOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationEntry {
    pub passed: bool,
    pub output: String,
    /// Whether this entry counts towards the sample's `passed`.
    #[serde(skip)]
    pub required: bool,
}

/// Validator name -> result for one sample, in the order the validators ran.
///
/// Serialized as a JSON object whose keys keep that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome(Vec<(String, ValidationEntry)>);

impl ValidationOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an entry. A repeated name replaces the earlier entry in place.
    pub fn insert(&mut self, name: impl Into<String>, entry: ValidationEntry) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = entry,
            None => self.0.push((name, entry)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ValidationEntry> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ValidationEntry)> {
        self.0.iter().map(|(n, e)| (n, e))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True iff every required validator passed. An empty outcome fails.
    pub fn passed(&self) -> bool {
        !self.0.is_empty() && self.0.iter().filter(|(_, e)| e.required).all(|(_, e)| e.passed)
    }

    /// First failed required entry in run order.
    pub fn first_failure(&self) -> Option<(&str, &ValidationEntry)> {
        self.0
            .iter()
            .find(|(_, e)| e.required && !e.passed)
            .map(|(n, e)| (n.as_str(), e))
    }
}

impl Serialize for ValidationOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

impl<'de> Deserialize<'de> for ValidationOutcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OutcomeVisitor;

        impl<'de> Visitor<'de> for OutcomeVisitor {
            type Value = ValidationOutcome;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a map of validator name to result")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut outcome = ValidationOutcome::new();
                while let Some((name, entry)) = map.next_entry::<String, ValidationEntry>()? {
                    outcome.insert(name, entry);
                }
                Ok(outcome)
            }
        }

        deserializer.deserialize_map(OutcomeVisitor)
    }
}

/// Inputs a validator needs beyond the task itself.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    /// Working-tree paths touched by the applied patch.
    pub changed_files: Vec<String>,
}

impl ValidationContext {
    pub fn new(changed_files: Vec<String>) -> Self {
        Self { changed_files }
    }

    /// Changed files with one of the given extensions.
    pub fn changed_with_extension<'a>(
        &'a self,
        extensions: &'a [&'a str],
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.changed_files
            .iter()
            .map(String::as_str)
            .filter(move |p| extensions.iter().any(|ext| p.ends_with(ext)))
    }
}

/// A pluggable post-apply check.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Key in the outcome map.
    fn name(&self) -> &'static str;

    fn applicable(&self, task: &Task) -> bool;

    async fn run(
        &self,
        sandbox: &dyn Sandbox,
        task: &Task,
        ctx: &ValidationContext,
    ) -> Result<Verdict, ValidatorError>;
}

/// Reads a changed file as text. Deleted files read as `None`.
pub(crate) async fn read_text(
    sandbox: &dyn Sandbox,
    path: &str,
) -> Result<Option<String>, ValidatorError> {
    match sandbox.read_file(path).await {
        Ok(bytes) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| ValidatorError::Parse {
                file: path.to_string(),
                reason: format!("not valid UTF-8: {e}"),
            }),
        Err(SandboxError::FileNotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Settings for the standard validator set.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Test command for tasks that do not name one.
    pub default_test_command: String,
    pub test_timeout: Duration,
    /// Recipe apply command; `{recipe}` is replaced with the quoted recipe path.
    pub recipe_command: String,
    /// Command whose stdout captures the site state after a recipe run.
    pub recipe_snapshot_command: String,
    /// Domain validators are recorded but do not decide `passed`.
    pub advisory_domain_checks: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            default_test_command: "./vendor/bin/phpunit".to_string(),
            test_timeout: Duration::from_secs(600),
            recipe_command: "vendor/bin/drush recipe {recipe} --yes".to_string(),
            recipe_snapshot_command: recipes::DEFAULT_SNAPSHOT_COMMAND.to_string(),
            advisory_domain_checks: false,
        }
    }
}

/// Faults raised while running the suite, by validator name.
#[derive(Debug, Default)]
pub struct SuiteReport {
    pub outcome: ValidationOutcome,
    pub faults: Vec<(String, ValidatorError)>,
}

impl SuiteReport {
    /// Faults raised by validators that decide `passed`.
    pub fn required_faults(&self) -> impl Iterator<Item = (&str, &ValidatorError)> {
        self.faults
            .iter()
            .filter(|(name, _)| self.outcome.get(name).is_some_and(|entry| entry.required))
            .map(|(name, e)| (name.as_str(), e))
    }

    /// The first sandbox-level fault hit by a required validator.
    pub fn sandbox_fault(&self) -> Option<&SandboxError> {
        self.required_faults().find_map(|(_, e)| match e {
            ValidatorError::Sandbox(s) => Some(s),
            _ => None,
        })
    }
}

/// The fixed, ordered validator set.
pub struct ValidatorSuite {
    validators: Vec<Box<dyn Validator>>,
    advisory_domain_checks: bool,
}

impl ValidatorSuite {
    /// Functional tests, then backend, frontend, recipes and security checks.
    pub fn standard(config: &ValidatorConfig) -> Self {
        Self {
            validators: vec![
                Box::new(FunctionalTestValidator::new(
                    config.default_test_command.clone(),
                    config.test_timeout,
                )),
                Box::new(BackendSyntaxValidator::new()),
                Box::new(ComponentStructureValidator::new()),
                Box::new(RecipeIdempotencyValidator::new(
                    config.recipe_command.clone(),
                    config.recipe_snapshot_command.clone(),
                    config.test_timeout,
                )),
                Box::new(AccessPolicyValidator::new()),
            ],
            advisory_domain_checks: config.advisory_domain_checks,
        }
    }

    /// Builds a suite from explicit validators, all required.
    pub fn with_validators(validators: Vec<Box<dyn Validator>>) -> Self {
        Self {
            validators,
            advisory_domain_checks: false,
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    fn required(&self, name: &str) -> bool {
        !self.advisory_domain_checks || name == FUNCTIONAL_TEST
    }

    /// Runs every applicable validator in order.
    pub async fn run(
        &self,
        sandbox: &dyn Sandbox,
        task: &Task,
        ctx: &ValidationContext,
    ) -> SuiteReport {
        let mut report = SuiteReport::default();
        let mut unavailable: Option<String> = None;

        for validator in &self.validators {
            let name = validator.name();
            if !validator.applicable(task) {
                continue;
            }
            let required = self.required(name);

            if let Some(reason) = &unavailable {
                report.outcome.insert(
                    name,
                    ValidationEntry {
                        passed: false,
                        output: format!("Not run: {reason}"),
                        required,
                    },
                );
                continue;
            }

            let entry = match validator.run(sandbox, task, ctx).await {
                Ok(verdict) => {
                    debug!(
                        task_id = %task.id,
                        validator = name,
                        passed = verdict.passed,
                        "Validator finished"
                    );
                    ValidationEntry {
                        passed: verdict.passed,
                        output: truncate_output(&verdict.output, MAX_OUTPUT_BYTES),
                        required,
                    }
                }
                Err(e) => {
                    warn!(task_id = %task.id, validator = name, error = %e, "Validator faulted");
                    if let ValidatorError::Sandbox(s) = &e {
                        if s.is_unavailable() {
                            unavailable = Some(s.to_string());
                        }
                    }
                    let output = truncate_output(&e.to_string(), MAX_OUTPUT_BYTES);
                    report.faults.push((name.to_string(), e));
                    ValidationEntry {
                        passed: false,
                        output,
                        required,
                    }
                }
            };
            report.outcome.insert(name, entry);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Domain;
    use crate::execution::memory::MemorySandbox;

    struct Fixed {
        name: &'static str,
        result: fn() -> Result<Verdict, ValidatorError>,
        only: Option<Domain>,
    }

    #[async_trait]
    impl Validator for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn applicable(&self, task: &Task) -> bool {
            self.only.map_or(true, |d| task.is_domain(d))
        }

        async fn run(
            &self,
            _sandbox: &dyn Sandbox,
            _task: &Task,
            _ctx: &ValidationContext,
        ) -> Result<Verdict, ValidatorError> {
            (self.result)()
        }
    }

    fn task() -> Task {
        Task::new("1", "t", "p", "d").with_domain(Domain::Backend)
    }

    #[test]
    fn test_truncate_output() {
        assert_eq!(truncate_output("short", 10), "short");
        assert_eq!(truncate_output("abcdef", 3), "abc... [truncated]");
        // 'é' is two bytes; cutting at 1 must not split it.
        assert_eq!(truncate_output("éa", 1), "... [truncated]");
    }

    #[test]
    fn test_outcome_passed_requires_all_required() {
        let mut outcome = ValidationOutcome::new();
        assert!(!outcome.passed());
        outcome.insert(
            "a",
            ValidationEntry {
                passed: true,
                output: String::new(),
                required: true,
            },
        );
        outcome.insert(
            "b",
            ValidationEntry {
                passed: false,
                output: "advisory".into(),
                required: false,
            },
        );
        assert!(outcome.passed());
        assert!(outcome.first_failure().is_none());
    }

    #[test]
    fn test_outcome_serializes_as_plain_map() {
        let mut outcome = ValidationOutcome::new();
        outcome.insert(
            "functional_test",
            ValidationEntry {
                passed: true,
                output: "OK".into(),
                required: true,
            },
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"functional_test": {"passed": true, "output": "OK"}})
        );
    }

    #[test]
    fn test_outcome_keeps_run_order_through_json() {
        let mut outcome = ValidationOutcome::new();
        for name in [FUNCTIONAL_TEST, "backend_syntax", "access_policy"] {
            outcome.insert(
                name,
                ValidationEntry {
                    passed: false,
                    output: String::new(),
                    required: true,
                },
            );
        }
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.find(FUNCTIONAL_TEST) < json.find("backend_syntax"));
        assert!(json.find("backend_syntax") < json.find("access_policy"));

        let reloaded: ValidationOutcome = serde_json::from_str(&json).unwrap();
        let names: Vec<&String> = reloaded.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec![FUNCTIONAL_TEST, "backend_syntax", "access_policy"]);
    }

    #[test]
    fn test_advisory_sandbox_fault_is_not_a_sample_fault() {
        let mut report = SuiteReport::default();
        report.outcome.insert(
            FUNCTIONAL_TEST,
            ValidationEntry {
                passed: false,
                output: "FAILURES!".into(),
                required: true,
            },
        );
        report.outcome.insert(
            "recipe_idempotency",
            ValidationEntry {
                passed: false,
                output: "timed out".into(),
                required: false,
            },
        );
        report.faults.push((
            "recipe_idempotency".to_string(),
            SandboxError::Timeout {
                command: "drush recipe".into(),
                after: Duration::from_secs(1),
            }
            .into(),
        ));
        assert!(report.sandbox_fault().is_none());
        assert_eq!(report.required_faults().count(), 0);
    }

    #[tokio::test]
    async fn test_suite_omits_non_applicable_and_records_faults() {
        let suite = ValidatorSuite::with_validators(vec![
            Box::new(Fixed {
                name: "ok",
                result: || Ok(Verdict::pass("fine")),
                only: None,
            }),
            Box::new(Fixed {
                name: "frontend_only",
                result: || Ok(Verdict::pass("fine")),
                only: Some(Domain::Frontend),
            }),
            Box::new(Fixed {
                name: "broken",
                result: || {
                    Err(ValidatorError::Configuration(
                        "missing placeholder".to_string(),
                    ))
                },
                only: None,
            }),
        ]);

        let sb = MemorySandbox::new();
        let report = suite.run(&sb, &task(), &ValidationContext::default()).await;
        assert_eq!(report.outcome.len(), 2);
        assert!(report.outcome.get("frontend_only").is_none());
        let broken = report.outcome.get("broken").unwrap();
        assert!(!broken.passed);
        assert!(broken.output.contains("missing placeholder"));
        assert!(!report.outcome.passed());
        assert_eq!(report.faults.len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_sandbox_stops_later_validators() {
        let suite = ValidatorSuite::with_validators(vec![
            Box::new(Fixed {
                name: "first",
                result: || Err(SandboxError::Unavailable("container gone".into()).into()),
                only: None,
            }),
            Box::new(Fixed {
                name: "second",
                result: || Ok(Verdict::pass("never")),
                only: None,
            }),
        ]);
        let sb = MemorySandbox::new();
        let report = suite.run(&sb, &task(), &ValidationContext::default()).await;
        assert!(report.sandbox_fault().unwrap().is_unavailable());
        assert!(report.outcome.get("second").unwrap().output.starts_with("Not run"));
    }

    #[test]
    fn test_advisory_domain_checks() {
        let config = ValidatorConfig {
            advisory_domain_checks: true,
            ..ValidatorConfig::default()
        };
        let suite = ValidatorSuite::standard(&config);
        assert!(suite.required(FUNCTIONAL_TEST));
        assert!(!suite.required("backend_syntax"));
        assert_eq!(
            suite.names(),
            vec![
                "functional_test",
                "backend_syntax",
                "frontend_structure",
                "recipe_idempotency",
                "security_policy"
            ]
        );
    }

    #[test]
    fn test_verdict_from_violations() {
        let mut v = BTreeMap::new();
        assert!(Verdict::from_violations("Backend", &v).passed);
        v.insert("x.php".to_string(), vec!["bad".to_string()]);
        let verdict = Verdict::from_violations("Backend", &v);
        assert!(!verdict.passed);
        assert!(verdict.output.contains("  x.php:\n    - bad"));
    }
}
