//! Evaluation run configuration.
//!
//! Values come from defaults, then `BENCH_*` environment variables, then
//! command-line flags applied by the caller.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::execution::{RecoveryPolicy, SandboxSettings};
use crate::validators::ValidatorConfig;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for an evaluation run.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    // Sandbox
    /// Container name or id of the provisioned sandbox.
    pub container: String,
    /// Working tree root inside the container.
    pub workdir: String,
    /// Deadline for reset, apply and file reads.
    pub exec_timeout: Duration,
    /// Deadline for the liveness probe.
    pub probe_timeout: Duration,
    /// Recovery actions allowed per sandbox operation.
    pub max_recoveries: u32,

    // Validation
    /// Deadline for test and recipe commands.
    pub test_timeout: Duration,
    /// Test command for tasks that do not name one.
    pub test_command: String,
    /// Recipe apply command with a `{recipe}` placeholder.
    pub recipe_command: String,
    /// Command printing the site state compared across recipe runs.
    pub recipe_snapshot_command: String,
    /// Only the functional test decides `passed`.
    pub advisory_domain_checks: bool,

    // Sampling
    /// Samples requested per task.
    pub samples: usize,
    pub model: String,
    pub temperature: f64,

    // Output
    /// Results file. Defaults to `results/<model>.json`.
    pub output: Option<PathBuf>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        let sandbox = SandboxSettings::default();
        let validators = ValidatorConfig::default();
        Self {
            container: sandbox.container,
            workdir: sandbox.workdir,
            exec_timeout: sandbox.exec_timeout,
            probe_timeout: sandbox.probe_timeout,
            max_recoveries: sandbox.policy.max_recoveries,

            test_timeout: validators.test_timeout,
            test_command: validators.default_test_command,
            recipe_command: validators.recipe_command,
            recipe_snapshot_command: validators.recipe_snapshot_command,
            advisory_domain_checks: validators.advisory_domain_checks,

            samples: 5,
            model: "openai/gpt-4o".to_string(),
            temperature: 0.8,

            output: None,
        }
    }
}

impl EvalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BENCH_CONTAINER`: sandbox container (default: drupal)
    /// - `BENCH_WORKDIR`: working tree root (default: /var/www/html)
    /// - `BENCH_SAMPLES`: samples per task (default: 5)
    /// - `BENCH_EXEC_TIMEOUT_SECS`: sandbox operation timeout (default: 120)
    /// - `BENCH_TEST_TIMEOUT_SECS`: test and recipe timeout (default: 600)
    /// - `BENCH_PROBE_TIMEOUT_SECS`: liveness probe timeout (default: 5)
    /// - `BENCH_MAX_RECOVERIES`: recoveries per operation (default: 1)
    /// - `BENCH_TEST_COMMAND`: default test command (default: ./vendor/bin/phpunit)
    /// - `BENCH_RECIPE_COMMAND`: recipe apply command with `{recipe}`
    /// - `BENCH_RECIPE_SNAPSHOT_COMMAND`: site state snapshot command
    /// - `BENCH_ADVISORY_DOMAIN_CHECKS`: domain checks do not decide `passed`
    /// - `BENCH_MODEL`: model identifier
    /// - `BENCH_TEMPERATURE`: sampling temperature (default: 0.8)
    /// - `BENCH_OUTPUT`: results file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the result
    /// does not validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`EvalConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(val) = lookup("BENCH_CONTAINER") {
            config.container = val;
        }
        if let Some(val) = lookup("BENCH_WORKDIR") {
            config.workdir = val;
        }
        if let Some(val) = lookup("BENCH_SAMPLES") {
            config.samples = parse_env_value(&val, "BENCH_SAMPLES")?;
        }
        if let Some(val) = lookup("BENCH_EXEC_TIMEOUT_SECS") {
            config.exec_timeout = parse_env_secs(&val, "BENCH_EXEC_TIMEOUT_SECS")?;
        }
        if let Some(val) = lookup("BENCH_TEST_TIMEOUT_SECS") {
            config.test_timeout = parse_env_secs(&val, "BENCH_TEST_TIMEOUT_SECS")?;
        }
        if let Some(val) = lookup("BENCH_PROBE_TIMEOUT_SECS") {
            config.probe_timeout = parse_env_secs(&val, "BENCH_PROBE_TIMEOUT_SECS")?;
        }
        if let Some(val) = lookup("BENCH_MAX_RECOVERIES") {
            config.max_recoveries = parse_env_value(&val, "BENCH_MAX_RECOVERIES")?;
        }
        if let Some(val) = lookup("BENCH_TEST_COMMAND") {
            config.test_command = val;
        }
        if let Some(val) = lookup("BENCH_RECIPE_COMMAND") {
            config.recipe_command = val;
        }
        if let Some(val) = lookup("BENCH_RECIPE_SNAPSHOT_COMMAND") {
            config.recipe_snapshot_command = val;
        }
        if let Some(val) = lookup("BENCH_ADVISORY_DOMAIN_CHECKS") {
            config.advisory_domain_checks = parse_env_bool(&val, "BENCH_ADVISORY_DOMAIN_CHECKS")?;
        }
        if let Some(val) = lookup("BENCH_MODEL") {
            config.model = val;
        }
        if let Some(val) = lookup("BENCH_TEMPERATURE") {
            config.temperature = parse_env_value(&val, "BENCH_TEMPERATURE")?;
        }
        if let Some(val) = lookup("BENCH_OUTPUT") {
            config.output = Some(PathBuf::from(val));
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.samples == 0 {
            return Err(ConfigError::ValidationFailed(
                "samples must be at least 1".to_string(),
            ));
        }

        for (name, timeout) in [
            ("exec_timeout", self.exec_timeout),
            ("test_timeout", self.test_timeout),
            ("probe_timeout", self.probe_timeout),
        ] {
            if timeout.is_zero() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if self.probe_timeout >= self.exec_timeout {
            return Err(ConfigError::ValidationFailed(
                "probe_timeout must be shorter than exec_timeout".to_string(),
            ));
        }

        if self.container.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "container cannot be empty".to_string(),
            ));
        }

        if self.workdir.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "workdir cannot be empty".to_string(),
            ));
        }

        if self.test_command.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "test_command cannot be empty".to_string(),
            ));
        }

        if !self.recipe_command.contains("{recipe}") {
            return Err(ConfigError::ValidationFailed(
                "recipe_command must contain the {recipe} placeholder".to_string(),
            ));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model cannot be empty".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Results file for this run.
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            let name: String = self
                .model
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
                .collect();
            PathBuf::from("results").join(format!("{name}.json"))
        })
    }

    pub fn sandbox_settings(&self) -> SandboxSettings {
        SandboxSettings {
            container: self.container.clone(),
            workdir: self.workdir.clone(),
            exec_timeout: self.exec_timeout,
            probe_timeout: self.probe_timeout,
            policy: RecoveryPolicy {
                max_recoveries: self.max_recoveries,
            },
            ..SandboxSettings::default()
        }
    }

    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig {
            default_test_command: self.test_command.clone(),
            test_timeout: self.test_timeout,
            recipe_command: self.recipe_command.clone(),
            recipe_snapshot_command: self.recipe_snapshot_command.clone(),
            advisory_domain_checks: self.advisory_domain_checks,
        }
    }

    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

fn parse_env_secs(value: &str, key: &str) -> Result<Duration, ConfigError> {
    parse_env_value::<u64>(value, key).map(Duration::from_secs)
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
