//! Error types for drupal-bench operations.
//!
//! Defines error types for the major subsystems:
//! - Sandbox control (container runtime faults, timeouts)
//! - Task catalog loading
//! - Results persistence
//! - Domain validators
//! - LLM API interactions

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the sandbox controller.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The runtime could not be reached even after fault recovery.
    #[error("Sandbox unavailable: {0}")]
    Unavailable(String),

    /// The command ran past its deadline and was force-killed.
    #[error("Command timed out after {}s: {command}", .after.as_secs())]
    Timeout { command: String, after: Duration },

    /// The runtime accepted the call but the exec itself failed.
    #[error("Sandbox exec failed: {0}")]
    ExecFailed(String),

    #[error("File not found in sandbox: {0}")]
    FileNotFound(String),

    #[error("Invalid sandbox path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

impl SandboxError {
    /// Returns true when the error means the runtime itself is gone.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SandboxError::Unavailable(_))
    }

    /// Returns true for a command deadline overrun.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout { .. })
    }
}

/// Errors raised by the low-level container runtime client.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("Container '{id}' not found")]
    ContainerNotFound { id: String },

    #[error("Docker call failed: {0}")]
    CallFailed(String),
}

/// Errors that can occur while loading task catalogs.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Task '{0}' appears more than once across catalogs")]
    DuplicateTask(String),

    #[error("Invalid task record '{id}': {reason}")]
    InvalidTask { id: String, reason: String },

    #[error("Failed to read catalog '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog '{path}': {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that can occur while persisting evaluation results.
///
/// These are the only errors allowed to abort an evaluation run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on results file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Results file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to atomically replace '{path}': {reason}")]
    Persist { path: String, reason: String },

    #[error("Results file belongs to model '{found}', expected '{expected}'")]
    ModelMismatch { expected: String, found: String },
}

/// Errors raised by a validator's own execution (as opposed to a clean fail).
#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("Failed to parse '{file}': {reason}")]
    Parse { file: String, reason: String },

    #[error("Validator misconfigured: {0}")]
    Configuration(String),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: set OPENROUTER_API_KEY or LITELLM_API_KEY")]
    MissingApiKey,

    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_uses_seconds() {
        let err = SandboxError::Timeout {
            command: "./vendor/bin/phpunit".to_string(),
            after: Duration::from_secs(300),
        };
        assert_eq!(
            err.to_string(),
            "Command timed out after 300s: ./vendor/bin/phpunit"
        );
        assert!(err.is_timeout());
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_validator_error_wraps_sandbox_error() {
        let err: ValidatorError = SandboxError::Unavailable("container gone".to_string()).into();
        assert_eq!(err.to_string(), "Sandbox unavailable: container gone");
    }

    #[test]
    fn test_catalog_duplicate_message() {
        let err = CatalogError::DuplicateTask("3412345".to_string());
        assert!(err.to_string().contains("3412345"));
    }
}
