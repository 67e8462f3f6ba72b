//! drupal-bench: evaluation harness for LLM-generated Drupal patches.
//!
//! Candidate patches are applied to a resettable Drupal sandbox, checked by
//! functional tests and domain validators, and scored with pass@k. Results
//! are persisted per model so interrupted runs resume where they stopped.

pub mod catalog;
pub mod cli;
pub mod error;
pub mod execution;
pub mod llm;
pub mod metrics;
pub mod patch;
pub mod pipeline;
pub mod runner;
pub mod scoring;
pub mod storage;
pub mod validators;

pub use error::{
    CatalogError, DockerError, LlmError, SandboxError, StoreError, ValidatorError,
};
