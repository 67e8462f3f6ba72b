//! Per-sample evaluation.
//!
//! # Architecture
//!
//! ```text
//! Pending → Resetting → Applying → Validating → Scored
//!              │            │           │
//!              └────────────┴───────────┴──> Scored (failed, with SampleFailure)
//! ```
//!
//! A [`SampleRunner`] scores each attempt exactly once. Faults from the
//! sandbox, the patch or a validator become a [`SampleOutcome`] with a
//! [`SampleFailure`] kind and the verbatim diagnostic; nothing escapes.
//!
//! # Example
//!
//! ```ignore
//! use drupal_bench::runner::SampleRunner;
//! use drupal_bench::validators::{ValidatorConfig, ValidatorSuite};
//!
//! let runner = SampleRunner::new(ValidatorSuite::standard(&ValidatorConfig::default()));
//! let outcome = runner.run(&sandbox, &task, 0, &completion).await;
//! println!("{}: {}", outcome.status(), outcome.summary());
//! ```

pub mod outcome;
pub mod sample;

pub use outcome::{SampleFailure, SampleOutcome, SampleState};
pub use sample::{SampleRunner, NO_DIFF_FOUND};
