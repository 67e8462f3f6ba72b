//! Command-line interface for drupal-bench.
//!
//! Provides commands for evaluating a model, verifying task catalogs,
//! rescoring results and publishing them to a leaderboard.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
