//! Result persistence.
//!
//! # Overview
//!
//! - **Results**: the persisted per-model record ([`ModelResult`], [`TaskResult`])
//! - **Store**: [`ResultsStore`], written atomically after every task so an
//!   interrupted run loses at most the task in flight
//! - **Leaderboard**: merging a model's results into the front-end's array
//!
//! # Usage
//!
//! ```rust,ignore
//! use drupal_bench::storage::{ResultsStore, TaskResult};
//!
//! let mut store = ResultsStore::open("results/gpt-4o.json", "gpt-4o")?;
//! if !store.is_completed(&task.id) {
//!     store.append(TaskResult::from_samples(&task, samples))?;
//! }
//! println!("pass@1 = {:.3}", store.result().pass_at_1);
//! ```

pub mod leaderboard;
pub mod results;
pub mod store;

pub use leaderboard::publish;
pub use results::{ModelResult, TaskResult};
pub use store::{write_json_atomic, ResultsStore};
