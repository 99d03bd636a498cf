//! jobwatch library
//!
//! Launches a command suspended inside an OS process group, follows every
//! descendant through the group's notification channel, and reports wall-clock,
//! CPU, page-fault and I/O totals for the whole tree.

pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod platform;
pub mod supervisor;
pub mod utils;

// Re-export commonly used types for convenience
pub use crate::core::accounting::JobReport;
pub use crate::core::models::*;
pub use crate::core::tracker::LoopSummary;
pub use crate::error::{ErrorPhase, OsError, TrackerError, TrackerResult};
pub use crate::supervisor::{run_command, run_with_group, RunOutcome};
