//! CLI command handling
//!
//! Argument parsing for the jobwatch binary

pub mod parser;

// Re-exports (used by main.rs)
pub use parser::*;
