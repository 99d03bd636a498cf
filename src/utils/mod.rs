//! Utility module
//!
//! Logging setup and report formatting helpers

pub mod format;
pub mod logger;
