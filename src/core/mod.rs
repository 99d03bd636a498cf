//! Core tracking logic
//!
//! Suspended launch, the process table, the notification loop and the final
//! group accounting. Everything here is generic over [`crate::platform::ProcessGroup`].

pub mod accounting;
pub mod launch;
pub mod models;
pub mod process_table;
pub mod tracker;
