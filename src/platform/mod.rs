//! OS process-group primitives
//!
//! A [`ProcessGroup`] contains a dynamic set of processes, keeps them from
//! leaving, and reports membership changes as [`GroupEvent`]s.
//!
//! Platform strategy:
//! - Windows: a job object bound to an I/O completion port
//! - Linux: a child subreaper plus process-group-wide polling of /proc

use crate::core::models::{CommandLine, GroupAccounting, GroupEvent};
use crate::error::TrackerResult;

#[cfg(target_os = "linux")]
pub mod unix;
#[cfg(windows)]
pub mod windows;

#[cfg(target_os = "linux")]
pub use unix::ReaperGroup as NativeGroup;
#[cfg(windows)]
pub use windows::JobGroup as NativeGroup;

#[cfg(all(unix, not(target_os = "linux")))]
compile_error!("jobwatch needs /proc and PR_SET_CHILD_SUBREAPER; only Linux and Windows are supported");

/// An owned handle to one process with query rights.
///
/// Dropping the handle releases it.
pub trait ProcessHandle {
    fn pid(&self) -> u32;

    /// Best-effort image path; empty when the lookup fails.
    fn image_name(&self) -> String;

    /// Peak working set / resident set size in bytes.
    fn peak_memory(&self) -> TrackerResult<u64>;

    /// Block until the process has exited and its counters are final.
    fn wait(&self) -> TrackerResult<()>;

    /// Exit status, once the process has exited.
    fn exit_code(&self) -> Option<i32>;

    /// Best-effort kill, used when a launch is abandoned.
    fn terminate(&self);
}

/// A process group with a bound notification channel.
pub trait ProcessGroup {
    type Handle: ProcessHandle;

    /// Create the process without letting it execute any instruction.
    fn spawn_suspended(&mut self, command: &CommandLine) -> TrackerResult<Self::Handle>;

    /// Make a suspended process a member of the group.
    fn assign(&mut self, process: &Self::Handle) -> TrackerResult<()>;

    /// Let a suspended, assigned process run.
    fn resume(&mut self, process: &mut Self::Handle) -> TrackerResult<()>;

    /// Open a query handle to a process announced by the group.
    fn open(&mut self, pid: u32) -> TrackerResult<Self::Handle>;

    /// Block until the next membership notification.
    fn next_event(&mut self) -> TrackerResult<GroupEvent>;

    /// Cumulative counters over every process that was ever a member.
    fn accounting(&self) -> TrackerResult<GroupAccounting>;
}
