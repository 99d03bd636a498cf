//! Core data model
//!
//! Events delivered by a process group, the aggregate counters it keeps,
//! and the command a run is asked to execute.

use crate::error::{TrackerError, TrackerResult};
use crate::utils::format::join_command_line;
use std::ffi::OsString;
use std::time::Duration;

/// Kind of a membership-change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A process joined the group.
    NewProcess,
    /// A member exited. `abnormal` is set when the OS flagged the exit as a crash.
    ExitProcess { abnormal: bool },
    /// Any other notification; carries the raw message id for diagnostics.
    Other(u32),
}

/// One notification pulled from a group's channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupEvent {
    pub kind: EventKind,
    pub pid: u32,
}

impl GroupEvent {
    pub fn new_process(pid: u32) -> Self {
        Self {
            kind: EventKind::NewProcess,
            pid,
        }
    }

    pub fn exit_process(pid: u32) -> Self {
        Self {
            kind: EventKind::ExitProcess { abnormal: false },
            pid,
        }
    }
}

/// Operation and byte counts for one class of I/O.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoCounters {
    pub operations: u64,
    pub bytes: u64,
}

impl IoCounters {
    pub fn new(operations: u64, bytes: u64) -> Self {
        Self { operations, bytes }
    }

    pub fn add(&mut self, other: IoCounters) {
        self.operations += other.operations;
        self.bytes += other.bytes;
    }
}

/// Cumulative counters over every process that was ever a group member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupAccounting {
    pub user_time: Duration,
    pub kernel_time: Duration,
    pub page_faults: u64,
    pub total_processes: u64,
    pub read: IoCounters,
    pub write: IoCounters,
    pub other: IoCounters,
}

impl GroupAccounting {
    pub fn total_cpu_time(&self) -> Duration {
        self.user_time + self.kernel_time
    }
}

/// The command a run executes: program plus arguments, as given on the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    argv: Vec<OsString>,
}

impl CommandLine {
    pub fn new<I, S>(argv: I) -> TrackerResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let argv: Vec<OsString> = argv.into_iter().map(Into::into).collect();
        if argv.first().map_or(true, |program| program.is_empty()) {
            return Err(TrackerError::EmptyCommand);
        }
        Ok(Self { argv })
    }

    pub fn program(&self) -> &OsString {
        &self.argv[0]
    }

    pub fn args(&self) -> &[OsString] {
        &self.argv[1..]
    }

    pub fn argv(&self) -> &[OsString] {
        &self.argv
    }

    /// Single-string form: arguments re-joined, quoting those containing a space.
    pub fn joined(&self) -> String {
        join_command_line(&self.argv)
    }
}
