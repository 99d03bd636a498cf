//! Scripted process group shared by the integration tests
//!
//! Replays a fixed list of notifications and records every call made against
//! it, so tests can assert on ordering without touching real processes.

#![allow(dead_code)]

use jobwatch::core::models::{CommandLine, EventKind, GroupAccounting, GroupEvent, IoCounters};
use jobwatch::error::{OsError, TrackerError, TrackerResult};
use jobwatch::platform::{ProcessGroup, ProcessHandle};
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

pub const ROOT_PID: u32 = 100;

pub type CallLog = Rc<RefCell<Vec<String>>>;

pub fn new_process(pid: u32) -> GroupEvent {
    GroupEvent::new_process(pid)
}

pub fn exit_process(pid: u32) -> GroupEvent {
    GroupEvent::exit_process(pid)
}

pub fn abnormal_exit(pid: u32) -> GroupEvent {
    GroupEvent {
        kind: EventKind::ExitProcess { abnormal: true },
        pid,
    }
}

pub fn other_event(message: u32, pid: u32) -> GroupEvent {
    GroupEvent {
        kind: EventKind::Other(message),
        pid,
    }
}

fn os_error() -> OsError {
    OsError::with_message(5, "Access is denied.")
}

#[derive(Debug)]
pub struct FakeHandle {
    pid: u32,
    name: String,
    peak: Option<u64>,
    exit_code: Option<i32>,
    log: CallLog,
}

impl ProcessHandle for FakeHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn image_name(&self) -> String {
        self.name.clone()
    }

    fn peak_memory(&self) -> TrackerResult<u64> {
        self.peak.ok_or_else(|| TrackerError::MemoryQuery {
            pid: self.pid,
            source: os_error(),
        })
    }

    fn wait(&self) -> TrackerResult<()> {
        self.log.borrow_mut().push(format!("wait {}", self.pid));
        Ok(())
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    fn terminate(&self) {
        self.log.borrow_mut().push(format!("terminate {}", self.pid));
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.log.borrow_mut().push(format!("close {}", self.pid));
    }
}

/// A process group whose notifications are a fixed script.
///
/// When the script runs dry, `next_event` fails like a broken channel would.
#[derive(Debug, Default)]
pub struct ScriptedGroup {
    pub log: CallLog,
    pub script: VecDeque<GroupEvent>,
    pub unopenable: HashSet<u32>,
    /// Opening these fails with an error the loop cannot recover from.
    pub channel_lost_on_open: HashSet<u32>,
    pub no_memory: HashSet<u32>,
    pub fail_assign: bool,
    pub fail_resume: bool,
    pub fail_accounting: bool,
    pub root_exit_code: Option<i32>,
    pub stats: GroupAccounting,
    opens: u32,
}

impl ScriptedGroup {
    pub fn new(script: impl IntoIterator<Item = GroupEvent>) -> Self {
        Self {
            script: script.into_iter().collect(),
            root_exit_code: Some(0),
            stats: GroupAccounting {
                user_time: Duration::from_millis(40),
                kernel_time: Duration::from_millis(10),
                page_faults: 321,
                total_processes: 2,
                read: IoCounters::new(3, 2048),
                write: IoCounters::new(1, 100),
                other: IoCounters::default(),
            },
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    fn record(&self, call: String) {
        self.log.borrow_mut().push(call);
    }
}

impl ProcessGroup for ScriptedGroup {
    type Handle = FakeHandle;

    fn spawn_suspended(&mut self, command: &CommandLine) -> TrackerResult<FakeHandle> {
        self.record(format!("spawn {}", command.joined()));
        Ok(FakeHandle {
            pid: ROOT_PID,
            name: command.joined(),
            peak: Some(4 * 1024 * 1024),
            exit_code: self.root_exit_code,
            log: self.log.clone(),
        })
    }

    fn assign(&mut self, process: &FakeHandle) -> TrackerResult<()> {
        self.record(format!("assign {}", process.pid));
        if self.fail_assign {
            return Err(TrackerError::GroupAssignment {
                pid: process.pid,
                source: os_error(),
            });
        }
        Ok(())
    }

    fn resume(&mut self, process: &mut FakeHandle) -> TrackerResult<()> {
        self.record(format!("resume {}", process.pid));
        if self.fail_resume {
            return Err(TrackerError::Resume {
                pid: process.pid,
                source: os_error(),
            });
        }
        Ok(())
    }

    fn open(&mut self, pid: u32) -> TrackerResult<FakeHandle> {
        self.record(format!("open {}", pid));
        if self.unopenable.contains(&pid) {
            return Err(TrackerError::ProcessOpen {
                pid,
                source: OsError::with_message(87, "The parameter is incorrect."),
            });
        }
        if self.channel_lost_on_open.contains(&pid) {
            return Err(TrackerError::Dequeue {
                source: OsError::with_message(6, "The handle is invalid."),
            });
        }
        self.opens += 1;
        Ok(FakeHandle {
            pid,
            name: format!("image-{}-{}", pid, self.opens),
            peak: (!self.no_memory.contains(&pid)).then_some(1024 * 1024),
            exit_code: None,
            log: self.log.clone(),
        })
    }

    fn next_event(&mut self) -> TrackerResult<GroupEvent> {
        self.script.pop_front().ok_or_else(|| TrackerError::Dequeue {
            source: OsError::with_message(735, "The I/O operation has been aborted."),
        })
    }

    fn accounting(&self) -> TrackerResult<GroupAccounting> {
        self.record("accounting".to_string());
        if self.fail_accounting {
            return Err(TrackerError::AccountingQuery {
                source: OsError::with_message(6, "The handle is invalid."),
            });
        }
        Ok(self.stats)
    }
}

pub fn command(argv: &[&str]) -> CommandLine {
    CommandLine::new(argv.iter().copied()).expect("non-empty command")
}
