//! Notification loop
//!
//! Drains the group's channel one event at a time and keeps the process table
//! in step with it. The loop is the only mutator of the table once the root has
//! been launched, so no locking is involved.
//!
//! The loop finishes when, and only when, the root's exit notification has been
//! handled. Descendants may still be alive at that point, and an empty table is
//! not a signal of anything.

use crate::core::launch::RootProcess;
use crate::core::models::{EventKind, GroupEvent};
use crate::core::process_table::{ProcessTable, TrackedHandle, TrackedProcess};
use crate::error::TrackerResult;
use crate::platform::{ProcessGroup, ProcessHandle};
use crate::utils::format::friendly_bytes;
use std::io::Write;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Running,
    Done,
}

/// What the loop observed, returned once the root has exited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub new_processes: usize,
    pub exits: usize,
    pub unknown_exits: usize,
    pub open_failures: usize,
    pub ignored_events: usize,
    /// Members still in the table when the root exited.
    pub still_running: Vec<u32>,
}

/// Run until the root's exit notification has been handled.
pub fn run_loop<G, W>(
    group: &mut G,
    table: &mut ProcessTable<G::Handle>,
    root: &RootProcess<G::Handle>,
    out: &mut W,
) -> TrackerResult<LoopSummary>
where
    G: ProcessGroup,
    W: Write,
{
    let mut summary = LoopSummary::default();
    let mut state = LoopState::Running;

    while state == LoopState::Running {
        let event = group.next_event()?;
        state = handle_event(group, table, root, out, &mut summary, event)?;
    }

    summary.still_running = table.pids();
    Ok(summary)
}

fn handle_event<G, W>(
    group: &mut G,
    table: &mut ProcessTable<G::Handle>,
    root: &RootProcess<G::Handle>,
    out: &mut W,
    summary: &mut LoopSummary,
    event: GroupEvent,
) -> TrackerResult<LoopState>
where
    G: ProcessGroup,
    W: Write,
{
    let pid = event.pid;
    match event.kind {
        EventKind::NewProcess if pid == root.pid => {
            debug!("new-process notification for root pid {}", pid);
        }
        EventKind::NewProcess => {
            summary.new_processes += 1;
            let record = match group.open(pid) {
                Ok(handle) => {
                    let name = handle.image_name();
                    writeln!(out, "new process: pid {} ({})", pid, name)?;
                    TrackedProcess::owned(handle, name)
                }
                Err(err) if err.is_recoverable() => {
                    // Usually the process already exited between the
                    // notification and the open attempt.
                    warn!("failed to open process {}: {}", pid, err);
                    summary.open_failures += 1;
                    TrackedProcess::untracked()
                }
                Err(err) => return Err(err),
            };
            if let Some(stale) = table.insert(pid, record) {
                warn!("replaced stale record for process {} ({})", pid, stale.name);
                stale.release();
            }
        }
        EventKind::ExitProcess { abnormal } => {
            match table.remove(pid) {
                Some(record) => {
                    summary.exits += 1;
                    report_exit(out, root, pid, &record, abnormal)?;
                    record.release();
                }
                None => {
                    warn!("did not find process {} in active process table", pid);
                    summary.unknown_exits += 1;
                }
            }
            if pid == root.pid {
                return Ok(LoopState::Done);
            }
        }
        EventKind::Other(message) => {
            debug!("ignoring group notification {} for pid {}", message, pid);
            summary.ignored_events += 1;
        }
    }
    Ok(LoopState::Running)
}

fn report_exit<H, W>(
    out: &mut W,
    root: &RootProcess<H>,
    pid: u32,
    record: &TrackedProcess<H>,
    abnormal: bool,
) -> TrackerResult<()>
where
    H: ProcessHandle,
    W: Write,
{
    let handle = match &record.handle {
        TrackedHandle::Owned(handle) => handle,
        TrackedHandle::Root => &root.handle,
        TrackedHandle::Untracked => {
            debug!("untracked process {} exited", pid);
            writeln!(out, "pid {} terminated (not tracked)", pid)?;
            return Ok(());
        }
    };

    let how = if abnormal { "terminated abnormally" } else { "terminated" };
    writeln!(out, "pid {} {}: {}", pid, how, record.name)?;

    match handle.peak_memory() {
        Ok(peak) => writeln!(out, "    Peak working set: {}", friendly_bytes(peak))?,
        Err(err) if err.is_recoverable() => warn!(
            "{} {}",
            err,
            err.os_error().map(ToString::to_string).unwrap_or_default()
        ),
        Err(err) => return Err(err),
    }
    writeln!(
        out,
        "    Lifetime:         {:.3} s",
        record.started.elapsed().as_secs_f64()
    )?;
    Ok(())
}
