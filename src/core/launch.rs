//! Suspended launch of the root process
//!
//! The root is created suspended, made a group member, and entered into the
//! process table before it runs a single instruction. Anything it spawns is
//! therefore born inside the group, and its own exit notification always finds
//! a record waiting for it.

use crate::core::models::CommandLine;
use crate::core::process_table::{ProcessTable, TrackedProcess};
use crate::error::TrackerResult;
use crate::platform::{ProcessGroup, ProcessHandle};
use tracing::debug;

/// The launched root process.
///
/// Owns the root's handle for the whole run; it is released only after the
/// final wait in accounting.
#[derive(Debug)]
pub struct RootProcess<H> {
    pub pid: u32,
    pub handle: H,
    pub command_line: String,
}

pub fn launch<G: ProcessGroup>(
    group: &mut G,
    table: &mut ProcessTable<G::Handle>,
    command: &CommandLine,
) -> TrackerResult<RootProcess<G::Handle>> {
    let command_line = command.joined();
    let mut handle = group.spawn_suspended(command)?;
    let pid = handle.pid();
    debug!("created suspended root pid={} cmd={}", pid, command_line);

    if let Err(err) = group.assign(&handle) {
        // Never let an unassigned process run.
        handle.terminate();
        return Err(err);
    }

    // Insert before resume so a root that exits immediately is still matched.
    table.insert(pid, TrackedProcess::root(command_line.clone()));

    if let Err(err) = group.resume(&mut handle) {
        table.remove(pid);
        handle.terminate();
        return Err(err);
    }

    Ok(RootProcess {
        pid,
        handle,
        command_line,
    })
}
