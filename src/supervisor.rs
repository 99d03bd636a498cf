use crate::core::accounting::{self, JobReport};
use crate::core::launch;
use crate::core::models::CommandLine;
use crate::core::process_table::ProcessTable;
use crate::core::tracker::{self, LoopSummary};
use crate::error::TrackerResult;
use crate::platform::{NativeGroup, ProcessGroup};
use std::io::Write;
use std::time::Instant;
use tracing::debug;

/// Outcome of one supervised run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub summary: LoopSummary,
    pub report: JobReport,
}

/// Track `command` and its descendants with the platform's native group.
pub fn run_command<W: Write>(command: &CommandLine, out: &mut W) -> TrackerResult<RunOutcome> {
    let mut group = NativeGroup::create()?;
    run_with_group(&mut group, command, out)
}

/// Launch the root into `group`, follow it to completion and print the report.
///
/// The per-process lines are written as events arrive; the job report follows
/// once the root has exited and been finalized.
pub fn run_with_group<G, W>(
    group: &mut G,
    command: &CommandLine,
    out: &mut W,
) -> TrackerResult<RunOutcome>
where
    G: ProcessGroup,
    W: Write,
{
    let mut table = ProcessTable::new();

    let started = Instant::now();
    let root = launch::launch(group, &mut table, command)?;
    debug!("root pid={} running", root.pid);

    let summary = tracker::run_loop(group, &mut table, &root, out)?;
    if !summary.still_running.is_empty() {
        debug!(
            "root exited with {} members still live: {:?}",
            summary.still_running.len(),
            summary.still_running
        );
    }

    let report = accounting::finish(group, root, started)?;
    for (_, record) in table.drain() {
        record.release();
    }
    report.render(out)?;
    out.flush()?;

    Ok(RunOutcome { summary, report })
}
