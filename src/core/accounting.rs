//! Group accounting and the final report

use crate::core::launch::RootProcess;
use crate::core::models::GroupAccounting;
use crate::error::TrackerResult;
use crate::platform::{ProcessGroup, ProcessHandle};
use crate::utils::format::{friendly_bytes, seconds};
use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Everything the final report shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub elapsed: Duration,
    pub stats: GroupAccounting,
    pub root_exit_code: Option<i32>,
}

impl JobReport {
    pub fn render<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let stats = &self.stats;
        writeln!(out, "Job stats:")?;
        writeln!(out, "    Elapsed (wall) time:    {}", seconds(self.elapsed))?;
        writeln!(out, "    Total CPU time:         {}", seconds(stats.total_cpu_time()))?;
        writeln!(out, "    User CPU time:          {}", seconds(stats.user_time))?;
        writeln!(out, "    Kernel CPU time:        {}", seconds(stats.kernel_time))?;
        writeln!(out, "    Processes:              {}", stats.total_processes)?;
        if let Some(code) = self.root_exit_code {
            writeln!(out, "    Root exit code:         {}", code)?;
        }
        writeln!(out, "Memory:")?;
        writeln!(out, "    Total page faults:      {}", stats.page_faults)?;
        writeln!(out, "I/O:")?;
        for (label, counters) in [
            ("Reads: ", stats.read),
            ("Writes:", stats.write),
            ("Other: ", stats.other),
        ] {
            writeln!(
                out,
                "    {}  {:>10} ops, {:>10} bytes",
                label,
                counters.operations,
                friendly_bytes(counters.bytes)
            )?;
        }
        Ok(())
    }
}

/// Wait for the root to be fully finalized, then take the one aggregate snapshot.
///
/// `started` is the timestamp captured right before launch. The root's handle
/// is released when `root` is dropped at the end of this call.
pub fn finish<G: ProcessGroup>(
    group: &G,
    root: RootProcess<G::Handle>,
    started: Instant,
) -> TrackerResult<JobReport> {
    // The exit notification can arrive before the OS has finished the root's
    // own counters.
    root.handle.wait()?;
    let elapsed = started.elapsed();

    let stats = group.accounting()?;
    Ok(JobReport {
        elapsed,
        stats,
        root_exit_code: root.handle.exit_code(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::IoCounters;

    #[test]
    fn test_render_report() {
        let report = JobReport {
            elapsed: Duration::from_millis(2500),
            stats: GroupAccounting {
                user_time: Duration::from_millis(1200),
                kernel_time: Duration::from_millis(300),
                page_faults: 812,
                total_processes: 3,
                read: IoCounters::new(14, 3 * 1024 * 1024 / 2),
                write: IoCounters::new(2, 512),
                other: IoCounters::default(),
            },
            root_exit_code: Some(0),
        };

        let mut buf = Vec::new();
        report.render(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.starts_with("Job stats:\n"));
        assert!(text.contains("Elapsed (wall) time:         2.500 s"));
        assert!(text.contains("Total CPU time:              1.500 s"));
        assert!(text.contains("Total page faults:      812"));
        assert!(text.contains("Processes:              3"));
        assert!(text.contains("Root exit code:         0"));
        assert!(text.contains("Reads:           14 ops,     1.5 MB bytes"));
        assert!(text.contains("Writes:           2 ops,        512 bytes"));
        assert!(text.contains("Other:            0 ops,          0 bytes"));
    }

    #[test]
    fn test_render_without_exit_code() {
        let report = JobReport {
            elapsed: Duration::ZERO,
            stats: GroupAccounting::default(),
            root_exit_code: None,
        };
        let mut buf = Vec::new();
        report.render(&mut buf).unwrap();
        assert!(!String::from_utf8(buf).unwrap().contains("Root exit code"));
    }
}
