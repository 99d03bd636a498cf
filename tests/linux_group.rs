//! Real process trees tracked through the Linux backend

#![cfg(target_os = "linux")]

mod common;

use common::command;
use jobwatch::error::{ErrorPhase, TrackerError};
use jobwatch::supervisor::run_command;
use serial_test::serial;

fn run(argv: &[&str]) -> (jobwatch::TrackerResult<jobwatch::RunOutcome>, String) {
    let mut out = Vec::new();
    let result = run_command(&command(argv), &mut out);
    (result, String::from_utf8_lossy(&out).into_owned())
}

#[test]
#[serial]
fn test_shell_with_child_process() {
    let (result, text) = run(&["sh", "-c", "sleep 0.3; true"]);
    let outcome = result.expect("run succeeds");

    println!("{text}");
    assert!(outcome.summary.new_processes >= 1);
    assert!(outcome.summary.exits >= 2);
    assert!(outcome.report.stats.total_processes >= 2);
    assert!(outcome.report.elapsed.as_millis() >= 300);
    assert_eq!(outcome.report.root_exit_code, Some(0));

    assert!(text.contains("new process: pid "));
    assert!(text.contains("terminated: sh -c \"sleep 0.3; true\""));
    // Both the sleep and the shell get a peak line.
    assert!(text.matches("    Peak working set: ").count() >= 2, "{text}");
    let last_exit = text.rfind("terminated").unwrap();
    assert!(last_exit < text.find("Job stats:").unwrap());
}

#[test]
#[serial]
fn test_root_exit_code_is_reported() {
    let (result, text) = run(&["sh", "-c", "exit 3"]);
    let outcome = result.expect("a failing command is still a successful run");

    assert_eq!(outcome.report.root_exit_code, Some(3));
    assert!(text.contains("    Root exit code:         3\n"));
}

#[test]
#[serial]
fn test_orphan_outlives_root() {
    let (result, _text) = run(&["sh", "-c", "sleep 0.5 & exit 0"]);
    let outcome = result.expect("run succeeds");

    // The loop stops on the root's exit, not on an empty group.
    assert_eq!(outcome.summary.still_running.len(), 1);
    assert!(outcome.report.elapsed.as_millis() < 500);
}

#[test]
#[serial]
fn test_missing_program_fails_launch() {
    let (result, text) = run(&["definitely-not-a-real-program-jobwatch"]);
    let err = result.expect_err("launch fails");

    assert!(matches!(err, TrackerError::ProcessCreation { .. }));
    assert_eq!(err.phase(), ErrorPhase::Launch);
    assert_eq!(err.user_lines()[0], "error: Failed to create process.");
    assert_eq!(err.os_error().map(|os| os.code()), Some(libc::ENOENT));
    assert!(text.is_empty());
}

#[test]
#[serial]
fn test_io_is_counted_once_through_nested_shells() {
    // The writer is reaped by the inner shell, which is reaped by the root;
    // each reaper's counters already include what it waited for.
    let (result, _text) = run(&[
        "sh",
        "-c",
        "sh -c 'head -c 20000000 /dev/zero > /dev/null; sleep 0.3'; sleep 0.3",
    ]);
    let outcome = result.expect("run succeeds");
    let stats = outcome.report.stats;

    assert!(stats.total_processes >= 3);
    assert!(
        (20_000_000..20_100_000).contains(&stats.write.bytes),
        "write bytes {}",
        stats.write.bytes
    );
    assert!(stats.read.bytes >= 20_000_000, "read bytes {}", stats.read.bytes);
}
