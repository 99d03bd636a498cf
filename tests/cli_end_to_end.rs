//! End-to-end tests for the jobwatch binary

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_no_command_prints_usage() {
    Command::cargo_bin("jobwatch")
        .unwrap()
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "error: No command given. Usage: jobwatch <command> [args...]",
        ));
}

#[test]
fn test_missing_program_reports_launch_error() {
    Command::cargo_bin("jobwatch")
        .unwrap()
        .arg("definitely-not-a-real-program-jobwatch")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error: Failed to create process."))
        .stderr(predicate::str::contains("Job stats:").not());
}

#[cfg(target_os = "linux")]
#[test]
fn test_tracks_shell_pipeline() {
    Command::cargo_bin("jobwatch")
        .unwrap()
        .args(["sh", "-c", "sleep 0.2; echo done"])
        .assert()
        .success()
        .stdout(predicate::str::contains("done"))
        .stderr(predicate::str::contains("new process: pid "))
        .stderr(predicate::str::contains("terminated: sh -c \"sleep 0.2; echo done\""))
        .stderr(predicate::str::contains("Job stats:"))
        .stderr(predicate::str::contains("Total page faults:"));
}

#[cfg(target_os = "linux")]
#[test]
fn test_child_failure_does_not_change_exit_status() {
    Command::cargo_bin("jobwatch")
        .unwrap()
        .args(["sh", "-c", "exit 7"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Root exit code:         7"));
}

#[cfg(target_os = "linux")]
#[test]
fn test_command_flags_are_not_parsed() {
    Command::cargo_bin("jobwatch")
        .unwrap()
        .args(["sh", "-c", "true", "--help"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Job stats:"));
}

#[cfg(windows)]
#[test]
fn test_tracks_cmd_child() {
    Command::cargo_bin("jobwatch")
        .unwrap()
        .args(["cmd", "/c", "ping -n 2 127.0.0.1 >NUL"])
        .assert()
        .success()
        .stderr(predicate::str::contains("new process: pid "))
        .stderr(predicate::str::contains("Job stats:"));
}
