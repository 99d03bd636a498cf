//! Formatting helpers for report output

use crate::config::{GIB, KIB, MIB};
use std::ffi::OsStr;

/// Render a byte count with one decimal place in the largest fitting unit.
///
/// Counts below 1 KiB are printed as a bare integer.
pub fn friendly_bytes(n: u64) -> String {
    if n < KIB {
        format!("{n}")
    } else if n < MIB {
        format!("{:.1} KB", n as f64 / KIB as f64)
    } else if n < GIB {
        format!("{:.1} MB", n as f64 / MIB as f64)
    } else {
        format!("{:.1} GB", n as f64 / GIB as f64)
    }
}

/// Join arguments into one command line, quoting any argument containing a space.
pub fn join_command_line<S: AsRef<OsStr>>(args: &[S]) -> String {
    let mut line = String::new();
    for arg in args {
        if !line.is_empty() {
            line.push(' ');
        }
        let arg = arg.as_ref().to_string_lossy();
        if arg.contains(' ') {
            line.push('"');
            line.push_str(&arg);
            line.push('"');
        } else {
            line.push_str(&arg);
        }
    }
    line
}

/// Seconds with millisecond precision, as used in the report columns.
pub fn seconds(duration: std::time::Duration) -> String {
    format!("{:10.3} s", duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_friendly_bytes_thresholds() {
        assert_eq!(friendly_bytes(0), "0");
        assert_eq!(friendly_bytes(1023), "1023");
        assert_eq!(friendly_bytes(1024), "1.0 KB");
        assert_eq!(friendly_bytes(1536), "1.5 KB");
        assert_eq!(friendly_bytes(MIB - 1), "1024.0 KB");
        assert_eq!(friendly_bytes(MIB), "1.0 MB");
        assert_eq!(friendly_bytes(3 * MIB / 2), "1.5 MB");
        assert_eq!(friendly_bytes(GIB), "1.0 GB");
        assert_eq!(friendly_bytes(5 * GIB), "5.0 GB");
    }

    #[test]
    fn test_join_quotes_arguments_with_spaces() {
        assert_eq!(join_command_line(&["cmd", "/c", "echo hi"]), "cmd /c \"echo hi\"");
        assert_eq!(join_command_line(&["make", "-j8"]), "make -j8");
        assert_eq!(join_command_line::<&str>(&[]), "");
    }

    #[test]
    fn test_seconds_column() {
        assert_eq!(seconds(Duration::from_millis(1500)), "     1.500 s");
    }
}
