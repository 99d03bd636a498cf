//! Command line parsing
//!
//! Everything after the program name belongs to the tracked command, flags
//! included, so the tracker itself takes no options. A leading `--` is read as
//! the usual end-of-options marker and is not passed on.

use crate::core::models::CommandLine;
use crate::error::TrackerResult;
use clap::Parser;
use std::ffi::OsString;

/// jobwatch - run a command and report totals for its whole process tree
#[derive(Parser, Debug, Clone)]
#[command(
    name = "jobwatch",
    about = "Run a command, follow every process it spawns, and report job totals",
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct Cli {
    /// Program to run, followed by its arguments
    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        num_args = 0..
    )]
    pub command: Vec<OsString>,
}

impl Cli {
    /// Parse arguments from a custom argv (used by tests)
    pub fn try_parse_args_from<I, T>(iter: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(iter)
    }

    /// The command to track; fails with the usage message when none was given.
    pub fn command_line(&self) -> TrackerResult<CommandLine> {
        CommandLine::new(self.command.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_flags_belong_to_the_command() {
        let cli = Cli::try_parse_args_from(["jobwatch", "cargo", "build", "--release", "-j", "4"])
            .unwrap();
        let command = cli.command_line().unwrap();
        assert_eq!(command.program(), "cargo");
        assert_eq!(
            command.args(),
            &["build", "--release", "-j", "4"].map(OsString::from)[..]
        );
    }

    #[test]
    fn test_help_and_version_are_passed_through() {
        let cli = Cli::try_parse_args_from(["jobwatch", "--help"]).unwrap();
        assert_eq!(cli.command, vec![OsString::from("--help")]);

        let cli = Cli::try_parse_args_from(["jobwatch", "git", "--version"]).unwrap();
        assert_eq!(cli.command.len(), 2);
    }

    #[test]
    fn test_leading_separator_is_dropped() {
        let cli = Cli::try_parse_args_from(["jobwatch", "--", "sh", "-c", "true"]).unwrap();
        let command = cli.command_line().unwrap();
        assert_eq!(command.argv(), &["sh", "-c", "true"].map(OsString::from)[..]);

        let cli = Cli::try_parse_args_from(["jobwatch", "--"]).unwrap();
        assert!(matches!(cli.command_line(), Err(TrackerError::EmptyCommand)));
    }

    #[test]
    fn test_missing_command_is_usage_error() {
        let cli = Cli::try_parse_args_from(["jobwatch"]).unwrap();
        assert!(matches!(cli.command_line(), Err(TrackerError::EmptyCommand)));
    }
}
