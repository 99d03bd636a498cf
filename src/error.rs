//! Unified error handling for jobwatch
//!
//! Every fatal condition carries the OS error that caused it, so the binary
//! can print a one-line context message followed by the OS's own text.

use std::fmt;
use std::io;
use thiserror::Error;

/// An OS error code together with the text the OS supplied for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsError {
    code: i32,
    message: Option<String>,
}

impl OsError {
    /// Build an error from a raw code, resolving its text through the OS.
    pub fn from_code(code: i32) -> Self {
        Self {
            code,
            message: resolve_message(code),
        }
    }

    /// Build an error whose text is already known.
    pub fn with_message(code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = message.trim();
        Self {
            code,
            message: (!message.is_empty()).then(|| message.to_string()),
        }
    }

    /// The error of the last failed system call on this thread.
    #[cfg(unix)]
    pub fn last() -> Self {
        nix::errno::Errno::last().into()
    }

    /// The error of the last failed system call on this thread.
    #[cfg(windows)]
    pub fn last() -> Self {
        windows::core::Error::from_win32().into()
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => f.write_str(message),
            None => write!(f, "Unknown error: {}", self.code),
        }
    }
}

impl std::error::Error for OsError {}

#[cfg(unix)]
fn resolve_message(code: i32) -> Option<String> {
    use nix::errno::Errno;

    match Errno::from_raw(code) {
        Errno::UnknownErrno => None,
        errno => Some(errno.desc().to_string()),
    }
}

#[cfg(windows)]
fn resolve_message(code: i32) -> Option<String> {
    use windows::core::HRESULT;

    let message = windows::core::Error::from(HRESULT::from_win32(code as u32))
        .message()
        .to_string();
    let message = message.trim();
    (!message.is_empty()).then(|| message.to_string())
}

#[cfg(unix)]
impl From<nix::errno::Errno> for OsError {
    fn from(errno: nix::errno::Errno) -> Self {
        Self::from_code(errno as i32)
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for OsError {
    fn from(err: windows::core::Error) -> Self {
        Self::with_message(win32_code(err.code().0), err.message().to_string())
    }
}

const FACILITY_WIN32: u32 = 7;

/// Recover the Win32 error code wrapped in an HRESULT. Any other HRESULT is
/// kept whole.
#[cfg_attr(not(windows), allow(dead_code))]
fn win32_code(hresult: i32) -> i32 {
    let bits = hresult as u32;
    if (bits >> 16) & 0x1FFF == FACILITY_WIN32 {
        (bits & 0xFFFF) as i32
    } else {
        hresult
    }
}

/// Where in the run an error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPhase {
    /// One-time setup before the root runs.
    Launch,
    /// Inside the notification loop.
    Loop,
    /// Final wait and aggregate query.
    Shutdown,
}

/// Main error type for the tracker
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("No command given. Usage: jobwatch <command> [args...]")]
    EmptyCommand,

    #[error("Failed to create process group.")]
    GroupCreation { source: OsError },

    #[error("Failed to create notification channel.")]
    ChannelCreation { source: OsError },

    #[error("Failed to associate notification channel to process group.")]
    ChannelAssociation { source: OsError },

    #[error("Failed to create process.")]
    ProcessCreation { source: OsError },

    #[error("Failed to assign process {pid} to group.")]
    GroupAssignment { pid: u32, source: OsError },

    #[error("Failed to resume process {pid}.")]
    Resume { pid: u32, source: OsError },

    #[error("Failed to dequeue event from notification channel.")]
    Dequeue { source: OsError },

    #[error("Failed to open process {pid}.")]
    ProcessOpen { pid: u32, source: OsError },

    #[error("Failed to get process memory info for process {pid}.")]
    MemoryQuery { pid: u32, source: OsError },

    #[error("Failed to wait for root process {pid}.")]
    RootWait { pid: u32, source: OsError },

    #[error("Failed to query information from process group.")]
    AccountingQuery { source: OsError },

    #[error("Failed to write report: {0}")]
    Output(#[from] io::Error),
}

impl TrackerError {
    /// Get the phase of the run the error belongs to
    pub fn phase(&self) -> ErrorPhase {
        match self {
            TrackerError::EmptyCommand
            | TrackerError::GroupCreation { .. }
            | TrackerError::ChannelCreation { .. }
            | TrackerError::ChannelAssociation { .. }
            | TrackerError::ProcessCreation { .. }
            | TrackerError::GroupAssignment { .. }
            | TrackerError::Resume { .. } => ErrorPhase::Launch,
            TrackerError::Dequeue { .. }
            | TrackerError::ProcessOpen { .. }
            | TrackerError::MemoryQuery { .. } => ErrorPhase::Loop,
            TrackerError::RootWait { .. }
            | TrackerError::AccountingQuery { .. }
            | TrackerError::Output(_) => ErrorPhase::Shutdown,
        }
    }

    /// Check if the loop may log the error and keep going
    ///
    /// These reflect benign races with processes that are already gone.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TrackerError::ProcessOpen { .. } | TrackerError::MemoryQuery { .. }
        )
    }

    /// The OS error behind this failure, if the OS reported one.
    pub fn os_error(&self) -> Option<&OsError> {
        match self {
            TrackerError::GroupCreation { source }
            | TrackerError::ChannelCreation { source }
            | TrackerError::ChannelAssociation { source }
            | TrackerError::ProcessCreation { source }
            | TrackerError::GroupAssignment { source, .. }
            | TrackerError::Resume { source, .. }
            | TrackerError::Dequeue { source }
            | TrackerError::ProcessOpen { source, .. }
            | TrackerError::MemoryQuery { source, .. }
            | TrackerError::RootWait { source, .. }
            | TrackerError::AccountingQuery { source } => Some(source),
            TrackerError::EmptyCommand | TrackerError::Output(_) => None,
        }
    }

    /// Lines printed for a fatal error: `error: <context>` then the OS text.
    pub fn user_lines(&self) -> Vec<String> {
        let mut lines = vec![format!("error: {}", self)];
        if let Some(os) = self.os_error() {
            lines.push(os.to_string());
        }
        lines
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
