//! Windows process group: a job object bound to an I/O completion port
//!
//! The job contains every descendant of the root; the kernel posts one
//! completion packet per membership change. For job notifications the
//! "bytes transferred" slot carries the message id and the overlapped
//! pointer carries the process id.

use crate::config::MAX_IMAGE_NAME;
use crate::core::models::{
    CommandLine, EventKind, GroupAccounting, GroupEvent, IoCounters,
};
use crate::error::{OsError, TrackerError, TrackerResult};
use crate::platform::{ProcessGroup, ProcessHandle};
use std::ffi::c_void;
use std::mem;
use std::ptr;
use std::time::Duration;
use tracing::debug;
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE, WAIT_OBJECT_0};
use windows::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JobObjectAssociateCompletionPortInformation,
    JobObjectBasicAndIoAccountingInformation, QueryInformationJobObject, SetInformationJobObject,
    JOBOBJECT_ASSOCIATE_COMPLETION_PORT, JOBOBJECT_BASIC_AND_IO_ACCOUNTING_INFORMATION,
};
use windows::Win32::System::ProcessStatus::{
    GetProcessImageFileNameW, GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS,
};
use windows::Win32::System::Threading::{
    CreateProcessW, GetExitCodeProcess, OpenProcess, ResumeThread, TerminateProcess,
    WaitForSingleObject, CREATE_SUSPENDED, INFINITE, PROCESS_INFORMATION,
    PROCESS_QUERY_INFORMATION, PROCESS_SYNCHRONIZE, PROCESS_VM_READ, STARTUPINFOW,
};
use windows::Win32::System::IO::{CreateIoCompletionPort, GetQueuedCompletionStatus, OVERLAPPED};

const MSG_NEW_PROCESS: u32 = 6;
const MSG_EXIT_PROCESS: u32 = 7;
const MSG_ABNORMAL_EXIT_PROCESS: u32 = 8;

const STILL_ACTIVE: u32 = 259;

/// Job accounting times are in 100ns ticks.
fn ticks(value: i64) -> Duration {
    Duration::from_nanos(value.max(0) as u64 * 100)
}

fn event_kind(message: u32) -> EventKind {
    match message {
        MSG_NEW_PROCESS => EventKind::NewProcess,
        MSG_EXIT_PROCESS => EventKind::ExitProcess { abnormal: false },
        MSG_ABNORMAL_EXIT_PROCESS => EventKind::ExitProcess { abnormal: true },
        other => EventKind::Other(other),
    }
}

/// A kernel handle closed on drop.
#[derive(Debug)]
struct OwnedHandle(HANDLE);

impl OwnedHandle {
    fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            if let Err(err) = unsafe { CloseHandle(self.0) } {
                debug!("CloseHandle failed: {}", err);
            }
        }
    }
}

/// Process handle with query, VM-read and synchronize rights.
#[derive(Debug)]
pub struct WinProcess {
    pid: u32,
    process: OwnedHandle,
    /// Primary thread, held only between creation and resume.
    thread: Option<OwnedHandle>,
}

impl ProcessHandle for WinProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn image_name(&self) -> String {
        let mut buffer = [0u16; MAX_IMAGE_NAME];
        let len = unsafe { GetProcessImageFileNameW(self.process.raw(), &mut buffer) } as usize;
        String::from_utf16_lossy(&buffer[..len.min(buffer.len())])
    }

    fn peak_memory(&self) -> TrackerResult<u64> {
        let size = mem::size_of::<PROCESS_MEMORY_COUNTERS>() as u32;
        let mut counters = PROCESS_MEMORY_COUNTERS {
            cb: size,
            ..Default::default()
        };
        unsafe { GetProcessMemoryInfo(self.process.raw(), &mut counters, size) }.map_err(
            |err| TrackerError::MemoryQuery {
                pid: self.pid,
                source: err.into(),
            },
        )?;
        Ok(counters.PeakWorkingSetSize as u64)
    }

    fn wait(&self) -> TrackerResult<()> {
        let result = unsafe { WaitForSingleObject(self.process.raw(), INFINITE) };
        if result == WAIT_OBJECT_0 {
            Ok(())
        } else {
            Err(TrackerError::RootWait {
                pid: self.pid,
                source: OsError::last(),
            })
        }
    }

    fn exit_code(&self) -> Option<i32> {
        let mut code = 0u32;
        unsafe { GetExitCodeProcess(self.process.raw(), &mut code) }.ok()?;
        (code != STILL_ACTIVE).then_some(code as i32)
    }

    fn terminate(&self) {
        if let Err(err) = unsafe { TerminateProcess(self.process.raw(), 1) } {
            debug!("pid={} TerminateProcess failed: {}", self.pid, err);
        }
    }
}

/// Job object plus the completion port it reports to.
#[derive(Debug)]
pub struct JobGroup {
    job: OwnedHandle,
    port: OwnedHandle,
}

impl JobGroup {
    pub fn create() -> TrackerResult<Self> {
        let job = unsafe { CreateJobObjectW(None, PCWSTR::null()) }
            .map(OwnedHandle)
            .map_err(|err| TrackerError::GroupCreation { source: err.into() })?;

        let port = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, HANDLE::default(), 0, 1) }
            .map(OwnedHandle)
            .map_err(|err| TrackerError::ChannelCreation { source: err.into() })?;

        let association = JOBOBJECT_ASSOCIATE_COMPLETION_PORT {
            CompletionKey: job.raw().0 as *mut c_void,
            CompletionPort: port.raw(),
        };
        unsafe {
            SetInformationJobObject(
                job.raw(),
                JobObjectAssociateCompletionPortInformation,
                &association as *const _ as *const c_void,
                mem::size_of::<JOBOBJECT_ASSOCIATE_COMPLETION_PORT>() as u32,
            )
        }
        .map_err(|err| TrackerError::ChannelAssociation { source: err.into() })?;

        Ok(Self { job, port })
    }
}

impl ProcessGroup for JobGroup {
    type Handle = WinProcess;

    fn spawn_suspended(&mut self, command: &CommandLine) -> TrackerResult<WinProcess> {
        // CreateProcessW may write into the command line buffer.
        let mut command_line: Vec<u16> = command.joined().encode_utf16().chain([0]).collect();
        let startup = STARTUPINFOW {
            cb: mem::size_of::<STARTUPINFOW>() as u32,
            ..Default::default()
        };
        let mut info = PROCESS_INFORMATION::default();

        unsafe {
            CreateProcessW(
                PCWSTR::null(),
                PWSTR(command_line.as_mut_ptr()),
                None,
                None,
                false,
                CREATE_SUSPENDED,
                None,
                PCWSTR::null(),
                &startup,
                &mut info,
            )
        }
        .map_err(|err| TrackerError::ProcessCreation { source: err.into() })?;

        Ok(WinProcess {
            pid: info.dwProcessId,
            process: OwnedHandle(info.hProcess),
            thread: Some(OwnedHandle(info.hThread)),
        })
    }

    fn assign(&mut self, process: &WinProcess) -> TrackerResult<()> {
        unsafe { AssignProcessToJobObject(self.job.raw(), process.process.raw()) }.map_err(|err| {
            TrackerError::GroupAssignment {
                pid: process.pid,
                source: err.into(),
            }
        })
    }

    fn resume(&mut self, process: &mut WinProcess) -> TrackerResult<()> {
        let Some(thread) = process.thread.take() else {
            return Ok(());
        };
        if unsafe { ResumeThread(thread.raw()) } == u32::MAX {
            return Err(TrackerError::Resume {
                pid: process.pid,
                source: OsError::last(),
            });
        }
        Ok(())
    }

    fn open(&mut self, pid: u32) -> TrackerResult<WinProcess> {
        let access = PROCESS_QUERY_INFORMATION | PROCESS_VM_READ | PROCESS_SYNCHRONIZE;
        let process = unsafe { OpenProcess(access, false, pid) }
            .map_err(|err| TrackerError::ProcessOpen { pid, source: err.into() })?;
        Ok(WinProcess {
            pid,
            process: OwnedHandle(process),
            thread: None,
        })
    }

    fn next_event(&mut self) -> TrackerResult<GroupEvent> {
        let mut message = 0u32;
        let mut key = 0usize;
        let mut overlapped: *mut OVERLAPPED = ptr::null_mut();
        unsafe {
            GetQueuedCompletionStatus(
                self.port.raw(),
                &mut message,
                &mut key,
                &mut overlapped,
                INFINITE,
            )
        }
        .map_err(|err| TrackerError::Dequeue { source: err.into() })?;

        Ok(GroupEvent {
            kind: event_kind(message),
            pid: overlapped as usize as u32,
        })
    }

    fn accounting(&self) -> TrackerResult<GroupAccounting> {
        let mut info = JOBOBJECT_BASIC_AND_IO_ACCOUNTING_INFORMATION::default();
        unsafe {
            QueryInformationJobObject(
                self.job.raw(),
                JobObjectBasicAndIoAccountingInformation,
                &mut info as *mut _ as *mut c_void,
                mem::size_of::<JOBOBJECT_BASIC_AND_IO_ACCOUNTING_INFORMATION>() as u32,
                None,
            )
        }
        .map_err(|err| TrackerError::AccountingQuery { source: err.into() })?;

        let basic = info.BasicInfo;
        let io = info.IoInfo;
        Ok(GroupAccounting {
            user_time: ticks(basic.TotalUserTime),
            kernel_time: ticks(basic.TotalKernelTime),
            page_faults: u64::from(basic.TotalPageFaultCount),
            total_processes: u64::from(basic.TotalProcesses),
            read: IoCounters::new(io.ReadOperationCount, io.ReadTransferCount),
            write: IoCounters::new(io.WriteOperationCount, io.WriteTransferCount),
            other: IoCounters::new(io.OtherOperationCount, io.OtherTransferCount),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ids() {
        assert_eq!(event_kind(6), EventKind::NewProcess);
        assert_eq!(event_kind(7), EventKind::ExitProcess { abnormal: false });
        assert_eq!(event_kind(8), EventKind::ExitProcess { abnormal: true });
        assert_eq!(event_kind(4), EventKind::Other(4));
    }

    #[test]
    fn test_ticks_to_duration() {
        assert_eq!(ticks(10_000_000), Duration::from_secs(1));
        assert_eq!(ticks(-5), Duration::ZERO);
    }
}
