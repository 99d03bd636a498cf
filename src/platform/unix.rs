//! Linux process group: child subreaper plus /proc polling
//!
//! Linux has no single primitive that contains a dynamic process set and
//! announces membership changes, so this backend approximates one:
//! - the root runs in its own process group, and orphaned descendants are
//!   reparented to the tracker (PR_SET_CHILD_SUBREAPER) instead of init
//! - a process is a member when its pgid is the root's, or its parent is a member
//! - events come from rescanning the process table every [`POLL_INTERVAL`]
//!
//! Ordering is coarser than a native channel. A process that starts and exits
//! between two scans is never announced. Its CPU time reaches the totals
//! through the rusage of whoever reaps it, and its I/O through the reaper's
//! own counters, which the kernel grows by every child it reaps.

use crate::config::{EXEC_FAILED_STATUS, POLL_INTERVAL};
use crate::core::models::{CommandLine, GroupAccounting, GroupEvent, IoCounters};
use crate::error::{OsError, TrackerError, TrackerResult};
use crate::platform::{ProcessGroup, ProcessHandle};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitid, waitpid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, getpgid, setpgid, ForkResult, Pid};
use parking_lot::Mutex;
use psutil::process::{processes, Process, Status};
use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::sync::Arc;
use std::time::Duration;
use std::{fs, thread};
use tracing::debug;

/// What one scan learns about a process.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ProcEntry {
    pid: u32,
    ppid: u32,
    pgrp: i32,
    start_time: Duration,
    dead: bool,
}

impl ProcEntry {
    /// `None` when the process vanished while it was being read.
    fn inspect(process: &Process) -> Option<Self> {
        let pid = process.pid();
        let pgrp = getpgid(Some(Pid::from_raw(pid as libc::pid_t))).ok()?;
        Some(Self {
            pid,
            ppid: process.ppid().ok()?.unwrap_or(0),
            pgrp: pgrp.as_raw(),
            start_time: process.create_time(),
            dead: matches!(process.status().ok()?, Status::Zombie | Status::Dead),
        })
    }

    fn of(pid: u32) -> Option<Self> {
        Process::new(pid).ok().as_ref().and_then(Self::inspect)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct IoSample {
    read: IoCounters,
    write: IoCounters,
}

/// Latest observations for one member, shared between the group and handles.
#[derive(Debug, Default)]
struct MemberSample {
    exe: String,
    peak_rss: u64,
    io: IoSample,
    exited: bool,
    exit_status: Option<i32>,
}

impl MemberSample {
    /// Re-read the exe path, VmHWM and I/O counters. psutil exposes neither
    /// of the latter two on Linux, so those are read from /proc directly.
    fn refresh(&mut self, pid: u32) {
        if let Some(path) = Process::new(pid).ok().and_then(|process| process.exe().ok()) {
            self.exe = path.to_string_lossy().into_owned();
        }
        if let Some(peak) = fs::read_to_string(format!("/proc/{pid}/status"))
            .ok()
            .as_deref()
            .and_then(parse_peak_rss)
        {
            self.peak_rss = self.peak_rss.max(peak);
        }
        if let Ok(io) = fs::read_to_string(format!("/proc/{pid}/io")) {
            self.io = parse_io(&io);
        }
    }

    fn record_reaped(&mut self, reaped: &Reaped) {
        self.peak_rss = self.peak_rss.max(reaped.max_rss);
        self.exit_status = Some(reaped.status);
        self.exited = true;
    }
}

type SharedSample = Arc<Mutex<MemberSample>>;

#[derive(Debug)]
struct Member {
    start_time: Duration,
    /// Parent as of the last scan; decides who absorbs the I/O counters.
    ppid: u32,
    sample: SharedSample,
}

/// Resource usage handed back by wait4 for one reaped child.
#[derive(Debug, Clone, Copy, Default)]
struct Reaped {
    status: i32,
    user: Duration,
    system: Duration,
    faults: u64,
    max_rss: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct ReapedTotals {
    user: Duration,
    system: Duration,
    faults: u64,
}

/// Handle to a group member.
///
/// There is no kernel object behind it; it shares the group's sample slot, which
/// keeps the final figures readable after the process is gone.
#[derive(Debug, Clone)]
pub struct UnixProcess {
    pid: u32,
    sample: SharedSample,
}

impl UnixProcess {
    fn new(pid: u32) -> Self {
        Self {
            pid,
            sample: Arc::new(Mutex::new(MemberSample::default())),
        }
    }
}

impl ProcessHandle for UnixProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn image_name(&self) -> String {
        self.sample.lock().exe.clone()
    }

    fn peak_memory(&self) -> TrackerResult<u64> {
        match self.sample.lock().peak_rss {
            0 => Err(TrackerError::MemoryQuery {
                pid: self.pid,
                source: Errno::ENODATA.into(),
            }),
            peak => Ok(peak),
        }
    }

    fn wait(&self) -> TrackerResult<()> {
        loop {
            if self.sample.lock().exited {
                return Ok(());
            }
            match try_reap(self.pid, true) {
                Ok(Some(reaped)) => {
                    self.sample.lock().record_reaped(&reaped);
                    return Ok(());
                }
                Ok(None) => {}
                Err(Errno::ECHILD) => {
                    // Not our child; all we can do is watch it leave /proc.
                    if ProcEntry::of(self.pid).map_or(true, |entry| entry.dead) {
                        self.sample.lock().exited = true;
                        return Ok(());
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(errno) => {
                    return Err(TrackerError::RootWait {
                        pid: self.pid,
                        source: errno.into(),
                    })
                }
            }
        }
    }

    fn exit_code(&self) -> Option<i32> {
        self.sample.lock().exit_status
    }

    fn terminate(&self) {
        let pid = Pid::from_raw(self.pid as libc::pid_t);
        if let Err(errno) = signal::kill(pid, Signal::SIGKILL) {
            debug!("pid={} SIGKILL failed: {}", self.pid, errno);
            return;
        }
        match try_reap(self.pid, true) {
            Ok(Some(reaped)) => self.sample.lock().record_reaped(&reaped),
            Ok(None) => {}
            Err(errno) => debug!("pid={} reap after SIGKILL failed: {}", self.pid, errno),
        }
    }
}

/// Terminal foreground handed to the root's process group.
///
/// The root runs in its own process group, which would otherwise be a
/// background job and stop on the first terminal read.
#[derive(Debug)]
struct TerminalHandoff {
    original: libc::pid_t,
}

impl TerminalHandoff {
    /// Give the terminal on stdin to `pgrp` if this process currently owns it.
    fn give(pgrp: libc::pid_t) -> Option<Self> {
        let original = unsafe { libc::getpgrp() };
        let owns_terminal = unsafe {
            libc::isatty(libc::STDIN_FILENO) == 1
                && libc::tcgetpgrp(libc::STDIN_FILENO) == original
        };
        (owns_terminal && set_foreground(pgrp)).then_some(Self { original })
    }
}

impl Drop for TerminalHandoff {
    fn drop(&mut self) {
        if !set_foreground(self.original) {
            debug!("failed to take back the terminal foreground");
        }
    }
}

/// Make `pgrp` the foreground process group of the terminal on stdin
///
/// Encapsulates the unsafe tcsetpgrp call. A background caller would get
/// SIGTTOU, so it is ignored for the duration.
fn set_foreground(pgrp: libc::pid_t) -> bool {
    unsafe {
        let previous = libc::signal(libc::SIGTTOU, libc::SIG_IGN);
        let result = libc::tcsetpgrp(libc::STDIN_FILENO, pgrp);
        libc::signal(libc::SIGTTOU, previous);
        result == 0
    }
}

/// Safely mark this process as a child subreaper
///
/// Encapsulates unsafe prctl call
fn set_child_subreaper() -> Result<(), Errno> {
    let result = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1 as libc::c_ulong) };
    if result == 0 {
        Ok(())
    } else {
        Err(Errno::last())
    }
}

/// Reap `pid` if it has exited
///
/// Encapsulates unsafe wait4 call; returns `Ok(None)` while a non-blocking
/// wait finds the child still running.
fn try_reap(pid: u32, block: bool) -> Result<Option<Reaped>, Errno> {
    let options = if block { 0 } else { libc::WNOHANG };
    let mut status: libc::c_int = 0;
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    loop {
        let result = unsafe { libc::wait4(pid as libc::pid_t, &mut status, options, &mut usage) };
        if result > 0 {
            return Ok(Some(Reaped {
                status: decode_status(status),
                user: timeval_duration(usage.ru_utime),
                system: timeval_duration(usage.ru_stime),
                faults: (usage.ru_minflt + usage.ru_majflt).max(0) as u64,
                max_rss: (usage.ru_maxrss.max(0) as u64) * 1024,
            }));
        }
        if result == 0 {
            return Ok(None);
        }
        match Errno::last() {
            Errno::EINTR => continue,
            errno => return Err(errno),
        }
    }
}

/// Check whether our child `pid` has exited, leaving it unreaped
///
/// The zombie keeps its final /proc counters until the wait4 that follows.
fn child_exited(pid: u32) -> Result<bool, Errno> {
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
    loop {
        match waitid(Id::Pid(Pid::from_raw(pid as libc::pid_t)), flags) {
            Ok(WaitStatus::StillAlive) => return Ok(false),
            Ok(_) => return Ok(true),
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(errno),
        }
    }
}

fn decode_status(status: libc::c_int) -> i32 {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        128 + libc::WTERMSIG(status)
    } else {
        status
    }
}

fn timeval_duration(tv: libc::timeval) -> Duration {
    Duration::from_secs(tv.tv_sec.max(0) as u64) + Duration::from_micros(tv.tv_usec.max(0) as u64)
}

fn to_cstring(value: &OsStr) -> TrackerResult<CString> {
    CString::new(value.as_bytes()).map_err(|_| TrackerError::ProcessCreation {
        source: Errno::EINVAL.into(),
    })
}

/// Fork a child that stops itself before exec
///
/// Returns once the child is confirmed stopped. Between fork and exec the child
/// only makes async-signal-safe calls, so argv is fully built beforehand.
fn spawn_stopped(path: &CString, argv: &[CString]) -> TrackerResult<u32> {
    let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|arg| arg.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());

    match unsafe { fork() } {
        Ok(ForkResult::Child) => unsafe {
            libc::setpgid(0, 0);
            libc::raise(libc::SIGSTOP);
            libc::execv(path.as_ptr(), argv_ptrs.as_ptr());
            libc::_exit(EXEC_FAILED_STATUS)
        },
        Ok(ForkResult::Parent { child }) => {
            // Also set from the parent so the pgid is in place whichever side runs first.
            let _ = setpgid(child, child);
            loop {
                match waitpid(child, Some(WaitPidFlag::WUNTRACED)) {
                    Ok(WaitStatus::Stopped(..)) => return Ok(child.as_raw() as u32),
                    Ok(status) => {
                        return Err(TrackerError::ProcessCreation {
                            source: OsError::with_message(
                                libc::ECHILD,
                                format!("child ended before it could be started: {status:?}"),
                            ),
                        })
                    }
                    Err(Errno::EINTR) => continue,
                    Err(errno) => {
                        return Err(TrackerError::ProcessCreation {
                            source: errno.into(),
                        })
                    }
                }
            }
        }
        Err(errno) => Err(TrackerError::ProcessCreation {
            source: errno.into(),
        }),
    }
}

/// Process group approximated with a subreaper and process-table scans.
///
/// A member's I/O counters already include every child it reaped, so a
/// retired member is only added to the totals when its reaper is not itself
/// a member.
#[derive(Debug)]
pub struct ReaperGroup {
    self_pid: u32,
    group_id: Option<i32>,
    root_pid: Option<u32>,
    members: HashMap<u32, Member>,
    pending: VecDeque<GroupEvent>,
    reaped: ReapedTotals,
    retired_io: IoSample,
    total_processes: u64,
    terminal: Option<TerminalHandoff>,
}

impl ReaperGroup {
    pub fn create() -> TrackerResult<Self> {
        set_child_subreaper().map_err(|errno| TrackerError::GroupCreation {
            source: errno.into(),
        })?;

        Ok(Self {
            self_pid: std::process::id(),
            group_id: None,
            root_pid: None,
            members: HashMap::new(),
            pending: VecDeque::new(),
            reaped: ReapedTotals::default(),
            retired_io: IoSample::default(),
            total_processes: 0,
            terminal: None,
        })
    }

    fn admit(&mut self, pid: u32, start_time: Duration, ppid: u32, sample: SharedSample) {
        self.members.insert(
            pid,
            Member {
                start_time,
                ppid,
                sample,
            },
        );
        self.total_processes += 1;
    }

    fn refresh(&self, pid: u32) {
        if let Some(member) = self.members.get(&pid) {
            member.sample.lock().refresh(pid);
        }
    }

    /// Drop a member. `absorbed` means its reaper is a member whose own
    /// counters already carry this one's I/O.
    fn retire(&mut self, pid: u32, reaped: Option<Reaped>, absorbed: bool) {
        let Some(member) = self.members.remove(&pid) else {
            return;
        };
        let mut sample = member.sample.lock();
        if let Some(reaped) = reaped {
            self.reaped.user += reaped.user;
            self.reaped.system += reaped.system;
            self.reaped.faults += reaped.faults;
            sample.record_reaped(&reaped);
        }
        sample.exited = true;
        if !absorbed {
            self.retired_io.read.add(sample.io.read);
            self.retired_io.write.add(sample.io.write);
        }
    }

    /// One scan: retire members that are gone, then admit new ones.
    ///
    /// Events are queued as non-root exits, new members, root exit, so a reused
    /// identifier's exit always precedes its new announcement.
    fn poll(&mut self) -> Result<(), Errno> {
        let snapshot = scan_processes()?;
        let tracked: HashSet<u32> = self.members.keys().copied().collect();
        let mut retired = HashSet::new();
        let mut exits = Vec::new();
        let mut root_exited = false;

        let mut pids: Vec<u32> = tracked.iter().copied().collect();
        pids.sort_unstable();
        for pid in pids {
            let Some((start_time, last_ppid)) = self
                .members
                .get(&pid)
                .map(|member| (member.start_time, member.ppid))
            else {
                continue;
            };
            let current = snapshot
                .get(&pid)
                .filter(|entry| entry.start_time == start_time);

            let gone = match current {
                Some(entry) if entry.ppid == self.self_pid => match child_exited(pid) {
                    Ok(true) => {
                        self.refresh(pid);
                        match try_reap(pid, false) {
                            Ok(Some(reaped)) => {
                                self.retire(pid, Some(reaped), false);
                                true
                            }
                            Ok(None) | Err(Errno::ECHILD) => false,
                            Err(errno) => return Err(errno),
                        }
                    }
                    Ok(false) => false,
                    // Reparented between the scan and the wait; the next scan decides.
                    Err(Errno::ECHILD) => false,
                    Err(errno) => return Err(errno),
                },
                Some(entry) if entry.dead => {
                    self.refresh(pid);
                    let absorbed = tracked.contains(&entry.ppid);
                    self.retire(pid, None, absorbed);
                    true
                }
                Some(entry) => {
                    if let Some(member) = self.members.get_mut(&pid) {
                        member.ppid = entry.ppid;
                    }
                    false
                }
                None => {
                    self.retire(pid, None, tracked.contains(&last_ppid));
                    true
                }
            };

            if gone {
                retired.insert(pid);
                if Some(pid) == self.root_pid {
                    root_exited = true;
                } else {
                    exits.push(GroupEvent::exit_process(pid));
                }
            } else {
                self.refresh(pid);
            }
        }

        let mut admitted = Vec::new();
        loop {
            let mut grew = false;
            for entry in snapshot.values() {
                if entry.pid == self.self_pid
                    || entry.dead
                    || retired.contains(&entry.pid)
                    || self.members.contains_key(&entry.pid)
                {
                    continue;
                }
                let in_group =
                    Some(entry.pgrp) == self.group_id || self.members.contains_key(&entry.ppid);
                if in_group {
                    let sample = SharedSample::default();
                    sample.lock().refresh(entry.pid);
                    self.admit(entry.pid, entry.start_time, entry.ppid, sample);
                    admitted.push(entry.pid);
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        self.pending.extend(exits);
        self.pending
            .extend(admitted.into_iter().map(GroupEvent::new_process));
        if root_exited {
            if let Some(root) = self.root_pid {
                self.pending.push_back(GroupEvent::exit_process(root));
            }
        }
        Ok(())
    }
}

impl ProcessGroup for ReaperGroup {
    type Handle = UnixProcess;

    fn spawn_suspended(&mut self, command: &CommandLine) -> TrackerResult<UnixProcess> {
        let path = which::which(command.program()).map_err(|err| {
            debug!("cannot resolve {:?}: {}", command.program(), err);
            TrackerError::ProcessCreation {
                source: Errno::ENOENT.into(),
            }
        })?;
        let path = to_cstring(path.as_os_str())?;
        let argv = command
            .argv()
            .iter()
            .map(|arg| to_cstring(arg))
            .collect::<TrackerResult<Vec<_>>>()?;

        let pid = spawn_stopped(&path, &argv)?;
        Ok(UnixProcess::new(pid))
    }

    fn assign(&mut self, process: &UnixProcess) -> TrackerResult<()> {
        let pid = process.pid;
        let entry = ProcEntry::of(pid).ok_or_else(|| TrackerError::GroupAssignment {
            pid,
            source: Errno::ESRCH.into(),
        })?;
        // The root must lead its own process group, and there is only one group.
        if entry.pgrp != pid as i32 || self.group_id.is_some_and(|group| group != entry.pgrp) {
            return Err(TrackerError::GroupAssignment {
                pid,
                source: Errno::EPERM.into(),
            });
        }

        self.group_id = Some(entry.pgrp);
        self.root_pid = Some(pid);
        process.sample.lock().refresh(pid);
        self.admit(pid, entry.start_time, entry.ppid, process.sample.clone());
        self.pending.push_back(GroupEvent::new_process(pid));
        Ok(())
    }

    fn resume(&mut self, process: &mut UnixProcess) -> TrackerResult<()> {
        if self.terminal.is_none() {
            self.terminal = TerminalHandoff::give(process.pid as libc::pid_t);
        }
        signal::kill(Pid::from_raw(process.pid as libc::pid_t), Signal::SIGCONT).map_err(|errno| {
            TrackerError::Resume {
                pid: process.pid,
                source: errno.into(),
            }
        })
    }

    fn open(&mut self, pid: u32) -> TrackerResult<UnixProcess> {
        match self.members.get(&pid) {
            Some(member) => Ok(UnixProcess {
                pid,
                sample: member.sample.clone(),
            }),
            None => Err(TrackerError::ProcessOpen {
                pid,
                source: Errno::ESRCH.into(),
            }),
        }
    }

    fn next_event(&mut self) -> TrackerResult<GroupEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }
            if self.group_id.is_none() {
                // Nothing was ever assigned, so nothing will ever arrive.
                return Err(TrackerError::Dequeue {
                    source: Errno::ECHILD.into(),
                });
            }
            thread::sleep(POLL_INTERVAL);
            self.poll()
                .map_err(|errno| TrackerError::Dequeue { source: errno.into() })?;
        }
    }

    fn accounting(&self) -> TrackerResult<GroupAccounting> {
        let mut io = self.retired_io;
        for member in self.members.values() {
            let sample = member.sample.lock();
            io.read.add(sample.io.read);
            io.write.add(sample.io.write);
        }

        Ok(GroupAccounting {
            user_time: self.reaped.user,
            kernel_time: self.reaped.system,
            page_faults: self.reaped.faults,
            total_processes: self.total_processes,
            read: io.read,
            write: io.write,
            other: IoCounters::default(),
        })
    }
}

/// Snapshot of every process visible to us, keyed by pid.
fn scan_processes() -> Result<HashMap<u32, ProcEntry>, Errno> {
    let listed = processes().map_err(|err| {
        debug!("process enumeration failed: {}", err);
        Errno::EIO
    })?;

    // Processes vanish between listing and reading; that is not an error.
    Ok(listed
        .into_iter()
        .flatten()
        .filter_map(|process| ProcEntry::inspect(&process))
        .map(|entry| (entry.pid, entry))
        .collect())
}

/// Peak resident set size (VmHWM) in bytes.
fn parse_peak_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmHWM:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

fn parse_io(contents: &str) -> IoSample {
    let mut sample = IoSample::default();
    for line in contents.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let Ok(value) = value.trim().parse::<u64>() else {
            continue;
        };
        match key {
            "rchar" => sample.read.bytes = value,
            "wchar" => sample.write.bytes = value,
            "syscr" => sample.read.operations = value,
            "syscw" => sample.write.operations = value,
            _ => {}
        }
    }
    sample
}
