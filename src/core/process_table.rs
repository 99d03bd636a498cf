//! Live table of tracked processes
//!
//! Keys are process identifiers, which the OS recycles after exit. A record is
//! therefore removed the moment its exit notification is handled, before the
//! next notification (possibly for a reused identifier) is looked at.

use std::collections::HashMap;
use std::time::Instant;

/// Who owns the handle behind a record.
#[derive(Debug)]
pub enum TrackedHandle<H> {
    /// Opened by the loop; released when the record is removed.
    Owned(H),
    /// The launched root. Its handle lives in `RootProcess` and outlives the record.
    Root,
    /// Announced by the group but could not be opened.
    Untracked,
}

/// Bookkeeping for one group member currently believed alive.
#[derive(Debug)]
pub struct TrackedProcess<H> {
    pub handle: TrackedHandle<H>,
    pub name: String,
    pub started: Instant,
}

impl<H> TrackedProcess<H> {
    pub fn owned(handle: H, name: impl Into<String>) -> Self {
        Self {
            handle: TrackedHandle::Owned(handle),
            name: name.into(),
            started: Instant::now(),
        }
    }

    pub fn root(name: impl Into<String>) -> Self {
        Self {
            handle: TrackedHandle::Root,
            name: name.into(),
            started: Instant::now(),
        }
    }

    pub fn untracked() -> Self {
        Self {
            handle: TrackedHandle::Untracked,
            name: String::new(),
            started: Instant::now(),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self.handle, TrackedHandle::Root)
    }

    /// Release the record's handle, if it owns one.
    pub fn release(self) {
        if let TrackedHandle::Owned(handle) = self.handle {
            drop(handle);
        }
    }
}

/// pid -> record for every live member, scoped to one run.
#[derive(Debug)]
pub struct ProcessTable<H> {
    entries: HashMap<u32, TrackedProcess<H>>,
}

impl<H> Default for ProcessTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> ProcessTable<H> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Insert a record, handing back any record previously stored under `pid`.
    ///
    /// A displaced record means an exit notification was never seen for the old
    /// process; the caller decides how to release it.
    pub fn insert(&mut self, pid: u32, record: TrackedProcess<H>) -> Option<TrackedProcess<H>> {
        self.entries.insert(pid, record)
    }

    pub fn remove(&mut self, pid: u32) -> Option<TrackedProcess<H>> {
        self.entries.remove(&pid)
    }

    pub fn get(&self, pid: u32) -> Option<&TrackedProcess<H>> {
        self.entries.get(&pid)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every remaining record, e.g. descendants still live at shutdown.
    pub fn drain(&mut self) -> impl Iterator<Item = (u32, TrackedProcess<H>)> + '_ {
        self.entries.drain()
    }

    pub fn pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.entries.keys().copied().collect();
        pids.sort_unstable();
        pids
    }
}
