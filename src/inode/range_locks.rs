//! Range lock bookkeeping
//!
//! Remembers which processes took fcntl range locks on an inode, so the
//! close path only sends a remote unlock for processes that actually used
//! range locking.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Set of process IDs holding range locks
#[derive(Debug, Default)]
pub struct RangeLockTable {
    pids: Mutex<HashSet<i32>>,
    /// Mirrors `pids.len()` for lock-free checks
    count: AtomicUsize,
}

impl RangeLockTable {
    /// Record `pid`; returns true if it was not yet recorded
    pub fn add(&self, pid: i32) -> bool {
        let mut pids = self.pids.lock();
        let inserted = pids.insert(pid);
        if inserted {
            self.count.fetch_add(1, Ordering::AcqRel);
        }
        inserted
    }

    /// Forget `pid`; returns whether it was recorded
    pub fn remove(&self, pid: i32) -> bool {
        let mut pids = self.pids.lock();
        let removed = pids.remove(&pid);
        if removed {
            self.count.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    /// Any process recorded (lock-free, may be stale)
    pub fn has_entries(&self) -> bool {
        self.count.load(Ordering::Acquire) > 0
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        !self.has_entries()
    }
}
