//! File and range locks
//!
//! Locks are only sent to the servers when global file locking is
//! configured; otherwise they stay with the local kernel. Buffered data is
//! flushed around every lock change so other clients see it.

use tracing::{trace, warn};

use crate::error::Result;
use crate::remote::LockKind;

use super::OpenFile;

impl OpenFile {
    /// Whole-file lock (flock semantics) for `owner_pid`
    pub fn flock(&self, owner_pid: i32, kind: LockKind) -> Result<()> {
        let config = self.inode.context().config();
        if !config.locking.use_global_file_locks {
            trace!(ino = self.inode.ino(), "Entry lock handled locally");
            return Ok(());
        }

        if kind.is_unlock() {
            self.inode.flush_cache()?;
        }

        let io = self.inode.io_info(self.info.handle_type())?;
        let remote = self.inode.remote();
        {
            let entry = self.inode.entry().read_lock(remote)?;
            remote.lock_entry(&entry, &io, self.info.client_fd(), owner_pid, kind)?;
        }
        self.info.set_used_entry_locking();

        if !kind.is_unlock() {
            self.inode.flush_cache()?;
        }
        Ok(())
    }

    /// Byte range lock (fcntl semantics) over `start..=end`
    pub fn lock_range(&self, owner_pid: i32, kind: LockKind, start: u64, end: u64) -> Result<()> {
        let config = self.inode.context().config();
        if !config.locking.use_global_file_locks {
            trace!(ino = self.inode.ino(), "Range lock handled locally");
            return Ok(());
        }

        if kind.is_unlock() {
            self.inode.flush_cache()?;
        } else {
            self.inode.range_locks().add(owner_pid);
        }

        let io = self.inode.io_info(self.info.handle_type())?;
        let remote = self.inode.remote();
        {
            let entry = self.inode.entry().read_lock(remote)?;
            remote.lock_range(&entry, &io, owner_pid, kind, start, end)?;
        }

        if !kind.is_unlock() {
            self.inode.flush_cache()?;
        }
        Ok(())
    }

    /// Drop whatever locks `owner_pid` still holds through this file
    ///
    /// Unlocks that fail with a transient error are handed to the retry
    /// queue; nothing here fails the release.
    pub(super) fn cancel_locks(&self, owner_pid: i32) {
        let io = match self.inode.io_info(self.info.handle_type()) {
            Ok(io) => io,
            Err(e) => {
                warn!(ino = self.inode.ino(), "No handle to cancel locks: {}", e);
                return;
            }
        };

        let remote = self.inode.remote();
        let entry = match self.inode.entry().read_lock(remote) {
            Ok(entry) => entry.clone(),
            Err(e) => {
                warn!(ino = self.inode.ino(), "Cannot resolve entry to cancel locks: {}", e);
                return;
            }
        };
        let retry_queue = self.inode.context().retry_queue();

        if self.info.used_entry_locking() {
            let client_fd = self.info.client_fd();
            match remote.lock_entry(&entry, &io, client_fd, owner_pid, LockKind::Unlock) {
                Ok(()) => {}
                Err(e) if e.is_retryable() => {
                    retry_queue.add_entry_unlock(entry.clone(), io.detached(), client_fd, owner_pid)
                }
                Err(e) => warn!(ino = self.inode.ino(), owner_pid, "Entry unlock failed: {}", e),
            }
        }

        if self.inode.range_locks().has_entries() && self.inode.range_locks().remove(owner_pid) {
            match remote.lock_range(&entry, &io, owner_pid, LockKind::Unlock, 0, u64::MAX) {
                Ok(()) => {}
                Err(e) if e.is_retryable() => {
                    retry_queue.add_range_unlock(entry.clone(), io.detached(), owner_pid)
                }
                Err(e) => warn!(ino = self.inode.ino(), owner_pid, "Range unlock failed: {}", e),
            }
        }

        if io.targets.needs_append_lock_cleanup() {
            if let Err(e) = remote.lock_append(&entry, &io, LockKind::Unlock) {
                warn!(ino = self.inode.ino(), "Append lock cleanup failed: {}", e);
            }
        }
    }
}
