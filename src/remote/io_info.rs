//! Per-handle I/O context

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use fixedbitset::FixedBitSet;
use parking_lot::Mutex;

use crate::remote::OpenFlags;
use crate::striping::StripePattern;

/// Target bookkeeping shared by a handle slot and the I/O calls using it
#[derive(Debug)]
pub struct TargetState {
    /// Highest stripe target index touched (-1 = none)
    max_used_target_index: AtomicI32,
    /// One bit per stripe target, set after the first write to it
    first_write_done: Mutex<FixedBitSet>,
    /// An append lock may be left on the server
    needs_append_lock_cleanup: AtomicBool,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            max_used_target_index: AtomicI32::new(-1),
            first_write_done: Mutex::new(FixedBitSet::new()),
            needs_append_lock_cleanup: AtomicBool::new(false),
        }
    }
}

impl TargetState {
    /// Prepare for a freshly opened handle
    pub(crate) fn reset_for_open(&self, stripe_count: usize) {
        let mut bits = self.first_write_done.lock();
        bits.clear();
        bits.grow(stripe_count);
        self.max_used_target_index.store(-1, Ordering::Release);
    }

    /// Drop all state after the handle was closed
    pub(crate) fn reset_for_close(&self) {
        self.needs_append_lock_cleanup.store(false, Ordering::Release);
        self.max_used_target_index.store(-1, Ordering::Release);
        *self.first_write_done.lock() = FixedBitSet::new();
    }

    pub fn max_used_target_index(&self) -> i32 {
        self.max_used_target_index.load(Ordering::Acquire)
    }

    pub fn first_write_done(&self, target_index: usize) -> bool {
        self.first_write_done.lock().contains(target_index)
    }

    pub fn first_write_bits(&self) -> usize {
        self.first_write_done.lock().len()
    }

    pub fn needs_append_lock_cleanup(&self) -> bool {
        self.needs_append_lock_cleanup.load(Ordering::Acquire)
    }

    pub fn set_needs_append_lock_cleanup(&self) {
        self.needs_append_lock_cleanup.store(true, Ordering::Release);
    }

    fn snapshot(&self) -> TargetState {
        TargetState {
            max_used_target_index: AtomicI32::new(self.max_used_target_index()),
            first_write_done: Mutex::new(self.first_write_done.lock().clone()),
            needs_append_lock_cleanup: AtomicBool::new(self.needs_append_lock_cleanup()),
        }
    }
}

/// Everything a remote read, write, fsync or close needs about an open handle
#[derive(Debug, Clone)]
pub struct IoInfo {
    pub handle_id: Arc<str>,
    pub access: OpenFlags,
    pub pattern: Arc<StripePattern>,
    pub targets: Arc<TargetState>,
}

impl IoInfo {
    /// Record that `offset` is accessed
    ///
    /// Raises the used-target high-water mark. For writes, returns true if
    /// this is the first write to the target since the handle was opened.
    pub fn note_target_access(&self, offset: u64, is_write: bool) -> bool {
        let index = self.pattern.target_index(offset);
        self.targets
            .max_used_target_index
            .fetch_max(index as i32, Ordering::AcqRel);

        if !is_write {
            return false;
        }

        let mut bits = self.targets.first_write_done.lock();
        if index >= bits.len() {
            // Pattern grew after open; the bitset only covers the old targets
            bits.grow(index + 1);
        }
        !bits.put(index)
    }

    /// Copy with its own target state, unaffected by later slot resets
    pub fn detached(&self) -> IoInfo {
        IoInfo {
            handle_id: self.handle_id.clone(),
            access: self.access,
            pattern: self.pattern.clone(),
            targets: Arc::new(self.targets.snapshot()),
        }
    }
}
