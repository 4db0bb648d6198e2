//! Size consistency guard
//!
//! A stat reply can be computed by the metadata server before a local
//! write reached storage and still arrive afterwards. Applying its smaller
//! size would make freshly written data disappear, so decreases are
//! refused while local writes are buffered, in flight, or completed after
//! the stat was issued.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Snapshot taken right before a remote stat is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsizeHints {
    /// Local writes were pending when the stat was issued
    pub ignore_isize: bool,
    /// Context ticks at the time the stat was issued
    pub time_before_remote_stat: u64,
}

/// Locally visible size plus the write tracking that protects it
#[derive(Debug, Default)]
pub struct SizeGuard {
    size: Mutex<u64>,
    /// Set once local writes have extended the file
    page_write: AtomicBool,
    no_isize_decrease: AtomicBool,
    write_back_counter: AtomicU32,
    dirty_pages: AtomicU64,
    last_write_back_or_isize_write_time: AtomicU64,
}

impl SizeGuard {
    pub fn size(&self) -> u64 {
        *self.size.lock()
    }

    pub fn write_back_count(&self) -> u32 {
        self.write_back_counter.load(Ordering::Acquire)
    }

    pub fn dirty_pages(&self) -> u64 {
        self.dirty_pages.load(Ordering::Acquire)
    }

    pub fn no_isize_decrease(&self) -> bool {
        self.no_isize_decrease.load(Ordering::Acquire)
    }

    pub fn last_write_time(&self) -> u64 {
        self.last_write_back_or_isize_write_time.load(Ordering::Acquire)
    }

    /// Capture hints before sending a stat
    pub fn capture_hints(&self, now: u64) -> IsizeHints {
        IsizeHints {
            ignore_isize: self.write_back_count() > 0 || self.dirty_pages() > 0,
            time_before_remote_stat: now,
        }
    }

    /// Apply a server-reported size; returns false if it was refused as stale
    pub fn apply_remote_size(&self, remote_size: u64, hints: Option<&IsizeHints>) -> bool {
        let mut size = self.size.lock();

        if remote_size < *size && self.page_write.load(Ordering::Acquire) {
            let stale = self.no_isize_decrease()
                || self.write_back_count() > 0
                || hints.is_some_and(|h| {
                    h.ignore_isize || self.last_write_time() >= h.time_before_remote_stat
                });

            if stale {
                return false;
            }
        }

        *size = remote_size;
        true
    }

    /// Set the size without any checks
    pub fn set_size(&self, new_size: u64) {
        *self.size.lock() = new_size;
    }

    /// A local write ended at `end`; grows the size if needed
    ///
    /// `still_buffered` means the data has not reached storage yet, which
    /// blocks size decreases until it is written back.
    pub fn extend_local(&self, end: u64, now: u64, still_buffered: bool) -> bool {
        let mut size = self.size.lock();
        if end <= *size {
            return false;
        }

        *size = end;
        self.page_write.store(true, Ordering::Release);
        self.last_write_back_or_isize_write_time
            .store(now, Ordering::Release);
        if still_buffered {
            self.no_isize_decrease.store(true, Ordering::Release);
        }
        true
    }

    /// Local truncate; the new size is authoritative
    pub fn truncate_local(&self, new_size: u64, now: u64) {
        let mut size = self.size.lock();
        *size = new_size;
        self.last_write_back_or_isize_write_time
            .store(now, Ordering::Release);
    }

    pub fn add_dirty_pages(&self, pages: u64) {
        self.dirty_pages.fetch_add(pages, Ordering::AcqRel);
    }

    pub fn note_write_back_start(&self) {
        self.write_back_counter.fetch_add(1, Ordering::AcqRel);
    }

    /// A write-back worker finished sending `pages` pages
    pub fn note_write_back_done(&self, now: u64, pages: u64) {
        let _size = self.size.lock();

        self.last_write_back_or_isize_write_time
            .store(now, Ordering::Release);
        let _ = self
            .dirty_pages
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| Some(d.saturating_sub(pages)));
        let _ = self
            .write_back_counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));

        self.unset_no_isize_decrease_locked(false);
    }

    /// Buffered data reached storage outside the page write-back path
    pub fn note_data_persisted(&self, now: u64, still_buffered: bool) {
        let _size = self.size.lock();

        self.last_write_back_or_isize_write_time
            .store(now, Ordering::Release);
        self.unset_no_isize_decrease_locked(still_buffered);
    }

    fn unset_no_isize_decrease_locked(&self, still_buffered: bool) {
        if !still_buffered && self.write_back_count() == 0 && self.dirty_pages() == 0 {
            self.no_isize_decrease.store(false, Ordering::Release);
        }
    }
}
