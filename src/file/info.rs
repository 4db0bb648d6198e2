//! Per open file description state

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use crate::inode::HandleType;
use crate::remote::OpenFlags;

/// Bound of the cache hit score in either direction
const CACHE_HITS_LIMIT: i32 = 8;

/// State of one open file description
#[derive(Debug)]
pub struct FileInfo {
    handle_type: HandleType,
    access: OpenFlags,
    appending: bool,
    allow_caching: bool,
    client_fd: u64,
    /// Process that opened the file; used when the file is dropped unreleased
    owner_pid: i32,
    /// Rolling guess whether caching would have helped recent accesses
    cache_hits: AtomicI32,
    last_read_offset: AtomicU64,
    last_write_offset: AtomicU64,
    used_entry_locking: AtomicBool,
}

impl FileInfo {
    pub fn new(
        handle_type: HandleType,
        access: OpenFlags,
        appending: bool,
        allow_caching: bool,
        client_fd: u64,
        owner_pid: i32,
    ) -> Self {
        Self {
            handle_type,
            access,
            appending,
            allow_caching,
            client_fd,
            owner_pid,
            cache_hits: AtomicI32::new(0),
            last_read_offset: AtomicU64::new(0),
            last_write_offset: AtomicU64::new(0),
            used_entry_locking: AtomicBool::new(false),
        }
    }

    /// The handle slot this file references
    pub fn handle_type(&self) -> HandleType {
        self.handle_type
    }

    pub fn access(&self) -> OpenFlags {
        self.access
    }

    pub fn is_appending(&self) -> bool {
        self.appending
    }

    pub fn allow_caching(&self) -> bool {
        self.allow_caching
    }

    pub fn client_fd(&self) -> u64 {
        self.client_fd
    }

    pub fn owner_pid(&self) -> i32 {
        self.owner_pid
    }

    pub fn cache_hits(&self) -> i32 {
        self.cache_hits.load(Ordering::Acquire)
    }

    pub fn inc_cache_hits(&self) {
        let _ = self.cache_hits.fetch_update(Ordering::AcqRel, Ordering::Acquire, |h| {
            Some((h + 1).min(CACHE_HITS_LIMIT))
        });
    }

    pub fn dec_cache_hits(&self) {
        let _ = self.cache_hits.fetch_update(Ordering::AcqRel, Ordering::Acquire, |h| {
            Some((h - 1).max(-CACHE_HITS_LIMIT))
        });
    }

    pub fn last_read_offset(&self) -> u64 {
        self.last_read_offset.load(Ordering::Acquire)
    }

    pub fn set_last_read_offset(&self, offset: u64) {
        self.last_read_offset.store(offset, Ordering::Release);
    }

    pub fn last_write_offset(&self) -> u64 {
        self.last_write_offset.load(Ordering::Acquire)
    }

    pub fn set_last_write_offset(&self, offset: u64) {
        self.last_write_offset.store(offset, Ordering::Release);
    }

    pub fn used_entry_locking(&self) -> bool {
        self.used_entry_locking.load(Ordering::Acquire)
    }

    pub fn set_used_entry_locking(&self) {
        self.used_entry_locking.store(true, Ordering::Release);
    }
}
