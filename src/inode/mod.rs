//! Inodes
//!
//! An [`Inode`] ties together everything the client keeps per filesystem
//! object: the entry identity, the remote file handle table, the content
//! cache, range lock bookkeeping and the size consistency guard.
//!
//! Lock order, outermost first: append mutex, content cache lock, handle
//! table mutex, entry lock.

pub mod cache;
pub mod handles;
pub mod range_locks;
pub mod size;
pub mod store;
pub mod table;
pub mod writeback;

pub use cache::{CacheKind, ContentCache, WriteOffset};
pub use handles::{FileHandleTable, HandleGuard, HandleType};
pub use range_locks::RangeLockTable;
pub use size::{IsizeHints, SizeGuard};
pub use store::CachedInodeStore;
pub use table::{generate_inode_id, InodeIdStyle, InodeTable, ROOT_INODE};
pub use writeback::DirtyPage;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, MutexGuard};

use crate::config::ClientConfig;
use crate::context::ClientContext;
use crate::entry::{EntryHandle, EntryInfo, EntryType};
use crate::error::Result;
use crate::remote::{Attributes, RemoteIo};
use crate::striping::StripePattern;

/// Per-object client state
pub struct Inode {
    ino: u64,
    entry_type: EntryType,
    entry: EntryHandle,
    ctx: Arc<ClientContext>,
    /// Set on first open, never replaced
    pattern: OnceLock<Arc<StripePattern>>,
    handles: FileHandleTable,
    cache: ContentCache,
    range_locks: RangeLockTable,
    size: SizeGuard,
    append_lock: Mutex<()>,
    /// Reads/writes currently bypassing the cache because of mappings
    coherent_rw: AtomicU32,
    mappings: AtomicU32,
    /// Last attribute refresh in context ticks (0 = invalid)
    data_cache_time: AtomicU64,
    version: AtomicU64,
    weak_self: Weak<Inode>,
}

impl std::fmt::Debug for Inode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inode")
            .field("ino", &self.ino)
            .field("entry_id", &self.entry.entry_id())
            .field("entry_type", &self.entry_type)
            .field("size", &self.size.size())
            .finish()
    }
}

impl Inode {
    /// Create an inode; the root is numbered [`ROOT_INODE`]
    pub fn new(ctx: &Arc<ClientContext>, entry: EntryHandle, entry_type: EntryType) -> Arc<Inode> {
        let ino = if entry.is_root() {
            ROOT_INODE
        } else {
            generate_inode_id(entry.entry_id(), ctx.config().inode.id_style)
        };

        Arc::new_cyclic(|weak_self| Inode {
            ino,
            entry_type,
            entry,
            ctx: ctx.clone(),
            pattern: OnceLock::new(),
            handles: FileHandleTable::default(),
            cache: ContentCache::default(),
            range_locks: RangeLockTable::default(),
            size: SizeGuard::default(),
            append_lock: Mutex::new(()),
            coherent_rw: AtomicU32::new(0),
            mappings: AtomicU32::new(0),
            data_cache_time: AtomicU64::new(0),
            version: AtomicU64::new(0),
            weak_self: weak_self.clone(),
        })
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn entry(&self) -> &EntryHandle {
        &self.entry
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    pub fn is_directory(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    pub fn context(&self) -> &Arc<ClientContext> {
        &self.ctx
    }

    pub(crate) fn remote(&self) -> &dyn RemoteIo {
        self.ctx.remote()
    }

    /// Stripe pattern, once the file has been opened
    pub fn stripe_pattern(&self) -> Option<Arc<StripePattern>> {
        self.pattern.get().cloned()
    }

    pub fn handles(&self) -> &FileHandleTable {
        &self.handles
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn range_locks(&self) -> &RangeLockTable {
        &self.range_locks
    }

    pub fn size_guard(&self) -> &SizeGuard {
        &self.size
    }

    /// Locally known file size
    pub fn size(&self) -> u64 {
        self.size.size()
    }

    /// File version reported by the last remote open
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Serializes local appenders
    pub fn lock_append(&self) -> MutexGuard<'_, ()> {
        self.append_lock.lock()
    }

    // Memory mappings

    pub fn add_mapping(&self) {
        self.mappings.fetch_add(1, Ordering::AcqRel);
    }

    pub fn remove_mapping(&self) {
        let _ = self
            .mappings
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn has_mappings(&self) -> bool {
        self.mappings.load(Ordering::Acquire) > 0
    }

    pub fn coherent_rw_in_progress(&self) -> u32 {
        self.coherent_rw.load(Ordering::Acquire)
    }

    /// Mark a coherent read/write in progress until the guard drops
    pub(crate) fn begin_coherent_rw(&self) -> CoherentRwGuard<'_> {
        self.coherent_rw.fetch_add(1, Ordering::AcqRel);
        CoherentRwGuard { inode: self }
    }

    // Attribute cache

    /// Force the next validity check to fail
    pub fn invalidate_cache(&self) {
        self.data_cache_time.store(0, Ordering::Release);
    }

    /// Whether cached attributes are still within the validity window
    pub fn is_cache_valid(&self, config: &ClientConfig) -> bool {
        let refreshed = self.data_cache_time.load(Ordering::Acquire);
        if refreshed == 0 {
            return false;
        }

        let validity_ms = if self.is_directory() {
            config.cache.dir_subentry_validity_ms
        } else {
            config.cache.file_subentry_validity_ms
        };

        if validity_ms == 0 {
            return false;
        }

        let elapsed = self.ctx.now_ticks().saturating_sub(refreshed);
        elapsed < validity_ms.saturating_mul(1_000_000)
    }

    /// Stat the entry and apply the result through the size guard
    pub fn refresh(&self) -> Result<Attributes> {
        let hints = self.size.capture_hints(self.ctx.now_ticks());

        let attrs = {
            let info = self.entry.read_lock(self.remote())?;
            self.remote().stat(&info)?
        };

        self.apply_attributes(&attrs, Some(&hints));
        self.data_cache_time.store(self.ctx.now_ticks(), Ordering::Release);
        Ok(attrs)
    }

    /// Move the entry to a new parent and name
    ///
    /// The cached attributes no longer describe the renamed object and are
    /// dropped.
    pub fn update_on_rename(&self, new_parent: &EntryInfo, new_name: &str) -> Result<()> {
        {
            let mut info = self.entry.write_lock(self.remote())?;
            info.update_on_rename(new_parent, new_name);
        }

        self.invalidate_cache();
        Ok(())
    }

    /// Refresh only if cached attributes expired
    pub fn refresh_if_stale(&self) -> Result<()> {
        if !self.is_cache_valid(&self.ctx.config()) {
            self.refresh()?;
        }
        Ok(())
    }

    /// Apply server attributes to the local state
    ///
    /// Regular files go through the size guard; the root and directories
    /// take the server size as is.
    pub fn apply_attributes(&self, attrs: &Attributes, hints: Option<&IsizeHints>) -> bool {
        if self.entry.is_root() || self.is_directory() {
            self.size.set_size(attrs.size);
            return true;
        }

        let applied = self.size.apply_remote_size(attrs.size, hints);
        if !applied {
            tracing::trace!(
                ino = self.ino,
                remote_size = attrs.size,
                local_size = self.size.size(),
                "Ignoring stale remote size"
            );
        }
        applied
    }

    pub(crate) fn weak(&self) -> Weak<Inode> {
        self.weak_self.clone()
    }
}

/// Decrements the coherent read/write counter on drop
pub(crate) struct CoherentRwGuard<'a> {
    inode: &'a Inode,
}

impl Drop for CoherentRwGuard<'_> {
    fn drop(&mut self) {
        self.inode.coherent_rw.fetch_sub(1, Ordering::AcqRel);
    }
}
