//! Entry handle
//!
//! Reader/writer lock around an [`EntryInfo`]. The entry ID never changes
//! after creation and is kept outside the lock so it can be compared from
//! lookup callbacks that must not block. The root handle starts out empty
//! and fetches its identity from the metadata server on first access.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::entry::{EntryInfo, EntryType, ROOT_ENTRY_ID};
use crate::error::Result;
use crate::remote::RemoteIo;

/// Lock-protected identity of one inode
#[derive(Debug)]
pub struct EntryHandle {
    entry_id: Box<str>,
    is_root: bool,
    root_initialized: AtomicBool,
    info: RwLock<EntryInfo>,
}

impl EntryHandle {
    pub fn new(info: EntryInfo) -> Self {
        Self {
            entry_id: info.entry_id.clone().into_boxed_str(),
            is_root: false,
            root_initialized: AtomicBool::new(true),
            info: RwLock::new(info),
        }
    }

    /// Handle for the mount root; identity is fetched lazily
    pub fn new_root() -> Self {
        Self {
            entry_id: Box::from(""),
            is_root: true,
            root_initialized: AtomicBool::new(false),
            info: RwLock::new(EntryInfo {
                entry_type: EntryType::Directory,
                ..EntryInfo::default()
            }),
        }
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Immutable entry ID, readable without the lock (empty for the root)
    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    /// Compare against a candidate ID without locking or allocating
    ///
    /// The root is matched by [`ROOT_ENTRY_ID`]. Safe to call while the
    /// caller holds an inode table lock.
    pub fn compare_id(&self, candidate: &str) -> bool {
        if self.is_root {
            return candidate == ROOT_ENTRY_ID;
        }
        &*self.entry_id == candidate
    }

    /// Shared access to the entry info
    pub fn read_lock(&self, remote: &dyn RemoteIo) -> Result<RwLockReadGuard<'_, EntryInfo>> {
        if self.needs_root_init() {
            drop(self.write_lock(remote)?);
        }
        Ok(self.info.read())
    }

    /// Exclusive access to the entry info, initializing the root if needed
    pub fn write_lock(&self, remote: &dyn RemoteIo) -> Result<RwLockWriteGuard<'_, EntryInfo>> {
        let mut info = self.info.write();

        // another thread may have won the race for the root fetch
        if self.needs_root_init() {
            let fetched = remote.fetch_root_entry_info()?;
            tracing::debug!(entry_id = %fetched.entry_id, "Fetched root entry info");
            *info = fetched;
            self.root_initialized.store(true, Ordering::Release);
        }

        Ok(info)
    }

    /// Clone of the current entry info
    pub fn snapshot(&self, remote: &dyn RemoteIo) -> Result<EntryInfo> {
        Ok(self.read_lock(remote)?.clone())
    }

    fn needs_root_init(&self) -> bool {
        self.is_root && !self.root_initialized.load(Ordering::Acquire)
    }
}
