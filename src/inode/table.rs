//! Inode table
//!
//! Maps inode numbers to inodes. Inode numbers are hashes of the entry ID,
//! so one number can belong to several entries; lookups resolve that with
//! [`EntryHandle::compare_id`](crate::entry::EntryHandle::compare_id) while
//! holding the table mutex.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::context::ClientContext;
use crate::entry::{EntryHandle, EntryInfo, EntryType};
use crate::inode::Inode;

/// Inode number of the mount root
pub const ROOT_INODE: u64 = 2;

/// Hash used to derive inode numbers from entry IDs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InodeIdStyle {
    /// 32-bit numbers for legacy userspace
    Hash32,
    #[default]
    Hash64,
}

/// Derive a reproducible inode number from an entry ID
///
/// Numbers up to [`ROOT_INODE`] are reserved; a hash landing there is
/// redone with a NUL byte appended to the input.
pub fn generate_inode_id(entry_id: &str, style: InodeIdStyle) -> u64 {
    let mut input = entry_id.as_bytes().to_vec();

    loop {
        let id = match style {
            InodeIdStyle::Hash32 => u64::from(crc32fast::hash(&input)),
            InodeIdStyle::Hash64 => {
                let digest = Sha256::digest(&input);
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&digest[..8]);
                u64::from_le_bytes(bytes)
            }
        };

        if id > ROOT_INODE {
            return id;
        }

        input.push(0);
    }
}

/// All live inodes of a mount
pub struct InodeTable {
    ctx: Arc<ClientContext>,
    root: Arc<Inode>,
    inodes: Mutex<HashMap<u64, Vec<Arc<Inode>>>>,
}

impl InodeTable {
    pub fn new(ctx: Arc<ClientContext>) -> Self {
        let root = Inode::new(&ctx, EntryHandle::new_root(), EntryType::Directory);
        Self {
            ctx,
            root,
            inodes: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Arc<Inode> {
        &self.root
    }

    /// Find the inode for `info` or create it
    pub fn get_or_insert(&self, info: EntryInfo) -> Arc<Inode> {
        let ino = generate_inode_id(&info.entry_id, self.ctx.config().inode.id_style);
        let mut inodes = self.inodes.lock();
        let bucket = inodes.entry(ino).or_default();

        if let Some(existing) = bucket.iter().find(|i| i.entry().compare_id(&info.entry_id)) {
            return existing.clone();
        }

        if !bucket.is_empty() {
            tracing::debug!(ino, entry_id = %info.entry_id, "Inode number collision");
        }

        let entry_type = info.entry_type;
        let inode = Inode::new(&self.ctx, EntryHandle::new(info), entry_type);
        bucket.push(inode.clone());
        inode
    }

    /// Find a live inode by entry ID
    pub fn lookup(&self, entry_id: &str) -> Option<Arc<Inode>> {
        if self.root.entry().compare_id(entry_id) {
            return Some(self.root.clone());
        }

        let ino = generate_inode_id(entry_id, self.ctx.config().inode.id_style);
        let inodes = self.inodes.lock();
        inodes
            .get(&ino)?
            .iter()
            .find(|i| i.entry().compare_id(entry_id))
            .cloned()
    }

    /// Remove an inode from the table
    pub fn evict(&self, entry_id: &str) -> Option<Arc<Inode>> {
        let ino = generate_inode_id(entry_id, self.ctx.config().inode.id_style);
        let mut inodes = self.inodes.lock();
        let bucket = inodes.get_mut(&ino)?;
        let pos = bucket.iter().position(|i| i.entry().compare_id(entry_id))?;
        let inode = bucket.swap_remove(pos);

        if bucket.is_empty() {
            inodes.remove(&ino);
        }

        Some(inode)
    }

    /// Number of inodes excluding the root
    pub fn len(&self) -> usize {
        self.inodes.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::entry::NodeOrGroup;
    use crate::test_support::{test_context, MockRemote};

    fn file_info(id: &str) -> EntryInfo {
        EntryInfo::new(NodeOrGroup::node(1), "root", id, id, EntryType::Regular)
    }

    #[test]
    fn test_inode_ids_are_stable() {
        let a = generate_inode_id("1-5F3A-2", InodeIdStyle::Hash64);
        let b = generate_inode_id("1-5F3A-2", InodeIdStyle::Hash64);
        assert_eq!(a, b);
        assert!(a > ROOT_INODE);

        let small = generate_inode_id("1-5F3A-2", InodeIdStyle::Hash32);
        assert!(small <= u64::from(u32::MAX));
        assert!(small > ROOT_INODE);
    }

    #[test]
    fn test_get_or_insert_reuses_inode() {
        let ctx = test_context(ClientConfig::default(), MockRemote::new());
        let table = InodeTable::new(ctx);

        let a = table.get_or_insert(file_info("e1"));
        let b = table.get_or_insert(file_info("e1"));
        let c = table.get_or_insert(file_info("e2"));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_lookup_and_evict() {
        let ctx = test_context(ClientConfig::default(), MockRemote::new());
        let table = InodeTable::new(ctx);

        assert!(table.lookup("root").is_some());
        assert!(table.lookup("e1").is_none());

        table.get_or_insert(file_info("e1"));
        assert!(table.lookup("e1").is_some());

        assert!(table.evict("e1").is_some());
        assert!(table.lookup("e1").is_none());
        assert!(table.is_empty());
    }
}
