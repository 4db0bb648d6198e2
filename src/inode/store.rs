//! Inodes with an attached content cache buffer

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::Error;
use crate::inode::Inode;

/// Weak registry of inodes holding a cache buffer
///
/// The background flusher walks it so buffered writes do not linger
/// indefinitely on idle files.
#[derive(Debug, Clone, Default)]
pub struct CachedInodeStore {
    /// Inode numbers may collide, so each number keeps a small bucket
    inodes: Arc<Mutex<HashMap<u64, Vec<Weak<Inode>>>>>,
}

impl CachedInodeStore {
    pub fn add(&self, ino: u64, inode: Weak<Inode>) {
        let mut inodes = self.inodes.lock();
        let bucket = inodes.entry(ino).or_default();
        if !bucket.iter().any(|w| w.ptr_eq(&inode)) {
            bucket.push(inode);
        }
    }

    /// Remove `inode` from the bucket of `ino`
    pub fn remove(&self, ino: u64, inode: &Weak<Inode>) {
        let mut inodes = self.inodes.lock();
        if let Some(bucket) = inodes.get_mut(&ino) {
            bucket.retain(|w| !w.ptr_eq(inode));
            if bucket.is_empty() {
                inodes.remove(&ino);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inodes.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush every registered inode whose cache lock is free
    ///
    /// Returns the number of inodes flushed.
    pub fn flush_all_no_wait(&self) -> usize {
        let live: Vec<Arc<Inode>> = {
            let mut inodes = self.inodes.lock();
            inodes.retain(|_, bucket| {
                bucket.retain(|w| w.strong_count() > 0);
                !bucket.is_empty()
            });
            inodes.values().flatten().filter_map(Weak::upgrade).collect()
        };

        let mut flushed = 0;
        for inode in live {
            match inode.flush_cache_no_wait() {
                Ok(()) => flushed += 1,
                Err(Error::InUse) => {
                    tracing::trace!(ino = inode.ino(), "Cache busy, skipping background flush")
                }
                Err(e) => tracing::warn!(ino = inode.ino(), "Background cache flush failed: {}", e),
            }
        }

        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::file::OpenFile;
    use crate::remote::OpenFlags;
    use crate::test_support::{file_inode, test_context, MockRemote};

    #[test]
    fn test_flush_all_writes_buffered_data() {
        let remote = MockRemote::new();
        let ctx = test_context(ClientConfig::default(), remote.clone());
        let inode = file_inode(&ctx, "f1");

        let file = OpenFile::open(&inode, OpenFlags::WRITE, 1, None, None).unwrap();
        let mut pos = 0;
        file.write(b"buffered", &mut pos).unwrap();
        assert_eq!(ctx.cached_inodes().len(), 1);
        assert_eq!(remote.calls().write, 0);

        assert_eq!(ctx.cached_inodes().flush_all_no_wait(), 1);
        assert_eq!(remote.file("f1"), b"buffered");
        assert!(ctx.cached_inodes().is_empty());
    }

    #[test]
    fn test_dropped_inodes_are_pruned() {
        let remote = MockRemote::new();
        let ctx = test_context(ClientConfig::default(), remote);
        let inode = file_inode(&ctx, "f1");

        ctx.cached_inodes().add(inode.ino(), Arc::downgrade(&inode));
        drop(inode);

        assert_eq!(ctx.cached_inodes().flush_all_no_wait(), 0);
        assert!(ctx.cached_inodes().is_empty());
    }

    #[test]
    fn test_colliding_numbers_keep_both_inodes() {
        let remote = MockRemote::new();
        let ctx = test_context(ClientConfig::default(), remote.clone());
        let a = file_inode(&ctx, "a");
        let b = file_inode(&ctx, "b");

        let store = CachedInodeStore::default();
        store.add(7, Arc::downgrade(&a));
        store.add(7, Arc::downgrade(&b));
        store.add(7, Arc::downgrade(&a));
        assert_eq!(store.len(), 2);

        let files: Vec<_> = [&a, &b]
            .into_iter()
            .map(|inode| {
                let file = OpenFile::open(inode, OpenFlags::WRITE, 1, None, None).unwrap();
                let mut pos = 0;
                file.write(b"pending", &mut pos).unwrap();
                file
            })
            .collect();
        assert_eq!(remote.calls().write, 0);

        assert_eq!(store.flush_all_no_wait(), 2);
        assert_eq!(remote.file("a"), b"pending");
        assert_eq!(remote.file("b"), b"pending");

        store.remove(7, &Arc::downgrade(&a));
        assert_eq!(store.len(), 1);
        store.remove(7, &Arc::downgrade(&b));
        assert!(store.is_empty());

        for file in files {
            file.release(1).unwrap();
        }
    }
}
