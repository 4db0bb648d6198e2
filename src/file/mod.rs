//! Open files
//!
//! An [`OpenFile`] is one open file description on top of an [`Inode`]. It
//! references a slot in the inode's handle table for its whole lifetime and
//! routes reads and writes through the inode's content cache.

pub mod info;
mod io;
mod locks;
mod sync;

pub use info::FileInfo;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::inode::Inode;
use crate::remote::{LookupOpenInfo, OpenFlags};

/// One open file description
pub struct OpenFile {
    inode: Arc<Inode>,
    info: FileInfo,
    /// Mount-relative path, used for file events
    path: Option<String>,
    released: bool,
}

impl std::fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenFile")
            .field("ino", &self.inode.ino())
            .field("info", &self.info)
            .field("path", &self.path)
            .finish()
    }
}

impl OpenFile {
    /// Open `inode` with the given flags on behalf of process `owner_pid`
    ///
    /// `lookup` carries a handle obtained by a combined lookup+open; when
    /// present no separate remote open is sent.
    pub fn open(
        inode: &Arc<Inode>,
        flags: OpenFlags,
        owner_pid: i32,
        lookup: Option<LookupOpenInfo>,
        path: Option<&str>,
    ) -> Result<Self> {
        let config = inode.context().config();
        let handle_type = inode.reference_handle(flags, false, lookup, path)?;

        let appending = flags.contains(OpenFlags::APPEND);
        let allow_caching = config.buffered_cache_enabled()
            && !flags.contains(OpenFlags::DIRECT)
            && !(appending && !config.locking.use_buffered_append);

        let info = FileInfo::new(
            handle_type,
            flags.access_only(),
            appending,
            allow_caching,
            inode.context().next_client_fd(),
            owner_pid,
        );

        debug!(
            ino = inode.ino(),
            ?handle_type,
            appending,
            allow_caching,
            "Opened file"
        );

        Ok(Self {
            inode: inode.clone(),
            info,
            path: path.map(str::to_string),
            released: false,
        })
    }

    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Close the file description for `owner_pid`
    ///
    /// Flushes buffered writes, drops locks still held through this file and
    /// releases the handle reference. Every step runs even if an earlier one
    /// failed; the first error is returned.
    pub fn release(mut self, owner_pid: i32) -> Result<()> {
        self.released = true;
        self.release_inner(owner_pid)
    }

    fn release_inner(&self, owner_pid: i32) -> Result<()> {
        let mut result = Ok(());

        if let Err(e) = self.inode.flush_cache() {
            warn!(ino = self.inode.ino(), "Flushing cache on release failed: {}", e);
            result = Err(e);
        }

        self.cancel_locks(owner_pid);

        if let Err(e) = self
            .inode
            .release_handle(self.info.handle_type(), self.path())
        {
            if result.is_ok() {
                result = Err(e);
            }
        }

        self.inode.invalidate_cache();
        result
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        if !self.released {
            debug!(ino = self.inode.ino(), "Open file dropped without release");
            let _ = self.release_inner(self.info.owner_pid());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::error::Error;
    use crate::inode::{CacheKind, HandleType};
    use crate::remote::LockKind;
    use crate::test_support::{file_inode, test_context, MockOp, MockRemote, RemoteCall};

    fn fixture(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_read_ahead_then_close() {
        let remote = MockRemote::new();
        let ctx = test_context(ClientConfig::default(), remote.clone());
        let inode = file_inode(&ctx, "f1");
        let content = fixture(8192);
        remote.set_file("f1", &content);

        let file = OpenFile::open(&inode, OpenFlags::READ, 1, None, None).unwrap();
        assert_eq!(inode.handles().ref_count(HandleType::Read), 1);

        let mut buf = vec![0u8; 4096];
        let mut pos = 0;
        assert_eq!(file.read(&mut buf, &mut pos).unwrap(), 4096);
        assert_eq!(pos, 4096);
        assert_eq!(buf, content[..4096]);

        let reads: Vec<_> = remote
            .log()
            .into_iter()
            .filter(|c| matches!(c, RemoteCall::Read { .. }))
            .collect();
        assert_eq!(reads.len(), 1);
        assert!(matches!(reads[0], RemoteCall::Read { offset: 0, len } if len >= 4096));

        file.release(1).unwrap();
        assert_eq!(inode.handles().ref_count(HandleType::Read), 0);
        assert_eq!(remote.calls().close, 1);
        assert_eq!(ctx.cache_buffers().outstanding(), 0);
    }

    #[test]
    fn test_overlapping_writes_merge() {
        let remote = MockRemote::new();
        let ctx = test_context(ClientConfig::default(), remote.clone());
        let inode = file_inode(&ctx, "f1");

        let file = OpenFile::open(&inode, OpenFlags::WRITE, 1, None, None).unwrap();
        let mut pos = 0;
        file.write(&[1u8; 100], &mut pos).unwrap();
        pos = 50;
        file.write(&[2u8; 100], &mut pos).unwrap();
        assert_eq!(pos, 150);
        assert_eq!(remote.calls().write, 0);
        assert_eq!(inode.cache_kind(), CacheKind::Write);

        file.flush().unwrap();

        let writes: Vec<_> = remote
            .log()
            .into_iter()
            .filter(|c| matches!(c, RemoteCall::Write { .. }))
            .collect();
        assert_eq!(writes, vec![RemoteCall::Write { offset: 0, len: 150 }]);

        let stored = remote.file("f1");
        assert_eq!(stored.len(), 150);
        assert!(stored[..50].iter().all(|&b| b == 1));
        assert!(stored[50..].iter().all(|&b| b == 2));
        file.release(1).unwrap();
    }

    #[test]
    fn test_local_append_stats_then_writes() {
        let remote = MockRemote::new();
        let ctx = test_context(ClientConfig::default(), remote.clone());
        let inode = file_inode(&ctx, "f1");
        remote.set_file("f1", &[7u8; 100]);

        let file =
            OpenFile::open(&inode, OpenFlags::WRITE | OpenFlags::APPEND, 1, None, None).unwrap();
        assert!(!file.info().allow_caching());
        remote.clear_log();

        let mut pos = 0;
        assert_eq!(file.write(b"0123456789", &mut pos).unwrap(), 10);
        assert_eq!(pos, 110);
        assert_eq!(
            remote.log(),
            vec![RemoteCall::Stat, RemoteCall::Write { offset: 100, len: 10 }]
        );
        assert_eq!(inode.size(), 110);
        file.release(1).unwrap();
    }

    #[test]
    fn test_global_append_goes_through_append_lock() {
        let remote = MockRemote::new();
        let mut config = ClientConfig::default();
        config.locking.use_global_append_locks = true;
        config.locking.use_buffered_append = false;
        let ctx = test_context(config, remote.clone());
        let inode = file_inode(&ctx, "f1");
        remote.set_file("f1", b"abc");

        let file =
            OpenFile::open(&inode, OpenFlags::WRITE | OpenFlags::APPEND, 1, None, None).unwrap();
        let mut pos = 0;
        file.write(b"def", &mut pos).unwrap();

        assert_eq!(remote.file("f1"), b"abcdef");
        assert_eq!(pos, 6);
        assert_eq!(remote.calls().lock_append, 2);
        file.release(1).unwrap();
    }

    #[test]
    fn test_buffered_global_append_reports_end_position() {
        let remote = MockRemote::new();
        let mut config = ClientConfig::default();
        config.locking.use_global_append_locks = true;
        config.locking.use_buffered_append = true;
        let ctx = test_context(config, remote.clone());
        let inode = file_inode(&ctx, "f1");
        remote.set_file("f1", b"abc");
        inode.refresh().unwrap();

        let file =
            OpenFile::open(&inode, OpenFlags::WRITE | OpenFlags::APPEND, 1, None, None).unwrap();
        assert!(file.info().allow_caching());

        let mut pos = 0;
        file.write(b"def", &mut pos).unwrap();
        assert_eq!(inode.cache_kind(), CacheKind::Write);
        assert_eq!(pos, 6);

        file.write(b"gh", &mut pos).unwrap();
        assert_eq!(pos, 8);
        assert_eq!(remote.calls().write, 0);

        file.release(1).unwrap();
        assert_eq!(remote.file("f1"), b"abcdefgh");
    }

    #[test]
    fn test_direct_io_never_caches() {
        let remote = MockRemote::new();
        let ctx = test_context(ClientConfig::default(), remote.clone());
        let inode = file_inode(&ctx, "f1");

        let file =
            OpenFile::open(&inode, OpenFlags::WRITE | OpenFlags::DIRECT, 1, None, None).unwrap();
        let mut pos = 0;
        file.write(b"abc", &mut pos).unwrap();

        assert_eq!(inode.cache_kind(), CacheKind::None);
        assert_eq!(remote.calls().write, 1);
        file.release(1).unwrap();
    }

    #[test]
    fn test_release_flushes_and_cancels_locks() {
        let remote = MockRemote::new();
        let mut config = ClientConfig::default();
        config.locking.use_global_file_locks = true;
        let ctx = test_context(config, remote.clone());
        let inode = file_inode(&ctx, "f1");

        let file = OpenFile::open(&inode, OpenFlags::READ_WRITE, 1, None, None).unwrap();
        file.flock(42, LockKind::Exclusive).unwrap();
        file.lock_range(42, LockKind::Shared, 0, 99).unwrap();

        let mut pos = 0;
        file.write(b"pending", &mut pos).unwrap();
        assert_eq!(inode.cache_kind(), CacheKind::Write);
        remote.clear_log();

        file.release(42).unwrap();

        let log = remote.log();
        assert_eq!(log[0], RemoteCall::Write { offset: 0, len: 7 });
        assert!(log.contains(&RemoteCall::LockEntry(LockKind::Unlock)));
        assert!(log.contains(&RemoteCall::LockRange {
            kind: LockKind::Unlock,
            start: 0,
            end: u64::MAX
        }));
        assert_eq!(*log.last().unwrap(), RemoteCall::Close);
        assert!(inode.range_locks().is_empty());
        assert_eq!(ctx.cache_buffers().outstanding(), 0);
    }

    #[test]
    fn test_release_reports_flush_error_but_still_closes() {
        let remote = MockRemote::new();
        let ctx = test_context(ClientConfig::default(), remote.clone());
        let inode = file_inode(&ctx, "f1");

        let file = OpenFile::open(&inode, OpenFlags::WRITE, 1, None, None).unwrap();
        let mut pos = 0;
        file.write(b"lost", &mut pos).unwrap();
        remote.fail_next(MockOp::Write, Error::NoSpace);

        assert!(matches!(file.release(1), Err(Error::NoSpace)));
        assert_eq!(inode.handles().ref_count(HandleType::Write), 0);
        assert_eq!(remote.calls().close, 1);
        assert_eq!(ctx.cache_buffers().outstanding(), 0);
    }

    #[test]
    fn test_drop_releases_handle() {
        let remote = MockRemote::new();
        let ctx = test_context(ClientConfig::default(), remote.clone());
        let inode = file_inode(&ctx, "f1");

        {
            let _file = OpenFile::open(&inode, OpenFlags::READ, 1, None, None).unwrap();
            assert_eq!(inode.handles().ref_count(HandleType::Read), 1);
        }

        assert_eq!(inode.handles().ref_count(HandleType::Read), 0);
        assert_eq!(remote.calls().close, 1);
    }

    #[test]
    fn test_drop_cancels_range_locks_of_opener() {
        let remote = MockRemote::new();
        let mut config = ClientConfig::default();
        config.locking.use_global_file_locks = true;
        let ctx = test_context(config, remote.clone());
        let inode = file_inode(&ctx, "f1");

        {
            let file = OpenFile::open(&inode, OpenFlags::READ, 42, None, None).unwrap();
            assert_eq!(file.info().owner_pid(), 42);
            file.lock_range(42, LockKind::Exclusive, 0, 99).unwrap();
            remote.clear_log();
        }

        assert!(inode.range_locks().is_empty());
        assert!(remote.log().contains(&RemoteCall::LockRange {
            kind: LockKind::Unlock,
            start: 0,
            end: u64::MAX
        }));
        assert_eq!(remote.calls().close, 1);
    }
}
