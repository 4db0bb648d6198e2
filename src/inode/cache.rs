//! Content cache
//!
//! A single read-ahead or write-combine buffer per inode, borrowed from
//! the context's buffer pool. The buffer is either absent, a read buffer
//! or a write buffer; a write buffer is always sent to storage before it
//! goes away.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::buffer_pool::PooledBuffer;
use crate::error::{Error, Result};
use crate::inode::Inode;
use crate::remote::{IoInfo, LockKind, OpenFlags};

/// File offset of a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOffset {
    At(u64),
    /// Append at the end of file, resolved when the data is sent
    Append,
}

/// Observable state of the content cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    None,
    Read,
    Write,
}

/// Read-ahead data
#[derive(Debug)]
pub(crate) struct ReadCache {
    pub(crate) buf: PooledBuffer,
    pub(crate) used_len: usize,
    pub(crate) max_len: usize,
    pub(crate) offset: u64,
}

impl ReadCache {
    /// Exclusive end offset of the cached range
    pub(crate) fn end(&self) -> u64 {
        self.offset + self.used_len as u64
    }
}

/// Combined writes not yet sent to storage
#[derive(Debug)]
pub(crate) struct WriteCache {
    pub(crate) buf: PooledBuffer,
    pub(crate) used_len: usize,
    pub(crate) max_len: usize,
    pub(crate) offset: WriteOffset,
}

#[derive(Debug, Default)]
pub(crate) enum CacheBuffer {
    #[default]
    Empty,
    Read(ReadCache),
    Write(WriteCache),
}

impl CacheBuffer {
    pub(crate) fn kind(&self) -> CacheKind {
        match self {
            CacheBuffer::Empty => CacheKind::None,
            CacheBuffer::Read(_) => CacheKind::Read,
            CacheBuffer::Write(_) => CacheKind::Write,
        }
    }
}

/// Per-inode cache slot behind a reader/writer lock
#[derive(Debug, Default)]
pub struct ContentCache {
    state: RwLock<CacheBuffer>,
}

impl ContentCache {
    pub fn kind(&self) -> CacheKind {
        self.state.read().kind()
    }

    pub(crate) fn shared(&self) -> RwLockReadGuard<'_, CacheBuffer> {
        self.state.read()
    }

    pub(crate) fn exclusive(&self) -> RwLockWriteGuard<'_, CacheBuffer> {
        self.state.write()
    }

    pub(crate) fn try_exclusive(&self) -> Option<RwLockWriteGuard<'_, CacheBuffer>> {
        self.state.try_write()
    }
}

impl Inode {
    /// Current cache state
    pub fn cache_kind(&self) -> CacheKind {
        self.cache.kind()
    }

    /// Send buffered writes to storage and drop the cache buffer
    pub fn flush_cache(&self) -> Result<()> {
        let mut state = self.cache.exclusive();
        self.flush_cache_locked(&mut state)
    }

    /// Like [`Inode::flush_cache`], but fails with `InUse` instead of
    /// waiting for the cache lock
    pub fn flush_cache_no_wait(&self) -> Result<()> {
        match self.cache.try_exclusive() {
            Some(mut state) => self.flush_cache_locked(&mut state),
            None => Err(Error::InUse),
        }
    }

    /// Flush with the cache lock held
    ///
    /// Afterwards the cache is empty and the buffer is back in the pool,
    /// whether or not the write succeeded.
    pub(crate) fn flush_cache_locked(&self, state: &mut CacheBuffer) -> Result<()> {
        match std::mem::take(state) {
            CacheBuffer::Empty => Ok(()),
            CacheBuffer::Read(_) => {
                self.unregister_cached();
                Ok(())
            }
            CacheBuffer::Write(cache) => {
                self.unregister_cached();

                let expected = cache.used_len;
                let result = self.write_stateless(cache.offset, &cache.buf[..expected]);
                drop(cache);

                match result {
                    Ok(written) if written == expected => Ok(()),
                    Ok(written) => {
                        tracing::warn!(
                            ino = self.ino,
                            written,
                            expected,
                            "Short write while flushing cache"
                        );
                        Err(Error::NoSpace)
                    }
                    Err(e) => {
                        tracing::warn!(ino = self.ino, "Flushing cache failed: {}", e);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Drop the cache content without writing anything
    ///
    /// Only for read buffers or after the write buffer was sent.
    pub(crate) fn discard_cache_locked(&self, state: &mut CacheBuffer) {
        if !matches!(state, CacheBuffer::Empty) {
            *state = CacheBuffer::Empty;
            self.unregister_cached();
        }
    }

    pub(crate) fn register_cached(&self) {
        self.ctx.cached_inodes().add(self.ino, self.weak());
    }

    fn unregister_cached(&self) {
        self.ctx.cached_inodes().remove(self.ino, &self.weak());
    }

    /// Write without an open file, using a temporary write handle
    pub fn write_stateless(&self, offset: WriteOffset, data: &[u8]) -> Result<usize> {
        let guard = self.acquire_handle(OpenFlags::WRITE, true)?;
        let written = self.write_through(guard.io(), offset, data)?;

        self.size.note_data_persisted(self.ctx.now_ticks(), false);
        Ok(written)
    }

    /// Send data straight to storage
    pub(crate) fn write_through(&self, io: &IoInfo, offset: WriteOffset, data: &[u8]) -> Result<usize> {
        match offset {
            WriteOffset::At(offset) => {
                tracing::trace!(ino = self.ino, offset, len = data.len(), "Remote write");
                self.remote().write(io, offset, data)
            }
            WriteOffset::Append => self.append_file(io, data),
        }
    }

    /// Read straight from storage
    pub(crate) fn read_direct(&self, io: &IoInfo, offset: u64, buf: &mut [u8]) -> Result<usize> {
        tracing::trace!(ino = self.ino, offset, len = buf.len(), "Remote read");
        self.remote().read(io, offset, buf)
    }

    /// Append under the cluster-wide append lock
    ///
    /// Takes the lock, stats for the current size, writes there and always
    /// drops the lock again. Lock failures leave a cleanup mark on the
    /// handle.
    pub fn append_file(&self, io: &IoInfo, data: &[u8]) -> Result<usize> {
        let info = self.entry.read_lock(self.remote())?.clone();

        if let Err(e) = self.remote().lock_append(&info, io, LockKind::Exclusive) {
            io.targets.set_needs_append_lock_cleanup();
            return Err(e);
        }

        let result = self.remote().stat(&info).and_then(|attrs| {
            let written = self.remote().write(io, attrs.size, data)?;
            Ok((attrs.size, written))
        });

        if let Err(e) = self.remote().lock_append(&info, io, LockKind::Unlock) {
            tracing::warn!(ino = self.ino, "Releasing append lock failed: {}", e);
            io.targets.set_needs_append_lock_cleanup();
        }

        let (offset, written) = result?;
        self.size
            .extend_local(offset + written as u64, self.ctx.now_ticks(), false);
        Ok(written)
    }

    /// Number of buffered bytes waiting for a flush
    pub fn dirty_cached_bytes(&self) -> usize {
        match &*self.cache.shared() {
            CacheBuffer::Write(w) => w.used_len,
            _ => 0,
        }
    }
}
