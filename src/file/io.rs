//! Cached reads and writes

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::inode::cache::{CacheBuffer, ReadCache, WriteCache};
use crate::inode::{CacheKind, CoherentRwGuard, WriteOffset};
use crate::remote::IoInfo;

use super::OpenFile;

enum ReadAction {
    Fill,
    FlushWrite,
    Discard,
    Overlap,
}

enum WriteAction {
    Fill,
    DiscardRead,
    Extend(usize),
    Flush,
}

impl OpenFile {
    /// Read at `*pos` and advance it by the number of bytes read
    ///
    /// Holes inside the file come back as zeroes; a short read only happens
    /// at end of file.
    pub fn read(&self, buf: &mut [u8], pos: &mut u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let config = self.inode.context().config();
        let io = self.inode.io_info(self.info.handle_type())?;
        let _coherent = self.sync_mapped_pages(&config)?;

        let offset = *pos;
        let mut read = self.read_cached(&config, &io, buf, offset)?;
        *pos = offset + read as u64;

        if read < buf.len() && self.inode.size() > *pos {
            let sparse = self.read_sparse(&io, &mut buf[read..], *pos)?;
            read += sparse;
            *pos += sparse as u64;
        }

        self.info.set_last_read_offset(*pos);
        Ok(read)
    }

    /// Write at `*pos` (or at end of file for appending files) and move
    /// `*pos` past the written data
    pub fn write(&self, data: &[u8], pos: &mut u64) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        if !self.info.handle_type().can_write() {
            return Err(Error::Internal("file not open for writing".into()));
        }

        let config = self.inode.context().config();
        let io = self.inode.io_info(self.info.handle_type())?;
        let _coherent = self.sync_mapped_pages(&config)?;

        if self.info.is_appending() && config.locking.use_global_append_locks {
            let written = self.write_cached(&config, &io, data, WriteOffset::Append)?;
            // buffered appends are not part of the local size until flushed
            *pos = self.inode.size() + self.inode.dirty_cached_bytes() as u64;
            self.info.set_last_write_offset(*pos);
            return Ok(written);
        }

        let _append = self.info.is_appending().then(|| self.inode.lock_append());
        let offset = if self.info.is_appending() {
            self.inode.flush_cache()?;
            self.inode.refresh()?;
            self.inode.size()
        } else {
            *pos
        };

        let written = self.write_cached(&config, &io, data, WriteOffset::At(offset))?;
        let end = offset + written as u64;

        self.info.set_last_write_offset(end);
        let buffered = self.inode.cache_kind() == CacheKind::Write;
        self.inode
            .size_guard()
            .extend_local(end, self.inode.context().now_ticks(), buffered);

        *pos = end;
        Ok(written)
    }

    fn caching_enabled(&self, config: &ClientConfig) -> bool {
        self.info.allow_caching() && config.buffered_cache_enabled()
    }

    /// Push dirty mapped pages out and drop them before a coherent access
    fn sync_mapped_pages(&self, config: &ClientConfig) -> Result<Option<CoherentRwGuard<'_>>> {
        if !config.cache.coherent_buffers || !self.inode.has_mappings() {
            return Ok(None);
        }

        let page_cache = self.inode.context().page_cache();
        page_cache.write_and_wait(self.inode.ino())?;
        page_cache.invalidate(self.inode.ino());
        Ok(Some(self.inode.begin_coherent_rw()))
    }

    // Reads

    fn read_cached(
        &self,
        config: &ClientConfig,
        io: &IoInfo,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<usize> {
        if config.cache.coherent_buffers && self.inode.has_mappings() {
            return self.inode.read_direct(io, offset, buf);
        }

        if self.inode.is_open_by_multiple_readers() || !self.caching_enabled(config) {
            let state = self.inode.cache().shared();
            if matches!(*state, CacheBuffer::Empty) {
                return self.inode.read_direct(io, offset, buf);
            }
        }

        let mut state = self.inode.cache().exclusive();
        let action = match &*state {
            CacheBuffer::Empty => ReadAction::Fill,
            CacheBuffer::Write(_) => ReadAction::FlushWrite,
            CacheBuffer::Read(cache) => {
                if offset < cache.end() && offset + buf.len() as u64 > cache.offset {
                    ReadAction::Overlap
                } else {
                    ReadAction::Discard
                }
            }
        };

        match action {
            ReadAction::Fill => {
                self.score_read(config, offset);
                self.read_cache_flushed(&mut state, config, io, buf, offset)
            }
            ReadAction::FlushWrite => {
                self.info.dec_cache_hits();
                self.inode.flush_cache_locked(&mut state)?;
                self.read_cache_flushed(&mut state, config, io, buf, offset)
            }
            ReadAction::Discard => {
                self.info.dec_cache_hits();
                self.inode.discard_cache_locked(&mut state);
                self.read_cache_flushed(&mut state, config, io, buf, offset)
            }
            ReadAction::Overlap => {
                self.info.inc_cache_hits();
                self.read_from_cache(&mut state, config, io, buf, offset)
            }
        }
    }

    /// Serve a read that overlaps the read buffer
    fn read_from_cache(
        &self,
        state: &mut CacheBuffer,
        config: &ClientConfig,
        io: &IoInfo,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<usize> {
        let CacheBuffer::Read(cache) = &*state else {
            return Err(Error::Internal("read buffer vanished under lock".into()));
        };
        let (start, end) = (cache.offset, cache.end());

        let mut done = 0;
        if offset < start {
            let lead = (start - offset) as usize;
            let n = self.inode.read_direct(io, offset, &mut buf[..lead])?;
            if n < lead {
                self.inode.discard_cache_locked(state);
                return Ok(n);
            }
            done = lead;
        }

        let copy_from = offset + done as u64;
        let copy_len = (end.min(offset + buf.len() as u64) - copy_from) as usize;
        if let CacheBuffer::Read(cache) = &*state {
            let at = (copy_from - cache.offset) as usize;
            buf[done..done + copy_len].copy_from_slice(&cache.buf[at..at + copy_len]);
        }
        done += copy_len;

        if done < buf.len() {
            self.inode.discard_cache_locked(state);
            let tail_offset = offset + done as u64;
            done += self.read_cache_flushed(state, config, io, &mut buf[done..], tail_offset)?;
        }

        Ok(done)
    }

    /// Read with an empty cache, filling a new read buffer if worthwhile
    fn read_cache_flushed(
        &self,
        state: &mut CacheBuffer,
        config: &ClientConfig,
        io: &IoInfo,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<usize> {
        if !self.caching_enabled(config)
            || self.info.cache_hits() <= 0
            || self.inode.is_open_by_multiple_readers()
        {
            return self.inode.read_direct(io, offset, buf);
        }

        let pool = self.inode.context().cache_buffers();
        let mut max_len = io
            .pattern
            .bytes_left_in_chunk(offset)
            .min(pool.buf_size() as u64) as usize;
        if buf.len() >= max_len {
            return self.inode.read_direct(io, offset, buf);
        }

        let Some(mut cache_buf) = pool.instant_buf() else {
            return self.inode.read_direct(io, offset, buf);
        };

        // Small first reads only fetch a little ahead
        let slow_start = config.cache.slow_start_read_len;
        if offset == 0 && buf.len() < slow_start {
            max_len = max_len.min(slow_start);
        }

        let n = self
            .inode
            .read_direct(io, offset, &mut cache_buf[..max_len])?;
        if n == 0 {
            return Ok(0);
        }

        let copied = buf.len().min(n);
        buf[..copied].copy_from_slice(&cache_buf[..copied]);

        *state = CacheBuffer::Read(ReadCache {
            buf: cache_buf,
            used_len: n,
            max_len,
            offset,
        });
        self.inode.register_cached();
        Ok(copied)
    }

    /// Continue a short read below the known file size, zero-filling holes
    fn read_sparse(&self, io: &IoInfo, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.inode.refresh()?;

        let size = self.inode.size();
        if size <= offset {
            return Ok(0);
        }

        let len = (size - offset).min(buf.len() as u64) as usize;
        let mut done = 0;
        while done < len {
            let cur = offset + done as u64;
            let chunk = io.pattern.bytes_left_in_chunk(cur).min((len - done) as u64) as usize;
            let n = self
                .inode
                .read_direct(io, cur, &mut buf[done..done + chunk])?;
            buf[done + n..done + chunk].fill(0);
            done += chunk;
        }

        Ok(len)
    }

    fn score_read(&self, config: &ClientConfig, offset: u64) {
        let last = self.info.last_read_offset();
        if offset >= last && offset - last < config.cache.buffer_size as u64 {
            self.info.inc_cache_hits();
        } else {
            self.info.dec_cache_hits();
        }
    }

    // Writes

    fn write_cached(
        &self,
        config: &ClientConfig,
        io: &IoInfo,
        data: &[u8],
        offset: WriteOffset,
    ) -> Result<usize> {
        if config.cache.coherent_buffers && self.inode.has_mappings() {
            self.info.dec_cache_hits();
            return self.inode.write_through(io, offset, data);
        }

        let mut state = self.inode.cache().exclusive();
        let action = match &*state {
            CacheBuffer::Empty => WriteAction::Fill,
            CacheBuffer::Read(_) => WriteAction::DiscardRead,
            CacheBuffer::Write(cache) => match extend_position(cache, offset, data.len()) {
                Some(pos) => WriteAction::Extend(pos),
                None => WriteAction::Flush,
            },
        };

        match action {
            WriteAction::Fill => {
                self.score_write(config, offset);
                self.write_cache_flushed(&mut state, config, io, data, offset)
            }
            WriteAction::DiscardRead => {
                self.info.dec_cache_hits();
                self.inode.discard_cache_locked(&mut state);
                self.write_cache_flushed(&mut state, config, io, data, offset)
            }
            WriteAction::Extend(pos) => {
                self.info.inc_cache_hits();
                let mut full = false;
                if let CacheBuffer::Write(cache) = &mut *state {
                    cache.buf[pos..pos + data.len()].copy_from_slice(data);
                    cache.used_len = cache.used_len.max(pos + data.len());
                    full = cache.used_len >= cache.max_len;
                }
                if full {
                    self.inode.flush_cache_locked(&mut state)?;
                }
                Ok(data.len())
            }
            WriteAction::Flush => {
                self.info.dec_cache_hits();
                self.inode.flush_cache_locked(&mut state)?;
                self.write_cache_flushed(&mut state, config, io, data, offset)
            }
        }
    }

    /// Write with an empty cache, starting a new write buffer if worthwhile
    fn write_cache_flushed(
        &self,
        state: &mut CacheBuffer,
        config: &ClientConfig,
        io: &IoInfo,
        data: &[u8],
        offset: WriteOffset,
    ) -> Result<usize> {
        let appending = offset == WriteOffset::Append;
        if !self.caching_enabled(config) || (!appending && self.info.cache_hits() <= 0) {
            return self.inode.write_through(io, offset, data);
        }

        let pool = self.inode.context().cache_buffers();
        let max_len = match offset {
            WriteOffset::Append => pool.buf_size(),
            WriteOffset::At(at) => io
                .pattern
                .bytes_left_in_chunk(at)
                .min(pool.buf_size() as u64) as usize,
        };
        if data.len() >= max_len {
            return self.inode.write_through(io, offset, data);
        }

        let Some(mut buf) = pool.instant_buf() else {
            return self.inode.write_through(io, offset, data);
        };

        buf[..data.len()].copy_from_slice(data);
        *state = CacheBuffer::Write(WriteCache {
            buf,
            used_len: data.len(),
            max_len,
            offset,
        });
        self.inode.register_cached();
        Ok(data.len())
    }

    fn score_write(&self, config: &ClientConfig, offset: WriteOffset) {
        let sequential = match offset {
            WriteOffset::Append => true,
            WriteOffset::At(at) => {
                let last = self.info.last_write_offset();
                at >= last && at - last < config.cache.buffer_size as u64
            }
        };

        if sequential {
            self.info.inc_cache_hits();
        } else {
            self.info.dec_cache_hits();
        }
    }
}

/// Position inside the write buffer where `len` bytes at `offset` would go,
/// if they extend or overwrite the buffered range without leaving a gap
fn extend_position(cache: &WriteCache, offset: WriteOffset, len: usize) -> Option<usize> {
    let pos = match (cache.offset, offset) {
        (WriteOffset::Append, WriteOffset::Append) => cache.used_len,
        (WriteOffset::At(start), WriteOffset::At(at))
            if at >= start && at - start <= cache.used_len as u64 =>
        {
            (at - start) as usize
        }
        _ => return None,
    };

    (pos + len <= cache.max_len).then_some(pos)
}
