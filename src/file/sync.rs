//! Flush, fsync and memory mappings

use std::time::Duration;

use tracing::warn;

use crate::error::Result;
use crate::events::FileEventType;
use crate::remote::FsyncOptions;

use super::OpenFile;

/// Cache lock attempts before mapping while coherent reads/writes run
const MMAP_LOCK_TRIES_BUSY: u32 = 100;
const MMAP_LOCK_TRIES: u32 = 500;
const MMAP_LOCK_BACKOFF: Duration = Duration::from_millis(10);

impl OpenFile {
    /// Flush on close of a file descriptor (not the last reference)
    pub fn flush(&self) -> Result<()> {
        self.sync_data(false)
    }

    /// Push all buffered data out and, if configured, have the storage
    /// targets commit it
    pub fn fsync(&self) -> Result<()> {
        self.sync_data(true)
    }

    fn sync_data(&self, is_fsync: bool) -> Result<()> {
        let inode = &self.inode;
        let ctx = inode.context();
        let config = ctx.config();

        if (config.paged_io_enabled() || inode.has_mappings())
            && (inode.has_write_handle() || inode.size_guard().dirty_pages() > 0)
        {
            ctx.page_cache().write_and_wait(inode.ino())?;
        }

        inode.flush_cache()?;

        if !self.info.handle_type().can_write() {
            return Ok(());
        }

        let options = if is_fsync {
            FsyncOptions {
                sync_targets: config.sync.remote_fsync,
                check_session: false,
            }
        } else {
            FsyncOptions {
                sync_targets: config.sync.sync_on_close,
                check_session: config.sync.session_check_on_close,
            }
        };

        if options.sync_targets || options.check_session {
            let io = inode.io_info(self.info.handle_type())?;
            ctx.remote().fsync(&io, options)?;
        }

        if let Some(event) = config
            .events
            .log_mask
            .event_for(FileEventType::Flush, self.path())
        {
            let entry = inode.entry().read_lock(ctx.remote())?;
            ctx.remote().bump_file_version(&entry, Some(event))?;
        }

        Ok(())
    }

    /// Register a memory mapping of this file
    ///
    /// With coherent buffers the content cache is flushed first so the
    /// mapping sees everything written so far. If the cache lock stays busy
    /// the mapping is set up without that flush.
    pub fn mmap(&self) -> Result<()> {
        let inode = &self.inode;
        let config = inode.context().config();

        if config.cache.coherent_buffers {
            let tries = if inode.coherent_rw_in_progress() > 0 {
                MMAP_LOCK_TRIES_BUSY
            } else {
                MMAP_LOCK_TRIES
            };

            let mut locked = None;
            for attempt in 0..tries {
                locked = inode.cache().try_exclusive();
                if locked.is_some() {
                    break;
                }
                if attempt + 1 < tries {
                    std::thread::sleep(MMAP_LOCK_BACKOFF);
                }
            }

            match locked {
                Some(mut state) => inode.flush_cache_locked(&mut state)?,
                None => warn!(ino = inode.ino(), tries, "Cache lock busy, mapping without flush"),
            }
        }

        inode.add_mapping();
        if let Err(e) = inode.refresh() {
            inode.remove_mapping();
            return Err(e);
        }
        Ok(())
    }

    /// Drop a mapping registered with [`OpenFile::mmap`]
    pub fn munmap(&self) {
        self.inode.remove_mapping();
    }
}
