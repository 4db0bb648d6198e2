//! Remote file handle table
//!
//! Up to three remote handles per inode (read, read-write, write), each
//! reference counted. A slot's remote handle is opened when its count goes
//! from 0 to 1 and closed when it drops back to 0.
//!
//! One mutex covers all three slots. Opens and closes on one inode are
//! serialized, which keeps "reuse the read-write handle" decisions atomic
//! at the cost of per-slot concurrency. The remote open/close runs while
//! the mutex is held.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::events::FileEventType;
use crate::inode::Inode;
use crate::remote::{IoInfo, LookupOpenInfo, OpenFlags, TargetState};

/// Access class of a remote handle slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleType {
    Read = 0,
    ReadWrite = 1,
    Write = 2,
}

impl HandleType {
    pub const ALL: [HandleType; 3] = [HandleType::Read, HandleType::ReadWrite, HandleType::Write];

    /// Slot for the access mode in `flags`
    pub fn from_flags(flags: OpenFlags) -> Self {
        match (flags.contains(OpenFlags::READ), flags.contains(OpenFlags::WRITE)) {
            (true, true) => HandleType::ReadWrite,
            (false, true) => HandleType::Write,
            _ => HandleType::Read,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Access flags a handle of this type is opened with
    pub fn access_flags(self) -> OpenFlags {
        match self {
            HandleType::Read => OpenFlags::READ,
            HandleType::ReadWrite => OpenFlags::READ_WRITE,
            HandleType::Write => OpenFlags::WRITE,
        }
    }

    pub fn can_write(self) -> bool {
        self != HandleType::Read
    }
}

#[derive(Debug, Default)]
struct HandleSlot {
    handle_id: Option<Arc<str>>,
    ref_count: u32,
    targets: Arc<TargetState>,
}

/// The three handle slots of an inode
#[derive(Debug, Default)]
pub struct FileHandleTable {
    slots: Mutex<[HandleSlot; 3]>,
    /// Mirrors of the slot counts for lock-free hints
    ref_counts: [AtomicU32; 3],
}

impl FileHandleTable {
    /// Current reference count of a slot (lock-free, may be stale)
    pub fn ref_count(&self, handle_type: HandleType) -> u32 {
        self.ref_counts[handle_type.index()].load(Ordering::Acquire)
    }

    /// True if more than one reader handle is open (lock-free hint)
    pub fn is_open_by_multiple_readers(&self) -> bool {
        self.ref_count(HandleType::Read) + self.ref_count(HandleType::ReadWrite) > 1
    }

    /// True if a write or read-write handle is referenced
    pub fn has_write_handle(&self) -> bool {
        let slots = self.slots.lock();
        slots[HandleType::Write.index()].ref_count > 0
            || slots[HandleType::ReadWrite.index()].ref_count > 0
    }

    fn increment(&self, slots: &mut [HandleSlot; 3], handle_type: HandleType) {
        let slot = &mut slots[handle_type.index()];
        slot.ref_count += 1;
        self.ref_counts[handle_type.index()].store(slot.ref_count, Ordering::Release);
    }
}

impl Inode {
    /// Take a reference on a remote handle for `flags`
    ///
    /// Reuses an open slot of the same type, or the read-write slot if
    /// `allow_rw` is set, and otherwise opens a new remote handle (using
    /// `lookup` from a combined lookup-and-open if given). Returns the slot
    /// that was referenced, which is what must later be released.
    pub fn reference_handle(
        &self,
        flags: OpenFlags,
        allow_rw: bool,
        lookup: Option<LookupOpenInfo>,
        event_path: Option<&str>,
    ) -> Result<HandleType> {
        let wanted = HandleType::from_flags(flags);
        let mut slots = self.handles.slots.lock();

        let reuse = if slots[wanted.index()].ref_count > 0 {
            Some(wanted)
        } else if allow_rw && slots[HandleType::ReadWrite.index()].ref_count > 0 {
            Some(HandleType::ReadWrite)
        } else {
            None
        };

        if let Some(handle_type) = reuse {
            if flags.contains(OpenFlags::TRUNC) {
                self.truncate_on_open(event_path)?;
            }

            self.handles.increment(&mut slots, handle_type);
            tracing::trace!(ino = self.ino, ?handle_type, "Referenced existing handle");
            return Ok(handle_type);
        }

        let result = match lookup {
            Some(result) => result,
            None => self.open_remote(wanted, flags, event_path)?,
        };

        let pattern = self.pattern.get_or_init(|| Arc::new(result.pattern)).clone();
        let slot = &mut slots[wanted.index()];
        slot.handle_id = Some(Arc::from(result.handle_id.as_str()));
        slot.targets.reset_for_open(pattern.stripe_count());
        self.version.store(result.version, Ordering::Release);

        if flags.contains(OpenFlags::TRUNC) {
            self.size.truncate_local(0, self.ctx.now_ticks());
        }

        self.handles.increment(&mut slots, wanted);
        tracing::debug!(
            ino = self.ino,
            handle_type = ?wanted,
            handle_id = %result.handle_id,
            "Opened remote handle"
        );

        Ok(wanted)
    }

    /// Drop a reference taken with [`Inode::reference_handle`]
    ///
    /// The last reference closes the remote handle. Local state is cleaned
    /// up even if the close fails; a transient failure is handed to the
    /// async retry queue and the error is still returned.
    pub fn release_handle(&self, handle_type: HandleType, event_path: Option<&str>) -> Result<()> {
        let mut slots = self.handles.slots.lock();
        let slot = &mut slots[handle_type.index()];

        debug_assert!(
            slot.ref_count > 0,
            "{:?} handle of inode {} released without a reference",
            handle_type,
            self.ino
        );
        if slot.ref_count == 0 {
            tracing::error!(ino = self.ino, ?handle_type, "Handle reference count underflow");
            return Err(Error::HandleNotReferenced(handle_type));
        }

        slot.ref_count -= 1;
        self.handles.ref_counts[handle_type.index()].store(slot.ref_count, Ordering::Release);

        if slot.ref_count > 0 {
            return Ok(());
        }

        let handle_id = slot.handle_id.take();
        let pattern = self.pattern.get().cloned();

        let outcome = match (handle_id, pattern) {
            (Some(handle_id), Some(pattern)) => {
                let io = IoInfo {
                    handle_id,
                    access: handle_type.access_flags(),
                    pattern,
                    targets: slot.targets.clone(),
                };
                self.close_remote(handle_type, &io, event_path)
            }
            _ => Err(Error::Internal(format!(
                "{:?} handle of inode {} has no remote handle",
                handle_type, self.ino
            ))),
        };

        slot.targets.reset_for_close();
        outcome
    }

    /// I/O info for a referenced slot
    pub fn io_info(&self, handle_type: HandleType) -> Result<IoInfo> {
        let slots = self.handles.slots.lock();
        let slot = &slots[handle_type.index()];

        match (&slot.handle_id, self.pattern.get()) {
            (Some(handle_id), Some(pattern)) if slot.ref_count > 0 => Ok(IoInfo {
                handle_id: handle_id.clone(),
                access: handle_type.access_flags(),
                pattern: pattern.clone(),
                targets: slot.targets.clone(),
            }),
            _ => Err(Error::Internal(format!(
                "{:?} handle of inode {} is not open",
                handle_type, self.ino
            ))),
        }
    }

    /// Reference a handle that is released again when the guard drops
    pub fn acquire_handle(&self, flags: OpenFlags, allow_rw: bool) -> Result<HandleGuard<'_>> {
        let handle_type = self.reference_handle(flags, allow_rw, None, None)?;

        match self.io_info(handle_type) {
            Ok(io) => Ok(HandleGuard {
                inode: self,
                handle_type,
                io,
            }),
            Err(e) => {
                let _ = self.release_handle(handle_type, None);
                Err(e)
            }
        }
    }

    pub fn has_write_handle(&self) -> bool {
        self.handles.has_write_handle()
    }

    pub fn is_open_by_multiple_readers(&self) -> bool {
        self.handles.is_open_by_multiple_readers()
    }

    fn open_remote(
        &self,
        handle_type: HandleType,
        flags: OpenFlags,
        event_path: Option<&str>,
    ) -> Result<LookupOpenInfo> {
        let mask = self.ctx.config().events.log_mask;
        let event = if handle_type == HandleType::Read {
            mask.event_for(FileEventType::Read, event_path)
        } else if flags.contains(OpenFlags::TRUNC) {
            mask.event_for(FileEventType::Truncate, event_path)
        } else {
            None
        };

        let info = self.entry.read_lock(self.remote())?;
        self.remote().open(&info, flags, event)
    }

    fn truncate_on_open(&self, event_path: Option<&str>) -> Result<()> {
        let event = self
            .ctx
            .config()
            .events
            .log_mask
            .event_for(FileEventType::Truncate, event_path);

        {
            let info = self.entry.read_lock(self.remote())?;
            self.remote().truncate(&info, 0, event)?;
        }

        self.size.truncate_local(0, self.ctx.now_ticks());
        Ok(())
    }

    fn close_remote(&self, handle_type: HandleType, io: &IoInfo, event_path: Option<&str>) -> Result<()> {
        let event = if handle_type.can_write() {
            self.ctx
                .config()
                .events
                .log_mask
                .event_for(FileEventType::CloseWrite, event_path)
        } else {
            None
        };

        let info = self.entry.read_lock(self.remote())?;

        match self.remote().close(&info, io, event.clone()) {
            Ok(()) => {
                tracing::debug!(ino = self.ino, ?handle_type, handle_id = %io.handle_id, "Closed remote handle");
                Ok(())
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    ino = self.ino,
                    handle_id = %io.handle_id,
                    "Closing remote handle failed, scheduling delayed close: {}",
                    e
                );
                self.ctx
                    .retry_queue()
                    .add_close(info.clone(), io.detached(), event);
                Err(e)
            }
            Err(e) => {
                tracing::warn!(ino = self.ino, handle_id = %io.handle_id, "Closing remote handle failed: {}", e);
                Err(e)
            }
        }
    }
}

/// A referenced handle that is released on drop
pub struct HandleGuard<'a> {
    inode: &'a Inode,
    handle_type: HandleType,
    io: IoInfo,
}

impl HandleGuard<'_> {
    pub fn handle_type(&self) -> HandleType {
        self.handle_type
    }

    pub fn io(&self) -> &IoInfo {
        &self.io
    }
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.inode.release_handle(self.handle_type, None) {
            tracing::debug!(ino = self.inode.ino, "Releasing scoped handle failed: {}", e);
        }
    }
}
