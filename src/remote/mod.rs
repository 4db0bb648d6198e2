//! Remote I/O channel
//!
//! The boundary to the metadata and storage servers. Every call is
//! synchronous from the caller's point of view and may block on the
//! network for an arbitrary time; implementations own the wire format.

pub mod io_info;
pub mod types;

pub use io_info::{IoInfo, TargetState};
pub use types::{Attributes, FsyncOptions, LockKind, LookupOpenInfo, OpenFlags, OpenResult};

use crate::entry::EntryInfo;
use crate::error::Result;
use crate::events::FileEvent;

/// Requests the core issues against the servers
///
/// Errors use the crate taxonomy: `PathNotExists`, `NotOwner`,
/// `Communication`, `Interrupted`, `InUse`, `NoSpace` and `Internal`.
pub trait RemoteIo: Send + Sync {
    /// Fetch the identity of the mount root
    fn fetch_root_entry_info(&self) -> Result<EntryInfo>;

    /// Open a remote file handle
    fn open(&self, entry: &EntryInfo, flags: OpenFlags, event: Option<FileEvent>)
        -> Result<OpenResult>;

    /// Close a remote file handle
    fn close(&self, entry: &EntryInfo, io: &IoInfo, event: Option<FileEvent>) -> Result<()>;

    /// Read into `buf`, returning the number of bytes read (0 at end of file)
    fn read(&self, io: &IoInfo, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Write `data`, returning the number of bytes the targets accepted
    fn write(&self, io: &IoInfo, offset: u64, data: &[u8]) -> Result<usize>;

    /// Fetch current attributes
    fn stat(&self, entry: &EntryInfo) -> Result<Attributes>;

    /// Truncate or extend to `size`
    fn truncate(&self, entry: &EntryInfo, size: u64, event: Option<FileEvent>) -> Result<()>;

    /// Flush data on the storage targets touched through `io`
    fn fsync(&self, io: &IoInfo, options: FsyncOptions) -> Result<()>;

    /// flock-style lock on the whole entry
    fn lock_entry(
        &self,
        entry: &EntryInfo,
        io: &IoInfo,
        client_fd: u64,
        owner_pid: i32,
        kind: LockKind,
    ) -> Result<()>;

    /// fcntl-style byte range lock; `end` is inclusive
    fn lock_range(
        &self,
        entry: &EntryInfo,
        io: &IoInfo,
        owner_pid: i32,
        kind: LockKind,
        start: u64,
        end: u64,
    ) -> Result<()>;

    /// Cluster-wide append lock
    fn lock_append(&self, entry: &EntryInfo, io: &IoInfo, kind: LockKind) -> Result<()>;

    /// Bump the server-side file version, optionally carrying an event
    fn bump_file_version(&self, entry: &EntryInfo, event: Option<FileEvent>) -> Result<()>;
}
