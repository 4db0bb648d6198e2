//! BeeGFS Client I/O Core
//!
//! The per-inode state a BeeGFS-style distributed filesystem client keeps
//! between the kernel's VFS calls and the remote metadata and storage
//! servers: file handle reference counting, a single-buffer content cache
//! for read-ahead and write combining, range lock bookkeeping and the file
//! size consistency guard.
//!
//! # Architecture
//!
//! A [`ClientContext`] owns everything shared by all inodes: configuration,
//! the [`RemoteIo`] channel, the cache buffer pool and the retry queue. Each
//! [`Inode`] references its context; each [`OpenFile`] references its inode
//! and one slot of the inode's handle table.
//!
//! Remote failures during close and unlock are handed to the
//! [`retry::AsyncRetryQueue`], whose [`RetryWorker`] runs on tokio and also
//! flushes idle write buffers in the background.
//!
//! # Features
//!
//! - One remote handle per access mode, shared by all local opens
//! - Read-ahead and write-combining buffers bounded by stripe chunks
//! - Local and cluster-wide append modes
//! - Coherent I/O bypass while the file is memory mapped
//! - Parallel page writeback grouped by stripe chunk
//! - File events gated by a configurable mask

pub mod buffer_pool;
pub mod config;
pub mod context;
pub mod entry;
pub mod error;
pub mod events;
pub mod file;
pub mod inode;
pub mod logging;
pub mod remote;
pub mod retry;
pub mod striping;

#[cfg(test)]
mod test_support;

pub use config::ClientConfig;
pub use context::ClientContext;
pub use error::{Error, Result};
pub use file::OpenFile;
pub use inode::Inode;
pub use remote::RemoteIo;
pub use retry::RetryWorker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ClientConfig, ConfigHandle};
    pub use crate::context::{ClientContext, PageCacheHooks};
    pub use crate::entry::{EntryHandle, EntryInfo, EntryType};
    pub use crate::error::{Error, Result};
    pub use crate::file::OpenFile;
    pub use crate::inode::{CacheKind, HandleType, Inode, InodeTable, WriteOffset};
    pub use crate::remote::{IoInfo, LockKind, OpenFlags, RemoteIo};
    pub use crate::retry::RetryWorker;
}
