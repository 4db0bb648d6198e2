//! Entry identity
//!
//! [`EntryInfo`] is the server-side identity of a filesystem object and
//! [`EntryHandle`] the lock protecting it inside an inode.

pub mod handle;
pub mod info;

pub use handle::EntryHandle;
pub use info::{EntryFeatureFlags, EntryInfo, EntryType, NodeOrGroup, ROOT_ENTRY_ID};
