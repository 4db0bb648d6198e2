//! Remote call parameter and result types

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::striping::StripePattern;

bitflags! {
    /// Access flags of an open request
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct OpenFlags: u32 {
        const READ = 1;
        const WRITE = 2;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        const TRUNC = 4;
        const APPEND = 8;
        const DIRECT = 16;
    }
}

impl OpenFlags {
    /// Flags without the one-shot open modifiers
    pub fn access_only(self) -> Self {
        self & Self::READ_WRITE
    }
}

/// Result of a remote open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenResult {
    pub handle_id: String,
    pub pattern: StripePattern,
    pub version: u64,
}

/// Open result obtained from a combined lookup-and-open
pub type LookupOpenInfo = OpenResult;

/// Attributes returned by stat
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pub size: u64,
    pub blocks: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime_secs: i64,
    pub ctime_secs: i64,
}

/// Lock request kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockKind {
    Shared,
    Exclusive,
    Unlock,
}

impl LockKind {
    pub fn is_unlock(self) -> bool {
        self == LockKind::Unlock
    }
}

/// What a remote fsync has to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsyncOptions {
    /// Sync data on the storage targets
    pub sync_targets: bool,
    /// Verify the storage session is still valid
    pub check_session: bool,
}
