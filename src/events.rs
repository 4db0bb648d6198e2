//! File events
//!
//! Structured change notifications that ride along with remote calls
//! (open, close, truncate, version bump). Whether an event is produced at
//! all is decided by the configured [`EventLogMask`].

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Which classes of file events are logged
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct EventLogMask: u32 {
        const FLUSH = 1;
        const TRUNC = 2;
        const SETATTR = 4;
        const CLOSE = 8;
        const LINK_OP = 16;
        const READ = 32;
    }
}

/// Kind of file event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventType {
    Flush,
    Truncate,
    SetAttr,
    CloseWrite,
    Create,
    Mkdir,
    Mknod,
    Symlink,
    Rmdir,
    Unlink,
    Hardlink,
    Rename,
    Read,
}

impl FileEventType {
    /// Mask bit that must be set for this event to be emitted
    pub fn mask_bit(self) -> EventLogMask {
        match self {
            FileEventType::Flush => EventLogMask::FLUSH,
            FileEventType::Truncate => EventLogMask::TRUNC,
            FileEventType::SetAttr => EventLogMask::SETATTR,
            FileEventType::CloseWrite => EventLogMask::CLOSE,
            FileEventType::Read => EventLogMask::READ,
            FileEventType::Create
            | FileEventType::Mkdir
            | FileEventType::Mknod
            | FileEventType::Symlink
            | FileEventType::Rmdir
            | FileEventType::Unlink
            | FileEventType::Hardlink
            | FileEventType::Rename => EventLogMask::LINK_OP,
        }
    }
}

/// A single file event
///
/// Owned by value: whoever receives it (usually a remote call) consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub event_type: FileEventType,
    /// Path relative to the mount root
    pub path: String,
    /// Second path for rename and link operations
    pub target_path: Option<String>,
}

impl FileEvent {
    pub fn new(event_type: FileEventType, path: impl Into<String>) -> Self {
        Self {
            event_type,
            path: path.into(),
            target_path: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_path = Some(target.into());
        self
    }
}

impl EventLogMask {
    /// Build an event if the mask enables its class and a path is known
    pub fn event_for(self, event_type: FileEventType, path: Option<&str>) -> Option<FileEvent> {
        if !self.contains(event_type.mask_bit()) {
            return None;
        }

        path.map(|p| FileEvent::new(event_type, p))
    }
}
