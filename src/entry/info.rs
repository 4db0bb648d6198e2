//! Entry info

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Well-known ID of the mount root
pub const ROOT_ENTRY_ID: &str = "root";

bitflags! {
    /// Entry feature flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct EntryFeatureFlags: u32 {
        /// Metadata is owned by a buddy mirror group
        const BUDDY_MIRRORED = 1;
        /// Inode is inlined into its dentry
        const INLINED = 2;
    }
}

/// Owner of an entry's metadata: a single node or a mirror group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeOrGroup {
    pub id: u16,
    pub is_group: bool,
}

impl NodeOrGroup {
    pub fn node(id: u16) -> Self {
        Self { id, is_group: false }
    }

    pub fn group(id: u16) -> Self {
        Self { id, is_group: true }
    }
}

/// Kind of filesystem object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Directory,
    #[default]
    Regular,
    Symlink,
    Other,
}

/// Server-side identity of a filesystem object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub owner: NodeOrGroup,
    pub parent_entry_id: String,
    pub entry_id: String,
    pub file_name: String,
    pub entry_type: EntryType,
    pub feature_flags: EntryFeatureFlags,
}

impl EntryInfo {
    pub fn new(
        owner: NodeOrGroup,
        parent_entry_id: impl Into<String>,
        entry_id: impl Into<String>,
        file_name: impl Into<String>,
        entry_type: EntryType,
    ) -> Self {
        let mut feature_flags = EntryFeatureFlags::empty();
        feature_flags.set(EntryFeatureFlags::BUDDY_MIRRORED, owner.is_group);

        Self {
            owner,
            parent_entry_id: parent_entry_id.into(),
            entry_id: entry_id.into(),
            file_name: file_name.into(),
            entry_type,
            feature_flags,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    pub fn is_buddy_mirrored(&self) -> bool {
        self.feature_flags.contains(EntryFeatureFlags::BUDDY_MIRRORED)
    }

    /// Apply a rename; call on the write-locked info
    ///
    /// Directories keep their owner. Everything else moves to the new
    /// parent's owner and takes over its mirroring.
    pub fn update_on_rename(&mut self, new_parent: &EntryInfo, new_name: &str) {
        self.parent_entry_id = new_parent.entry_id.clone();
        self.file_name = new_name.to_string();

        if !self.is_directory() {
            self.owner = new_parent.owner;
            self.feature_flags
                .set(EntryFeatureFlags::BUDDY_MIRRORED, new_parent.owner.is_group);
        }
    }
}
