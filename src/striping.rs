//! Stripe patterns
//!
//! Describes how a file's data is laid out across storage targets. A
//! pattern is attached to an inode on its first open and never changes
//! afterwards, so it is shared behind an `Arc` without locking.

use serde::{Deserialize, Serialize};

/// Stripe pattern kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StripeKind {
    /// Plain striping over storage targets
    Raid0,
    /// Striping over buddy mirror groups
    BuddyMirror,
}

/// Chunked stripe layout of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripePattern {
    pub kind: StripeKind,
    /// Chunk size in bytes
    pub chunk_size: u64,
    /// Storage targets (or buddy groups) in stripe order
    pub target_ids: Vec<u16>,
}

impl StripePattern {
    pub fn new(kind: StripeKind, chunk_size: u64, target_ids: Vec<u16>) -> Self {
        Self {
            kind,
            chunk_size: chunk_size.max(1),
            target_ids,
        }
    }

    /// Convenience constructor for a RAID0 pattern
    pub fn raid0(chunk_size: u64, target_ids: Vec<u16>) -> Self {
        Self::new(StripeKind::Raid0, chunk_size, target_ids)
    }

    /// Number of targets a file is striped over
    pub fn stripe_count(&self) -> usize {
        self.target_ids.len()
    }

    /// First byte of the chunk containing `offset`
    pub fn chunk_start(&self, offset: u64) -> u64 {
        offset - (offset % self.chunk_size)
    }

    /// Last byte (inclusive) of the chunk containing `offset`
    pub fn chunk_end(&self, offset: u64) -> u64 {
        self.chunk_start(offset) + self.chunk_size - 1
    }

    /// Bytes from `offset` to the end of its chunk
    pub fn bytes_left_in_chunk(&self, offset: u64) -> u64 {
        self.chunk_end(offset) - offset + 1
    }

    /// Index into `target_ids` of the target holding `offset`
    pub fn target_index(&self, offset: u64) -> usize {
        if self.target_ids.is_empty() {
            return 0;
        }
        ((offset / self.chunk_size) % self.target_ids.len() as u64) as usize
    }

    pub fn is_mirrored(&self) -> bool {
        self.kind == StripeKind::BuddyMirror
    }
}
