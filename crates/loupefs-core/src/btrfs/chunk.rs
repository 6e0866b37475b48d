//! Logical-to-physical address translation
//!
//! Every block pointer in the forest is a logical address. Chunk items map
//! logical ranges onto physical device extents; the key's `offset` field is
//! the logical start of the range. This core reads single-device images, so
//! translation always goes through stripe 0.

use crate::btrfs::items::ChunkItem;
use crate::btrfs::structs::{Key, ItemType};
use crate::error::DecodeError;

#[derive(Debug, Clone, Copy)]
struct ChunkMapping {
    logical: u64,
    length: u64,
    physical: u64,
}

/// Ordered set of chunk mappings. Built first from the superblock's
/// bootstrap `sys_chunk_array`, then rebuilt from a full chunk-tree walk.
#[derive(Debug, Default)]
pub struct ChunkMap {
    mappings: Vec<ChunkMapping>,
}

impl ChunkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Register one chunk. `logical` is the chunk key's offset field.
    pub fn insert(&mut self, logical: u64, chunk: &ChunkItem) -> Result<(), DecodeError> {
        let stripe = chunk
            .stripes
            .first()
            .ok_or(DecodeError::UnmappedAddress(logical))?;
        let mapping = ChunkMapping {
            logical,
            length: chunk.length,
            physical: stripe.offset,
        };
        // Keep the list sorted by logical start for the binary search.
        let pos = self
            .mappings
            .partition_point(|m| m.logical < mapping.logical);
        self.mappings.insert(pos, mapping);
        Ok(())
    }

    /// Translate a logical address to a physical byte offset.
    pub fn to_physical(&self, logical: u64) -> Result<u64, DecodeError> {
        let idx = self.mappings.partition_point(|m| m.logical <= logical);
        if idx > 0 {
            let mapping = &self.mappings[idx - 1];
            if logical < mapping.logical + mapping.length {
                return Ok(mapping.physical + (logical - mapping.logical));
            }
        }
        Err(DecodeError::UnmappedAddress(logical))
    }

    /// Parse the superblock's bootstrap chunk array: back-to-back
    /// `(Key, ChunkItem)` records covering the chunk tree itself.
    pub fn from_sys_chunk_array(data: &[u8]) -> Result<Self, DecodeError> {
        let mut map = Self::new();
        let mut offset = 0;
        while offset < data.len() {
            let key = Key::parse(&data[offset..])?;
            if key.item_type != ItemType::ChunkItem {
                return Err(DecodeError::UnsupportedItem(key.item_type));
            }
            offset += Key::SIZE;
            let chunk = ChunkItem::parse(&data[offset..])?;
            offset += chunk.size();
            map.insert(key.offset, &chunk)?;
        }
        tracing::debug!("Bootstrap chunk map: {} system chunk(s)", map.len());
        Ok(map)
    }
}
