//! Decode-error taxonomy
//!
//! Format errors are fatal for the decode or lookup that hit them and are
//! never retried. A key that matches nothing is not an error; `find` returns
//! an empty list and `find_first` returns `None`.

use thiserror::Error;

use crate::btrfs::structs::ItemType;

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Buffer too short for the structure being decoded.
    #[error("truncated structure: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Wire tag not in the known item-type set.
    #[error("unknown item type 0x{0:02x}")]
    UnknownItemType(u8),

    /// Extent descriptor with a type byte outside {inline, regular, prealloc}.
    #[error("unknown extent type {0}")]
    UnknownExtentType(u8),

    /// Known tag, but this core carries no payload decoder for it.
    #[error("no payload decoder for item type {0:?}")]
    UnsupportedItem(ItemType),

    /// An internal node must carry at least one key pointer.
    #[error("internal node at logical 0x{0:x} has no key pointers")]
    EmptyInternalNode(u64),

    /// Superblock magic mismatch.
    #[error("not a Btrfs superblock (bad magic)")]
    BadMagic,

    /// Logical address outside every chunk mapping.
    #[error("logical address 0x{0:x} is not mapped by any chunk")]
    UnmappedAddress(u64),

    /// A child node's level must be exactly one below its parent's.
    #[error("child node level {child} under parent level {parent}")]
    LevelMismatch { parent: u8, child: u8 },
}

impl DecodeError {
    /// Bounds check shared by every fixed-layout parser.
    pub(crate) fn check_len(buf: &[u8], needed: usize) -> Result<(), DecodeError> {
        if buf.len() < needed {
            Err(DecodeError::Truncated {
                needed,
                available: buf.len(),
            })
        } else {
            Ok(())
        }
    }
}
