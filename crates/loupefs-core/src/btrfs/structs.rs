//! Fixed-layout on-disk structures
//!
//! Every multi-byte integer on disk is little-endian. Parsers are pure
//! functions of the input slice and never mutate it; a short buffer is a
//! `DecodeError::Truncated`. This core is read-only, so no structure here
//! carries an encode path.

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Cursor;
use uuid::Uuid;

use crate::error::DecodeError;

// ============================================================================
// Reserved object ids
// ============================================================================

/// Well-known `Key.objectid` values. The negative ones are stored
/// two's-complement in the unsigned field.
pub mod reserved {
    pub const ROOT_TREE: u64 = 1;
    pub const EXTENT_TREE: u64 = 2;
    pub const CHUNK_TREE: u64 = 3;
    pub const DEV_TREE: u64 = 4;
    pub const FS_TREE: u64 = 5;
    pub const ROOT_TREE_DIR: u64 = 6;
    pub const CSUM_TREE: u64 = 7;
    pub const QUOTA_TREE: u64 = 8;
    pub const UUID_TREE: u64 = 9;
    pub const FREE_SPACE_TREE: u64 = 10;
    pub const ORPHAN: u64 = -6i64 as u64;
    pub const TREE_LOG: u64 = -8i64 as u64;
    pub const TREE_RELOC: u64 = -9i64 as u64;
    pub const DATA_RELOC_TREE: u64 = -10i64 as u64;
    pub const CSUM_ITEM: u64 = -11i64 as u64;
    pub const FIRST_CHUNK_TREE: u64 = 256;

    /// First object id available to ordinary inodes.
    pub const FIRST_FREE: u64 = 256;

    /// Diagnostic name for a reserved object id, if it is one.
    pub fn name(objectid: u64) -> Option<&'static str> {
        match objectid {
            ROOT_TREE => Some("ROOT_TREE"),
            EXTENT_TREE => Some("EXTENT_TREE"),
            CHUNK_TREE => Some("CHUNK_TREE"),
            DEV_TREE => Some("DEV_TREE"),
            FS_TREE => Some("FS_TREE"),
            ROOT_TREE_DIR => Some("ROOT_TREE_DIR"),
            CSUM_TREE => Some("CSUM_TREE"),
            QUOTA_TREE => Some("QUOTA_TREE"),
            UUID_TREE => Some("UUID_TREE"),
            FREE_SPACE_TREE => Some("FREE_SPACE_TREE"),
            ORPHAN => Some("ORPHAN"),
            TREE_LOG => Some("TREE_LOG"),
            TREE_RELOC => Some("TREE_RELOC"),
            DATA_RELOC_TREE => Some("DATA_RELOC_TREE"),
            CSUM_ITEM => Some("CSUM_ITEM"),
            _ => None,
        }
    }
}

// ============================================================================
// Item types
// ============================================================================

/// Wire tags for items stored under a key. Discriminants are the on-disk
/// byte values, so derived ordering matches on-disk key ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(u8)]
pub enum ItemType {
    InodeItem = 0x01,
    InodeRef = 0x0C,
    InodeExtref = 0x0D,
    XattrItem = 0x18,
    OrphanItem = 0x30,
    DirLogItem = 0x3C,
    DirLogIndex = 0x48,
    DirItem = 0x54,
    DirIndex = 0x60,
    ExtentData = 0x6C,
    ExtentCsum = 0x80,
    RootItem = 0x84,
    RootBackref = 0x90,
    RootRef = 0x9C,
    ExtentItem = 0xA8,
    MetadataItem = 0xA9,
    TreeBlockRef = 0xB0,
    ExtentDataRef = 0xB2,
    SharedBlockRef = 0xB6,
    SharedDataRef = 0xB8,
    BlockGroupItem = 0xC0,
    FreeSpaceInfo = 0xC6,
    FreeSpaceExtent = 0xC7,
    FreeSpaceBitmap = 0xC8,
    DevExtent = 0xCC,
    DevItem = 0xD8,
    ChunkItem = 0xE4,
    QgroupStatus = 0xF0,
    QgroupInfo = 0xF2,
    QgroupLimit = 0xF4,
    QgroupRelation = 0xF6,
    PersistentItem = 0xF9,
    DevReplace = 0xFA,
    UuidKeySubvol = 0xFB,
    UuidKeyReceivedSubvol = 0xFC,
    StringItem = 0xFD,
}

impl TryFrom<u8> for ItemType {
    type Error = DecodeError;

    fn try_from(tag: u8) -> Result<Self, DecodeError> {
        use ItemType::*;
        Ok(match tag {
            0x01 => InodeItem,
            0x0C => InodeRef,
            0x0D => InodeExtref,
            0x18 => XattrItem,
            0x30 => OrphanItem,
            0x3C => DirLogItem,
            0x48 => DirLogIndex,
            0x54 => DirItem,
            0x60 => DirIndex,
            0x6C => ExtentData,
            0x80 => ExtentCsum,
            0x84 => RootItem,
            0x90 => RootBackref,
            0x9C => RootRef,
            0xA8 => ExtentItem,
            0xA9 => MetadataItem,
            0xB0 => TreeBlockRef,
            0xB2 => ExtentDataRef,
            0xB6 => SharedBlockRef,
            0xB8 => SharedDataRef,
            0xC0 => BlockGroupItem,
            0xC6 => FreeSpaceInfo,
            0xC7 => FreeSpaceExtent,
            0xC8 => FreeSpaceBitmap,
            0xCC => DevExtent,
            0xD8 => DevItem,
            0xE4 => ChunkItem,
            0xF0 => QgroupStatus,
            0xF2 => QgroupInfo,
            0xF4 => QgroupLimit,
            0xF6 => QgroupRelation,
            0xF9 => PersistentItem,
            0xFA => DevReplace,
            0xFB => UuidKeySubvol,
            0xFC => UuidKeyReceivedSubvol,
            0xFD => StringItem,
            other => return Err(DecodeError::UnknownItemType(other)),
        })
    }
}

// ============================================================================
// Key
// ============================================================================

/// Tree key identifying an item: `(objectid, item_type, offset)`.
///
/// Total order is objectid first, then item-type tag, then offset; this is
/// the order items are laid out on disk, and the traversal engine relies on
/// it without ever re-sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Key {
    pub objectid: u64,
    pub item_type: ItemType,
    pub offset: u64,
}

impl Key {
    /// Size of a key on disk in bytes.
    pub const SIZE: usize = 0x11;

    pub fn new(objectid: u64, item_type: ItemType, offset: u64) -> Self {
        Self {
            objectid,
            item_type,
            offset,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len(data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        let objectid = cursor.read_u64::<LittleEndian>().unwrap();
        let item_type = ItemType::try_from(cursor.read_u8().unwrap())?;
        let offset = cursor.read_u64::<LittleEndian>().unwrap();
        Ok(Self {
            objectid,
            item_type,
            offset,
        })
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Non-reserved object ids format numerically.
        match reserved::name(self.objectid) {
            Some(name) => write!(f, "({} {:?} {})", name, self.item_type, self.offset),
            None => write!(
                f,
                "({} {:?} {})",
                self.objectid, self.item_type, self.offset
            ),
        }
    }
}

// ============================================================================
// Node-level records
// ============================================================================

/// Internal-node entry: key plus logical address of the child node.
#[derive(Debug, Clone, Copy)]
pub struct KeyPointer {
    pub key: Key,
    /// Logical address; must go through the chunk map before any read.
    pub block_number: u64,
    pub generation: u64,
}

impl KeyPointer {
    pub const SIZE: usize = 0x21;

    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len(data, Self::SIZE)?;
        let key = Key::parse(data)?;
        let mut cursor = Cursor::new(&data[Key::SIZE..]);
        Ok(Self {
            key,
            block_number: cursor.read_u64::<LittleEndian>().unwrap(),
            generation: cursor.read_u64::<LittleEndian>().unwrap(),
        })
    }
}

/// Leaf-node index entry: key plus the payload slice location, relative to
/// the end of the node header.
#[derive(Debug, Clone, Copy)]
pub struct NodeItem {
    pub key: Key,
    pub data_offset: u32,
    pub data_size: u32,
}

impl NodeItem {
    pub const SIZE: usize = Key::SIZE + 8;

    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len(data, Self::SIZE)?;
        let key = Key::parse(data)?;
        let mut cursor = Cursor::new(&data[Key::SIZE..]);
        Ok(Self {
            key,
            data_offset: cursor.read_u32::<LittleEndian>().unwrap(),
            data_size: cursor.read_u32::<LittleEndian>().unwrap(),
        })
    }
}

// ============================================================================
// Stripe
// ============================================================================

/// One physical extent backing part of a chunk.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Stripe {
    pub device_id: u64,
    pub offset: u64,
    pub device_uuid: Uuid,
}

impl Stripe {
    pub const SIZE: usize = 0x20;

    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len(data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        let device_id = cursor.read_u64::<LittleEndian>().unwrap();
        let offset = cursor.read_u64::<LittleEndian>().unwrap();
        let device_uuid = Uuid::from_slice(&data[0x10..0x20]).unwrap();
        Ok(Self {
            device_id,
            offset,
            device_uuid,
        })
    }

    /// Key of the companion device item in the dev tree.
    pub fn dev_item_key(&self) -> Key {
        Key::new(self.device_id, ItemType::DevItem, self.offset)
    }
}

// ============================================================================
// TimeSpec
// ============================================================================

/// On-disk timestamp: seconds plus nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TimeSpec {
    pub seconds: i64,
    pub nanoseconds: u32,
}

impl TimeSpec {
    pub const SIZE: usize = 0xC;

    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len(data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            seconds: cursor.read_i64::<LittleEndian>().unwrap(),
            nanoseconds: cursor.read_u32::<LittleEndian>().unwrap(),
        })
    }

    /// Out-of-range timestamps yield `None` rather than an error.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.seconds, self.nanoseconds)
    }
}

// ============================================================================
// Tests
// ============================================================================
