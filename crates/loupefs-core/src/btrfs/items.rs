//! Item payload decoders
//!
//! Each leaf payload decodes into one `Item` variant, dispatched on the
//! key's wire tag. Tags without a decoder here (extent-tree bookkeeping,
//! qgroups, ...) are a `DecodeError::UnsupportedItem`: fatal for the node
//! being decoded, not for the tree as a whole.

use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;
use std::io::Cursor;
use uuid::Uuid;

use crate::btrfs::structs::{ItemType, Key, Stripe, TimeSpec};
use crate::error::DecodeError;

/// A decoded leaf item.
#[derive(Debug, Clone)]
pub enum Item {
    ChunkItem(ChunkItem),
    DevItem(DevItem),
    RootItem(RootItem),
    InodeItem(InodeItem),
    InodeRef(InodeRef),
    DirItem(DirEntry),
    DirIndex(DirEntry),
    XattrItem(XattrItem),
    ExtentData(ExtentData),
    RootRef(RootRef),
    RootBackref(RootRef),
    OrphanItem,
}

impl Item {
    /// Decode a payload slice according to its key's item type.
    pub fn decode(item_type: ItemType, data: &[u8]) -> Result<Self, DecodeError> {
        Ok(match item_type {
            ItemType::ChunkItem => Item::ChunkItem(ChunkItem::parse(data)?),
            ItemType::DevItem => Item::DevItem(DevItem::parse(data)?),
            ItemType::RootItem => Item::RootItem(RootItem::parse(data)?),
            ItemType::InodeItem => Item::InodeItem(InodeItem::parse(data)?),
            ItemType::InodeRef => Item::InodeRef(InodeRef::parse(data)?),
            ItemType::DirItem => Item::DirItem(DirEntry::parse(data)?),
            ItemType::DirIndex => Item::DirIndex(DirEntry::parse(data)?),
            ItemType::XattrItem => Item::XattrItem(XattrItem::parse(data)?),
            ItemType::ExtentData => Item::ExtentData(ExtentData::parse(data)?),
            ItemType::RootRef => Item::RootRef(RootRef::parse(data)?),
            ItemType::RootBackref => Item::RootBackref(RootRef::parse(data)?),
            ItemType::OrphanItem => Item::OrphanItem,
            other => return Err(DecodeError::UnsupportedItem(other)),
        })
    }

    pub fn as_chunk_item(&self) -> Option<&ChunkItem> {
        match self {
            Item::ChunkItem(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_dev_item(&self) -> Option<&DevItem> {
        match self {
            Item::DevItem(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_root_item(&self) -> Option<&RootItem> {
        match self {
            Item::RootItem(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_inode_item(&self) -> Option<&InodeItem> {
        match self {
            Item::InodeItem(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_inode_ref(&self) -> Option<&InodeRef> {
        match self {
            Item::InodeRef(r) => Some(r),
            _ => None,
        }
    }

    /// Directory entry payload, whether keyed as DirItem or DirIndex.
    pub fn as_dir_entry(&self) -> Option<&DirEntry> {
        match self {
            Item::DirItem(d) | Item::DirIndex(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_xattr_item(&self) -> Option<&XattrItem> {
        match self {
            Item::XattrItem(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_extent_data(&self) -> Option<&ExtentData> {
        match self {
            Item::ExtentData(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_root_ref(&self) -> Option<&RootRef> {
        match self {
            Item::RootRef(r) | Item::RootBackref(r) => Some(r),
            _ => None,
        }
    }
}

// ============================================================================
// Chunk / device items
// ============================================================================

/// Maps one logical chunk onto physical device extents.
#[derive(Debug, Clone)]
pub struct ChunkItem {
    pub length: u64,
    pub owner: u64,
    pub stripe_length: u64,
    pub chunk_type: u64,
    pub io_align: u32,
    pub io_width: u32,
    pub sector_size: u32,
    pub sub_stripes: u16,
    pub stripes: Vec<Stripe>,
}

impl ChunkItem {
    /// Fixed header before the stripe array.
    pub const HEADER_SIZE: usize = 0x30;

    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len(data, Self::HEADER_SIZE)?;
        let mut cursor = Cursor::new(data);
        let length = cursor.read_u64::<LittleEndian>().unwrap();
        let owner = cursor.read_u64::<LittleEndian>().unwrap();
        let stripe_length = cursor.read_u64::<LittleEndian>().unwrap();
        let chunk_type = cursor.read_u64::<LittleEndian>().unwrap();
        let io_align = cursor.read_u32::<LittleEndian>().unwrap();
        let io_width = cursor.read_u32::<LittleEndian>().unwrap();
        let sector_size = cursor.read_u32::<LittleEndian>().unwrap();
        let stripe_count = cursor.read_u16::<LittleEndian>().unwrap();
        let sub_stripes = cursor.read_u16::<LittleEndian>().unwrap();

        let mut stripes = Vec::with_capacity(stripe_count as usize);
        let mut offset = Self::HEADER_SIZE;
        for _ in 0..stripe_count {
            DecodeError::check_len(data, offset + Stripe::SIZE)?;
            stripes.push(Stripe::parse(&data[offset..])?);
            offset += Stripe::SIZE;
        }

        Ok(Self {
            length,
            owner,
            stripe_length,
            chunk_type,
            io_align,
            io_width,
            sector_size,
            sub_stripes,
            stripes,
        })
    }

    /// Total on-disk size of this item, stripes included.
    pub fn size(&self) -> usize {
        Self::HEADER_SIZE + self.stripes.len() * Stripe::SIZE
    }
}

/// Per-device record in the chunk tree.
#[derive(Debug, Clone, Serialize)]
pub struct DevItem {
    pub device_id: u64,
    pub total_bytes: u64,
    pub bytes_used: u64,
    pub io_align: u32,
    pub io_width: u32,
    pub sector_size: u32,
    pub dev_type: u64,
    pub generation: u64,
    pub start_offset: u64,
    pub dev_group: u32,
    pub seek_speed: u8,
    pub bandwidth: u8,
    pub device_uuid: Uuid,
    pub fs_uuid: Uuid,
}

impl DevItem {
    pub const SIZE: usize = 0x62;

    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len(data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        Ok(Self {
            device_id: cursor.read_u64::<LittleEndian>().unwrap(),
            total_bytes: cursor.read_u64::<LittleEndian>().unwrap(),
            bytes_used: cursor.read_u64::<LittleEndian>().unwrap(),
            io_align: cursor.read_u32::<LittleEndian>().unwrap(),
            io_width: cursor.read_u32::<LittleEndian>().unwrap(),
            sector_size: cursor.read_u32::<LittleEndian>().unwrap(),
            dev_type: cursor.read_u64::<LittleEndian>().unwrap(),
            generation: cursor.read_u64::<LittleEndian>().unwrap(),
            start_offset: cursor.read_u64::<LittleEndian>().unwrap(),
            dev_group: cursor.read_u32::<LittleEndian>().unwrap(),
            seek_speed: cursor.read_u8().unwrap(),
            bandwidth: cursor.read_u8().unwrap(),
            device_uuid: Uuid::from_slice(&data[0x42..0x52]).unwrap(),
            fs_uuid: Uuid::from_slice(&data[0x52..0x62]).unwrap(),
        })
    }
}

// ============================================================================
// Root / inode items
// ============================================================================

/// Root-tree record describing one tree (subvolume, chunk tree, ...).
/// Modern images append extended fields after `level`; the classic prefix
/// is all this core reads, so longer buffers are accepted.
#[derive(Debug, Clone)]
pub struct RootItem {
    pub inode: InodeItem,
    pub generation: u64,
    pub root_dirid: u64,
    pub bytenr: u64,
    pub byte_limit: u64,
    pub bytes_used: u64,
    pub last_snapshot: u64,
    pub flags: u64,
    pub refs: u32,
    pub drop_progress: Key,
    pub drop_level: u8,
    pub level: u8,
}

impl RootItem {
    pub const SIZE: usize = 0xEF;

    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len(data, Self::SIZE)?;
        let inode = InodeItem::parse(data)?;
        let mut cursor = Cursor::new(&data[InodeItem::SIZE..]);
        let generation = cursor.read_u64::<LittleEndian>().unwrap();
        let root_dirid = cursor.read_u64::<LittleEndian>().unwrap();
        let bytenr = cursor.read_u64::<LittleEndian>().unwrap();
        let byte_limit = cursor.read_u64::<LittleEndian>().unwrap();
        let bytes_used = cursor.read_u64::<LittleEndian>().unwrap();
        let last_snapshot = cursor.read_u64::<LittleEndian>().unwrap();
        let flags = cursor.read_u64::<LittleEndian>().unwrap();
        let refs = cursor.read_u32::<LittleEndian>().unwrap();
        let drop_progress = Key::parse(&data[InodeItem::SIZE + 0x3C..])?;
        let drop_level = data[InodeItem::SIZE + 0x4D];
        let level = data[InodeItem::SIZE + 0x4E];
        Ok(Self {
            inode,
            generation,
            root_dirid,
            bytenr,
            byte_limit,
            bytes_used,
            last_snapshot,
            flags,
            refs,
            drop_progress,
            drop_level,
            level,
        })
    }
}

/// Inode metadata: ownership, size, link count, timestamps.
#[derive(Debug, Clone, Serialize)]
pub struct InodeItem {
    pub generation: u64,
    pub transid: u64,
    pub size: u64,
    pub nbytes: u64,
    pub block_group: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub rdev: u64,
    pub flags: u64,
    pub sequence: u64,
    pub atime: TimeSpec,
    pub ctime: TimeSpec,
    pub mtime: TimeSpec,
    pub otime: TimeSpec,
}

impl InodeItem {
    pub const SIZE: usize = 0xA0;

    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len(data, Self::SIZE)?;
        let mut cursor = Cursor::new(data);
        let generation = cursor.read_u64::<LittleEndian>().unwrap();
        let transid = cursor.read_u64::<LittleEndian>().unwrap();
        let size = cursor.read_u64::<LittleEndian>().unwrap();
        let nbytes = cursor.read_u64::<LittleEndian>().unwrap();
        let block_group = cursor.read_u64::<LittleEndian>().unwrap();
        let nlink = cursor.read_u32::<LittleEndian>().unwrap();
        let uid = cursor.read_u32::<LittleEndian>().unwrap();
        let gid = cursor.read_u32::<LittleEndian>().unwrap();
        let mode = cursor.read_u32::<LittleEndian>().unwrap();
        let rdev = cursor.read_u64::<LittleEndian>().unwrap();
        let flags = cursor.read_u64::<LittleEndian>().unwrap();
        let sequence = cursor.read_u64::<LittleEndian>().unwrap();
        // 4 reserved u64 words before the timestamps
        let atime = TimeSpec::parse(&data[0x70..])?;
        let ctime = TimeSpec::parse(&data[0x7C..])?;
        let mtime = TimeSpec::parse(&data[0x88..])?;
        let otime = TimeSpec::parse(&data[0x94..])?;
        Ok(Self {
            generation,
            transid,
            size,
            nbytes,
            block_group,
            nlink,
            uid,
            gid,
            mode,
            rdev,
            flags,
            sequence,
            atime,
            ctime,
            mtime,
            otime,
        })
    }

    pub fn is_dir(&self) -> bool {
        self.mode & 0o170000 == 0o040000
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & 0o170000 == 0o120000
    }
}

/// Back-reference from an inode to its name within the parent directory.
#[derive(Debug, Clone)]
pub struct InodeRef {
    pub index: u64,
    pub name: String,
}

impl InodeRef {
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len(data, 0xA)?;
        let mut cursor = Cursor::new(data);
        let index = cursor.read_u64::<LittleEndian>().unwrap();
        let name_len = cursor.read_u16::<LittleEndian>().unwrap() as usize;
        DecodeError::check_len(data, 0xA + name_len)?;
        let name = String::from_utf8_lossy(&data[0xA..0xA + name_len]).into_owned();
        Ok(Self { index, name })
    }
}

// ============================================================================
// Directory entries / xattrs
// ============================================================================

/// Entry type byte carried by directory entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DirEntryKind {
    Unknown,
    RegularFile,
    Directory,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    Symlink,
    Xattr,
}

impl From<u8> for DirEntryKind {
    fn from(v: u8) -> Self {
        match v {
            1 => DirEntryKind::RegularFile,
            2 => DirEntryKind::Directory,
            3 => DirEntryKind::CharDevice,
            4 => DirEntryKind::BlockDevice,
            5 => DirEntryKind::Fifo,
            6 => DirEntryKind::Socket,
            7 => DirEntryKind::Symlink,
            8 => DirEntryKind::Xattr,
            _ => DirEntryKind::Unknown,
        }
    }
}

/// Shared payload of DirItem and DirIndex keys: the child's key plus its
/// name within the directory.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub child_key: Key,
    pub transid: u64,
    pub data_len: u16,
    pub kind: DirEntryKind,
    pub name: String,
}

impl DirEntry {
    /// Fixed header before the name bytes.
    pub const HEADER_SIZE: usize = Key::SIZE + 0xD;

    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len(data, Self::HEADER_SIZE)?;
        let child_key = Key::parse(data)?;
        let mut cursor = Cursor::new(&data[Key::SIZE..]);
        let transid = cursor.read_u64::<LittleEndian>().unwrap();
        let data_len = cursor.read_u16::<LittleEndian>().unwrap();
        let name_len = cursor.read_u16::<LittleEndian>().unwrap() as usize;
        let kind = DirEntryKind::from(cursor.read_u8().unwrap());
        DecodeError::check_len(data, Self::HEADER_SIZE + name_len)?;
        let name = String::from_utf8_lossy(&data[Self::HEADER_SIZE..Self::HEADER_SIZE + name_len])
            .into_owned();
        Ok(Self {
            child_key,
            transid,
            data_len,
            kind,
            name,
        })
    }
}

/// Extended attribute: same wire layout as a directory entry, with the
/// value bytes following the name.
#[derive(Debug, Clone)]
pub struct XattrItem {
    pub transid: u64,
    pub name: String,
    pub value: Vec<u8>,
}

impl XattrItem {
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len(data, DirEntry::HEADER_SIZE)?;
        let mut cursor = Cursor::new(&data[Key::SIZE..]);
        let transid = cursor.read_u64::<LittleEndian>().unwrap();
        let data_len = cursor.read_u16::<LittleEndian>().unwrap() as usize;
        let name_len = cursor.read_u16::<LittleEndian>().unwrap() as usize;
        let _kind = cursor.read_u8().unwrap();
        let name_end = DirEntry::HEADER_SIZE + name_len;
        DecodeError::check_len(data, name_end + data_len)?;
        let name = String::from_utf8_lossy(&data[DirEntry::HEADER_SIZE..name_end]).into_owned();
        let value = data[name_end..name_end + data_len].to_vec();
        Ok(Self {
            transid,
            name,
            value,
        })
    }
}

// ============================================================================
// Extents
// ============================================================================

/// Where an extent's bytes live.
#[derive(Debug, Clone)]
pub enum ExtentLocation {
    /// Data stored directly in the leaf payload.
    Inline(Vec<u8>),
    /// Data on disk at a logical address; `disk_bytenr == 0` marks a hole.
    Regular {
        disk_bytenr: u64,
        disk_num_bytes: u64,
        extent_offset: u64,
        num_bytes: u64,
    },
    /// Preallocated but unwritten; reads as zeros.
    Prealloc {
        disk_bytenr: u64,
        disk_num_bytes: u64,
        extent_offset: u64,
        num_bytes: u64,
    },
}

/// File extent descriptor.
#[derive(Debug, Clone)]
pub struct ExtentData {
    pub generation: u64,
    /// Uncompressed length of the extent.
    pub logical_size: u64,
    pub compression: u8,
    pub encryption: u8,
    pub location: ExtentLocation,
}

impl ExtentData {
    /// Header common to inline and regular extents.
    pub const HEADER_SIZE: usize = 0x15;

    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len(data, Self::HEADER_SIZE)?;
        let mut cursor = Cursor::new(data);
        let generation = cursor.read_u64::<LittleEndian>().unwrap();
        let logical_size = cursor.read_u64::<LittleEndian>().unwrap();
        let compression = cursor.read_u8().unwrap();
        let encryption = cursor.read_u8().unwrap();
        let _other_encoding = cursor.read_u16::<LittleEndian>().unwrap();
        let extent_type = cursor.read_u8().unwrap();

        let location = match extent_type {
            0 => ExtentLocation::Inline(data[Self::HEADER_SIZE..].to_vec()),
            1 | 2 => {
                DecodeError::check_len(data, Self::HEADER_SIZE + 0x20)?;
                let mut cursor = Cursor::new(&data[Self::HEADER_SIZE..]);
                let disk_bytenr = cursor.read_u64::<LittleEndian>().unwrap();
                let disk_num_bytes = cursor.read_u64::<LittleEndian>().unwrap();
                let extent_offset = cursor.read_u64::<LittleEndian>().unwrap();
                let num_bytes = cursor.read_u64::<LittleEndian>().unwrap();
                if extent_type == 1 {
                    ExtentLocation::Regular {
                        disk_bytenr,
                        disk_num_bytes,
                        extent_offset,
                        num_bytes,
                    }
                } else {
                    ExtentLocation::Prealloc {
                        disk_bytenr,
                        disk_num_bytes,
                        extent_offset,
                        num_bytes,
                    }
                }
            }
            other => {
                return Err(DecodeError::UnknownExtentType(other));
            }
        };

        Ok(Self {
            generation,
            logical_size,
            compression,
            encryption,
            location,
        })
    }

    /// Bytes this extent contributes to the file.
    pub fn byte_count(&self) -> u64 {
        match &self.location {
            ExtentLocation::Inline(data) => data.len() as u64,
            ExtentLocation::Regular { num_bytes, .. }
            | ExtentLocation::Prealloc { num_bytes, .. } => *num_bytes,
        }
    }
}

// ============================================================================
// Root references
// ============================================================================

/// Subvolume name link: RootRef under the parent, RootBackref under the
/// child, same payload either way.
#[derive(Debug, Clone)]
pub struct RootRef {
    pub directory_id: u64,
    pub sequence: u64,
    pub name: String,
}

impl RootRef {
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len(data, 0x12)?;
        let mut cursor = Cursor::new(data);
        let directory_id = cursor.read_u64::<LittleEndian>().unwrap();
        let sequence = cursor.read_u64::<LittleEndian>().unwrap();
        let name_len = cursor.read_u16::<LittleEndian>().unwrap() as usize;
        DecodeError::check_len(data, 0x12 + name_len)?;
        let name = String::from_utf8_lossy(&data[0x12..0x12 + name_len]).into_owned();
        Ok(Self {
            directory_id,
            sequence,
            name,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_key(key: &Key) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&key.objectid.to_le_bytes());
        buf.push(key.item_type as u8);
        buf.extend_from_slice(&key.offset.to_le_bytes());
        buf
    }

    fn encode_dir_entry(child: &Key, transid: u64, kind: u8, name: &str) -> Vec<u8> {
        let mut buf = encode_key(child);
        buf.extend_from_slice(&transid.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // data_len
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.push(kind);
        buf.extend_from_slice(name.as_bytes());
        buf
    }

    pub(crate) fn encode_inode_item(size: u64, mode: u32, nlink: u32) -> Vec<u8> {
        let mut buf = vec![0u8; InodeItem::SIZE];
        buf[0x00..0x08].copy_from_slice(&7u64.to_le_bytes()); // generation
        buf[0x08..0x10].copy_from_slice(&7u64.to_le_bytes()); // transid
        buf[0x10..0x18].copy_from_slice(&size.to_le_bytes());
        buf[0x18..0x20].copy_from_slice(&size.to_le_bytes()); // nbytes
        buf[0x28..0x2C].copy_from_slice(&nlink.to_le_bytes());
        buf[0x2C..0x30].copy_from_slice(&1000u32.to_le_bytes()); // uid
        buf[0x30..0x34].copy_from_slice(&1000u32.to_le_bytes()); // gid
        buf[0x34..0x38].copy_from_slice(&mode.to_le_bytes());
        buf[0x70..0x78].copy_from_slice(&1_700_000_000i64.to_le_bytes()); // atime
        buf[0x7C..0x84].copy_from_slice(&1_700_000_000i64.to_le_bytes()); // ctime
        buf[0x88..0x90].copy_from_slice(&1_700_000_000i64.to_le_bytes()); // mtime
        buf[0x94..0x9C].copy_from_slice(&1_600_000_000i64.to_le_bytes()); // otime
        buf
    }

    #[test]
    fn test_inode_item_decode() {
        let buf = encode_inode_item(4096, 0o040755, 2);
        let inode = InodeItem::parse(&buf).unwrap();
        assert_eq!(inode.size, 4096);
        assert_eq!(inode.nlink, 2);
        assert_eq!(inode.uid, 1000);
        assert!(inode.is_dir());
        assert!(!inode.is_symlink());
        assert_eq!(inode.mtime.seconds, 1_700_000_000);
        assert_eq!(inode.otime.seconds, 1_600_000_000);
    }

    #[test]
    fn test_dir_entry_decode() {
        let child = Key::new(257, ItemType::InodeItem, 0);
        let buf = encode_dir_entry(&child, 7, 1, "hello.txt");
        let entry = DirEntry::parse(&buf).unwrap();
        assert_eq!(entry.child_key, child);
        assert_eq!(entry.transid, 7);
        assert_eq!(entry.kind, DirEntryKind::RegularFile);
        assert_eq!(entry.name, "hello.txt");
    }

    #[test]
    fn test_dir_entry_truncated_name() {
        let child = Key::new(257, ItemType::InodeItem, 0);
        let mut buf = encode_dir_entry(&child, 7, 1, "hello.txt");
        buf.truncate(buf.len() - 3);
        assert!(matches!(
            DirEntry::parse(&buf),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_xattr_item_decode() {
        let mut buf = encode_key(&Key::new(257, ItemType::XattrItem, 0));
        buf.extend_from_slice(&3u64.to_le_bytes());
        buf.extend_from_slice(&4u16.to_le_bytes()); // data_len
        buf.extend_from_slice(&12u16.to_le_bytes()); // name_len
        buf.push(8);
        buf.extend_from_slice(b"user.comment");
        buf.extend_from_slice(b"abcd");

        let xattr = XattrItem::parse(&buf).unwrap();
        assert_eq!(xattr.name, "user.comment");
        assert_eq!(xattr.value, b"abcd");
    }

    #[test]
    fn test_extent_data_inline() {
        let mut buf = vec![0u8; ExtentData::HEADER_SIZE];
        buf[0x00..0x08].copy_from_slice(&5u64.to_le_bytes()); // generation
        buf[0x08..0x10].copy_from_slice(&11u64.to_le_bytes()); // logical size
        buf[0x14] = 0; // inline
        buf.extend_from_slice(b"hello world");

        let extent = ExtentData::parse(&buf).unwrap();
        assert_eq!(extent.logical_size, 11);
        assert_eq!(extent.byte_count(), 11);
        match &extent.location {
            ExtentLocation::Inline(data) => assert_eq!(data, b"hello world"),
            other => panic!("expected inline extent, got {:?}", other),
        }
    }

    #[test]
    fn test_extent_data_regular() {
        let mut buf = vec![0u8; ExtentData::HEADER_SIZE + 0x20];
        buf[0x08..0x10].copy_from_slice(&8192u64.to_le_bytes());
        buf[0x14] = 1; // regular
        buf[0x15..0x1D].copy_from_slice(&0x50_0000u64.to_le_bytes()); // disk bytenr
        buf[0x1D..0x25].copy_from_slice(&8192u64.to_le_bytes()); // disk bytes
        buf[0x2D..0x35].copy_from_slice(&8192u64.to_le_bytes()); // num bytes

        let extent = ExtentData::parse(&buf).unwrap();
        match extent.location {
            ExtentLocation::Regular {
                disk_bytenr,
                num_bytes,
                ..
            } => {
                assert_eq!(disk_bytenr, 0x50_0000);
                assert_eq!(num_bytes, 8192);
            }
            other => panic!("expected regular extent, got {:?}", other),
        }
    }

    #[test]
    fn test_chunk_item_stripes() {
        let mut buf = vec![0u8; ChunkItem::HEADER_SIZE];
        buf[0x00..0x08].copy_from_slice(&0x10_0000u64.to_le_bytes()); // length
        buf[0x08..0x10].copy_from_slice(&3u64.to_le_bytes()); // owner
        buf[0x28..0x2A].copy_from_slice(&2u16.to_le_bytes()); // stripe count
        for n in 0..2u64 {
            buf.extend_from_slice(&(n + 1).to_le_bytes());
            buf.extend_from_slice(&(0x2_0000u64 * (n + 1)).to_le_bytes());
            buf.extend_from_slice(&[0u8; 16]);
        }

        let chunk = ChunkItem::parse(&buf).unwrap();
        assert_eq!(chunk.length, 0x10_0000);
        assert_eq!(chunk.stripes.len(), 2);
        assert_eq!(chunk.stripes[1].device_id, 2);
        assert_eq!(chunk.stripes[1].offset, 0x4_0000);
        assert_eq!(chunk.size(), buf.len());
    }

    #[test]
    fn test_chunk_item_truncated_stripes() {
        let mut buf = vec![0u8; ChunkItem::HEADER_SIZE];
        buf[0x28..0x2A].copy_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&[0u8; Stripe::SIZE]); // only one stripe present
        assert!(matches!(
            ChunkItem::parse(&buf),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_root_item_decode() {
        let mut buf = encode_inode_item(3, 0o040755, 1);
        buf.extend_from_slice(&9u64.to_le_bytes()); // generation
        buf.extend_from_slice(&256u64.to_le_bytes()); // root dirid
        buf.extend_from_slice(&0x40_2000u64.to_le_bytes()); // bytenr
        buf.extend_from_slice(&[0u8; 8]); // byte limit
        buf.extend_from_slice(&16384u64.to_le_bytes()); // bytes used
        buf.extend_from_slice(&[0u8; 8]); // last snapshot
        buf.extend_from_slice(&[0u8; 8]); // flags
        buf.extend_from_slice(&1u32.to_le_bytes()); // refs
        buf.extend_from_slice(&encode_key(&Key::new(0, ItemType::InodeItem, 0)));
        buf.push(0); // drop level
        buf.push(0); // level

        let root = RootItem::parse(&buf).unwrap();
        assert_eq!(buf.len(), RootItem::SIZE);
        assert_eq!(root.generation, 9);
        assert_eq!(root.root_dirid, 256);
        assert_eq!(root.bytenr, 0x40_2000);
        assert_eq!(root.refs, 1);
        assert_eq!(root.level, 0);
    }

    #[test]
    fn test_root_ref_decode() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&256u64.to_le_bytes()); // directory id
        buf.extend_from_slice(&3u64.to_le_bytes()); // sequence
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(b"snap");

        let rref = RootRef::parse(&buf).unwrap();
        assert_eq!(rref.directory_id, 256);
        assert_eq!(rref.sequence, 3);
        assert_eq!(rref.name, "snap");
    }

    #[test]
    fn test_inode_ref_decode() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2u64.to_le_bytes()); // index
        buf.extend_from_slice(&8u16.to_le_bytes());
        buf.extend_from_slice(b"data.bin");

        let iref = InodeRef::parse(&buf).unwrap();
        assert_eq!(iref.index, 2);
        assert_eq!(iref.name, "data.bin");
    }

    #[test]
    fn test_unsupported_item_dispatch() {
        assert!(matches!(
            Item::decode(ItemType::ExtentItem, &[0u8; 64]),
            Err(DecodeError::UnsupportedItem(ItemType::ExtentItem))
        ));
    }

    #[test]
    fn test_orphan_item_empty_payload() {
        assert!(matches!(
            Item::decode(ItemType::OrphanItem, &[]),
            Ok(Item::OrphanItem)
        ));
    }
}
