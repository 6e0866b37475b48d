//! Btrfs on-disk format support
//!
//! Module layering, leaf-first: `structs` (fixed-layout records), `items`
//! (leaf payload decoders), `tree` (node decoding and key search), `chunk`
//! (logical address translation), `volume` (superblock bootstrap and the
//! file/directory operations built on `find`).

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use uuid::Uuid;

pub mod chunk;
pub mod items;
pub mod structs;
pub mod tree;
pub mod volume;

use crate::error::DecodeError;

/// Superblock magic at offset 0x40.
pub const BTRFS_MAGIC: &[u8; 8] = b"_BHRfS_M";

/// Byte offset of the primary superblock copy.
pub const SUPERBLOCK_OFFSET: u64 = 0x10000;

/// Size of the superblock region read from disk.
pub const SUPERBLOCK_SIZE: usize = 0x1000;

const SYS_CHUNK_ARRAY_OFFSET: usize = 0x32B;
const SYS_CHUNK_ARRAY_MAX: usize = 0x800;

/// Primary superblock. Only the fields this read-only core consumes are
/// decoded; backup root copies are an external collaborator's concern.
#[derive(Debug, Clone)]
pub struct Superblock {
    pub fs_uuid: Uuid,
    pub generation: u64,
    /// Logical address of the root tree root.
    pub root: u64,
    /// Logical address of the chunk tree root.
    pub chunk_root: u64,
    pub log_root: u64,
    pub total_bytes: u64,
    pub bytes_used: u64,
    pub root_dir_objectid: u64,
    pub num_devices: u64,
    pub sector_size: u32,
    pub node_size: u32,
    pub stripe_size: u32,
    pub chunk_root_generation: u64,
    pub root_level: u8,
    pub chunk_root_level: u8,
    pub label: String,
    /// Raw bootstrap chunk records; see `ChunkMap::from_sys_chunk_array`.
    pub sys_chunk_array: Vec<u8>,
}

impl Superblock {
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len(data, SYS_CHUNK_ARRAY_OFFSET + SYS_CHUNK_ARRAY_MAX)?;
        if &data[0x40..0x48] != BTRFS_MAGIC {
            return Err(DecodeError::BadMagic);
        }

        let fs_uuid = Uuid::from_slice(&data[0x20..0x30]).unwrap();

        let mut cursor = Cursor::new(&data[0x48..]);
        let generation = cursor.read_u64::<LittleEndian>().unwrap();
        let root = cursor.read_u64::<LittleEndian>().unwrap();
        let chunk_root = cursor.read_u64::<LittleEndian>().unwrap();
        let log_root = cursor.read_u64::<LittleEndian>().unwrap();

        let mut cursor = Cursor::new(&data[0x70..]);
        let total_bytes = cursor.read_u64::<LittleEndian>().unwrap();
        let bytes_used = cursor.read_u64::<LittleEndian>().unwrap();
        let root_dir_objectid = cursor.read_u64::<LittleEndian>().unwrap();
        let num_devices = cursor.read_u64::<LittleEndian>().unwrap();
        let sector_size = cursor.read_u32::<LittleEndian>().unwrap();
        let node_size = cursor.read_u32::<LittleEndian>().unwrap();
        let _leaf_size = cursor.read_u32::<LittleEndian>().unwrap(); // deprecated
        let stripe_size = cursor.read_u32::<LittleEndian>().unwrap();
        let sys_chunk_array_size = cursor.read_u32::<LittleEndian>().unwrap() as usize;
        let chunk_root_generation = cursor.read_u64::<LittleEndian>().unwrap();

        let root_level = data[0xC6];
        let chunk_root_level = data[0xC7];

        let label_raw = &data[0x12B..0x22B];
        let label_end = label_raw.iter().position(|&b| b == 0).unwrap_or(0x100);
        let label = String::from_utf8_lossy(&label_raw[..label_end]).into_owned();

        if sys_chunk_array_size > SYS_CHUNK_ARRAY_MAX {
            return Err(DecodeError::Truncated {
                needed: sys_chunk_array_size,
                available: SYS_CHUNK_ARRAY_MAX,
            });
        }
        let sys_chunk_array =
            data[SYS_CHUNK_ARRAY_OFFSET..SYS_CHUNK_ARRAY_OFFSET + sys_chunk_array_size].to_vec();

        Ok(Self {
            fs_uuid,
            generation,
            root,
            chunk_root,
            log_root,
            total_bytes,
            bytes_used,
            root_dir_objectid,
            num_devices,
            sector_size,
            node_size,
            stripe_size,
            chunk_root_generation,
            root_level,
            chunk_root_level,
            label,
            sys_chunk_array,
        })
    }
}

/// Cheap probe used before committing to a full parse.
pub fn is_btrfs_superblock(data: &[u8]) -> bool {
    data.len() >= 0x48 && &data[0x40..0x48] == BTRFS_MAGIC
}
