//! LoupeFS core: read-only Btrfs B-tree decoding and traversal
//!
//! The crate decodes raw Btrfs images into a searchable forest of B-trees:
//! superblock bootstrap, chunk-tree logical-to-physical translation, node
//! decoding (leaf and internal), and key-based `find` lookups, with
//! file/directory/extent operations layered on top by `Volume`.
//!
//! Everything is read-only and single-threaded; there is no write path and
//! no retry or backup-root fallback.

pub mod btrfs;
pub mod device;
pub mod error;

pub use btrfs::chunk::ChunkMap;
pub use btrfs::items::{
    ChunkItem, DevItem, DirEntry, DirEntryKind, ExtentData, ExtentLocation, InodeItem, InodeRef,
    Item, RootItem, RootRef, XattrItem,
};
pub use btrfs::structs::{reserved, ItemType, Key, KeyPointer, NodeItem, Stripe, TimeSpec};
pub use btrfs::tree::{Node, NodeHeader, Tree, TreeContext, TreeReader};
pub use btrfs::volume::{DirListing, FileExtent, SubvolumeInfo, Volume};
pub use btrfs::{is_btrfs_superblock, Superblock};
pub use device::BlockDevice;
pub use error::DecodeError;
