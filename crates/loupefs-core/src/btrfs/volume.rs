//! Volume-level operations
//!
//! `Volume` owns the device, the chunk map, and the decoded tree roots, and
//! layers the file/directory operations over the raw `find` API. All of it
//! is single-threaded: the lazily-filled child caches inside the trees are
//! not safe for concurrent lookups.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::btrfs::chunk::ChunkMap;
use crate::btrfs::items::{
    DirEntryKind, ExtentData, ExtentLocation, InodeItem, Item, RootRef, XattrItem,
};
use crate::btrfs::structs::{reserved, ItemType, Key};
use crate::btrfs::tree::{Tree, TreeContext};
use crate::btrfs::{Superblock, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE};
use crate::device::BlockDevice;

/// One directory entry as seen by `list_dir`.
#[derive(Debug, Clone, Serialize)]
pub struct DirListing {
    /// DirIndex sequence number within the directory.
    pub index: u64,
    pub name: String,
    /// Child inode number (or subvolume tree id for subvolume entries).
    pub inode: u64,
    pub kind: DirEntryKind,
}

/// One extent of a file, positioned by its byte offset within the file.
#[derive(Debug, Clone)]
pub struct FileExtent {
    pub file_offset: u64,
    pub extent: ExtentData,
}

/// A subvolume visible from the root tree.
#[derive(Debug, Clone, Serialize)]
pub struct SubvolumeInfo {
    pub tree_id: u64,
    pub directory_id: u64,
    pub name: String,
}

/// An opened Btrfs image: superblock, chunk translation, and the default
/// FS tree, ready for lookups.
pub struct Volume {
    device: BlockDevice,
    superblock: Superblock,
    chunks: ChunkMap,
    root_tree: Tree,
    fs_tree: Tree,
    /// Object id of the FS tree's root directory inode.
    root_dir: u64,
}

impl Volume {
    /// Open an image file and bootstrap the forest: superblock, system
    /// chunks, full chunk tree, root tree, default FS tree.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let device = BlockDevice::open(path.as_ref())?;
        let sb_data = device.read_bytes(SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE)?;
        let superblock = Superblock::parse(sb_data)?;
        tracing::info!(
            "Btrfs superblock: label {:?}, generation {}, node size {}",
            superblock.label,
            superblock.generation,
            superblock.node_size
        );

        // The chunk tree's own nodes live in system chunks, so a bootstrap
        // map from the superblock is enough to walk it.
        let bootstrap = ChunkMap::from_sys_chunk_array(&superblock.sys_chunk_array)?;
        let chunks = {
            let context = TreeContext::new(&device, &bootstrap, superblock.node_size);
            let mut chunk_tree = Tree::load(&context, superblock.chunk_root)?;
            let mut full = ChunkMap::new();
            let key = Key::new(reserved::FIRST_CHUNK_TREE, ItemType::ChunkItem, 0);
            for (item_key, item) in chunk_tree.find(&key, &context)? {
                let chunk = item
                    .as_chunk_item()
                    .context("chunk tree returned a non-chunk item")?;
                full.insert(item_key.offset, chunk)?;
            }
            full
        };
        tracing::debug!("Chunk map: {} chunk(s)", chunks.len());

        let context = TreeContext::new(&device, &chunks, superblock.node_size);
        let mut root_tree = Tree::load(&context, superblock.root)?;

        let fs_root_key = Key::new(reserved::FS_TREE, ItemType::RootItem, 0);
        let fs_root = match root_tree.find_first(&fs_root_key, &context)? {
            Some(Item::RootItem(root)) => root,
            Some(_) | None => bail!("root tree has no RootItem for the FS tree"),
        };
        let fs_tree = Tree::load(&context, fs_root.bytenr)?;
        tracing::debug!(
            "FS tree root at logical 0x{:x}, level {}, root dir {}",
            fs_root.bytenr,
            fs_tree.level(),
            fs_root.root_dirid
        );

        Ok(Self {
            device,
            superblock,
            chunks,
            root_tree,
            fs_tree,
            root_dir: fs_root.root_dirid,
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Inode number of the FS tree's root directory.
    pub fn root_dir(&self) -> u64 {
        self.root_dir
    }

    /// Raw key search in the default FS tree.
    pub fn find_in_fs_tree(&mut self, key: &Key) -> Result<Vec<(Key, Item)>> {
        let context = TreeContext::new(&self.device, &self.chunks, self.superblock.node_size);
        self.fs_tree.find(key, &context)
    }

    /// Raw key search in the root tree.
    pub fn find_in_root_tree(&mut self, key: &Key) -> Result<Vec<(Key, Item)>> {
        let context = TreeContext::new(&self.device, &self.chunks, self.superblock.node_size);
        self.root_tree.find(key, &context)
    }

    /// Inode metadata, or `None` if the inode does not exist.
    pub fn inode(&mut self, ino: u64) -> Result<Option<InodeItem>> {
        let matches = self.find_in_fs_tree(&Key::new(ino, ItemType::InodeItem, 0))?;
        Ok(matches
            .into_iter()
            .next()
            .and_then(|(_, item)| item.as_inode_item().cloned()))
    }

    /// Directory entries of `ino`, in index order as stored on disk.
    pub fn list_dir(&mut self, ino: u64) -> Result<Vec<DirListing>> {
        let matches = self.find_in_fs_tree(&Key::new(ino, ItemType::DirIndex, 0))?;
        let mut entries = Vec::with_capacity(matches.len());
        for (key, item) in matches {
            let entry = item
                .as_dir_entry()
                .context("DirIndex key decoded to a non-directory item")?;
            entries.push(DirListing {
                index: key.offset,
                name: entry.name.clone(),
                inode: entry.child_key.objectid,
                kind: entry.kind,
            });
        }
        Ok(entries)
    }

    /// Resolve an absolute path to an inode number within the default FS
    /// tree. `None` if any component is missing.
    pub fn lookup(&mut self, path: &str) -> Result<Option<u64>> {
        let mut ino = self.root_dir;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            // DirItem keys hash the name into the offset; matching on
            // (objectid, type) sidesteps the hash and scans the entries.
            let matches = self.find_in_fs_tree(&Key::new(ino, ItemType::DirItem, 0))?;
            let next = matches.iter().find_map(|(_, item)| {
                item.as_dir_entry()
                    .filter(|entry| entry.name == component)
                    .map(|entry| entry.child_key.objectid)
            });
            match next {
                Some(child) => ino = child,
                None => return Ok(None),
            }
        }
        Ok(Some(ino))
    }

    /// File extents of `ino`, ordered by file offset.
    pub fn extents(&mut self, ino: u64) -> Result<Vec<FileExtent>> {
        let matches = self.find_in_fs_tree(&Key::new(ino, ItemType::ExtentData, 0))?;
        let mut extents = Vec::with_capacity(matches.len());
        for (key, item) in matches {
            let extent = item
                .as_extent_data()
                .context("ExtentData key decoded to a non-extent item")?;
            extents.push(FileExtent {
                file_offset: key.offset,
                extent: extent.clone(),
            });
        }
        Ok(extents)
    }

    /// Extended attributes of `ino`.
    pub fn xattrs(&mut self, ino: u64) -> Result<Vec<XattrItem>> {
        let matches = self.find_in_fs_tree(&Key::new(ino, ItemType::XattrItem, 0))?;
        Ok(matches
            .into_iter()
            .filter_map(|(_, item)| item.as_xattr_item().cloned())
            .collect())
    }

    /// Full file content. Holes and preallocated ranges read as zeros;
    /// output is truncated to the inode's size.
    pub fn read_file(&mut self, ino: u64) -> Result<Vec<u8>> {
        let inode = self
            .inode(ino)?
            .with_context(|| format!("inode {} not found", ino))?;
        let extents = self.extents(ino)?;

        let mut out = vec![0u8; inode.size as usize];
        for FileExtent {
            file_offset,
            extent,
        } in extents
        {
            if extent.compression != 0 {
                bail!("compressed extents are not supported");
            }
            let start = file_offset as usize;
            if start >= out.len() {
                continue;
            }
            match &extent.location {
                ExtentLocation::Inline(data) => {
                    let len = data.len().min(out.len() - start);
                    out[start..start + len].copy_from_slice(&data[..len]);
                }
                ExtentLocation::Regular {
                    disk_bytenr,
                    extent_offset,
                    num_bytes,
                    ..
                } => {
                    // A zero disk address marks a hole.
                    if *disk_bytenr == 0 {
                        continue;
                    }
                    let len = (*num_bytes as usize).min(out.len() - start);
                    let physical = self.chunks.to_physical(disk_bytenr + extent_offset)?;
                    let data = self.device.read_bytes(physical, len)?;
                    out[start..start + len].copy_from_slice(data);
                }
                ExtentLocation::Prealloc { .. } => {}
            }
        }
        Ok(out)
    }

    /// Subvolumes referenced from the top-level FS tree.
    pub fn subvolumes(&mut self) -> Result<Vec<SubvolumeInfo>> {
        let matches = self.find_in_root_tree(&Key::new(reserved::FS_TREE, ItemType::RootRef, 0))?;
        let mut subvols = Vec::with_capacity(matches.len());
        for (key, item) in matches {
            let RootRef {
                directory_id, name, ..
            } = item
                .as_root_ref()
                .context("RootRef key decoded to a non-ref item")?
                .clone();
            subvols.push(SubvolumeInfo {
                tree_id: key.offset,
                directory_id,
                name,
            });
        }
        Ok(subvols)
    }
}
