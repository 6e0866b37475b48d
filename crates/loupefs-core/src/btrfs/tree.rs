//! B-tree node decoding and traversal
//!
//! Every Btrfs tree is a copy-on-write B-tree of nodes sharing a common
//! 0x65-byte header. A node with level 0 is a leaf holding item payloads;
//! any higher level is an internal node holding key pointers to children.
//!
//! `find` relies on the on-disk invariant that items and key pointers are
//! stored in ascending key order; the engine exploits that order for early
//! exit and never re-sorts. Traversal is single-threaded: the per-pointer
//! child cache inside `InternalNode` is not safe for concurrent use.

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use uuid::Uuid;

use crate::btrfs::chunk::ChunkMap;
use crate::btrfs::items::Item;
use crate::btrfs::structs::{reserved, Key, KeyPointer, NodeItem};
use crate::device::BlockDevice;
use crate::error::DecodeError;

// ============================================================================
// Node header
// ============================================================================

/// Common prefix of every tree node.
#[derive(Debug, Clone)]
pub struct NodeHeader {
    pub checksum: [u8; 0x20],
    pub fs_uuid: Uuid,
    /// Logical address this node was written at.
    pub logical_address: u64,
    /// Low 56 bits of the shifted word at 0x38. The `>> 8` matches the
    /// layout this engine was verified against; unconfirmed upstream.
    pub flags: u64,
    pub backref_revision: u8,
    pub chunk_tree_uuid: Uuid,
    pub generation: u64,
    /// Object id of the tree that owns this node.
    pub tree_id: u64,
    pub item_count: u32,
    /// 0 for leaves, >0 for internal nodes.
    pub level: u8,
}

impl NodeHeader {
    pub const SIZE: usize = 0x65;

    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        DecodeError::check_len(data, Self::SIZE)?;

        let mut checksum = [0u8; 0x20];
        checksum.copy_from_slice(&data[0x00..0x20]);
        let fs_uuid = Uuid::from_slice(&data[0x20..0x30]).unwrap();

        let mut cursor = Cursor::new(&data[0x30..]);
        let logical_address = cursor.read_u64::<LittleEndian>().unwrap();
        let flags = cursor.read_u64::<LittleEndian>().unwrap() >> 8;
        let backref_revision = data[0x3F];
        let chunk_tree_uuid = Uuid::from_slice(&data[0x40..0x50]).unwrap();

        let mut cursor = Cursor::new(&data[0x50..]);
        let generation = cursor.read_u64::<LittleEndian>().unwrap();
        let tree_id = cursor.read_u64::<LittleEndian>().unwrap();
        let item_count = cursor.read_u32::<LittleEndian>().unwrap();
        let level = data[0x64];

        Ok(Self {
            checksum,
            fs_uuid,
            logical_address,
            flags,
            backref_revision,
            chunk_tree_uuid,
            generation,
            tree_id,
            item_count,
            level,
        })
    }
}

// ============================================================================
// Tree reader collaborator
// ============================================================================

/// Resolves a logical block address to a decoded child node. Implemented by
/// `TreeContext` over a real image; tests substitute in-memory readers.
pub trait TreeReader {
    fn read_tree(&self, logical: u64, parent_level: u8) -> Result<Node>;
}

/// A child must sit exactly one level below its parent.
pub fn check_child_level(parent_level: u8, child: &Node) -> Result<(), DecodeError> {
    let child_level = child.header().level;
    if parent_level == 0 || child_level != parent_level - 1 {
        return Err(DecodeError::LevelMismatch {
            parent: parent_level,
            child: child_level,
        });
    }
    Ok(())
}

/// `TreeReader` over a block device, translating logical addresses through
/// the chunk map.
pub struct TreeContext<'a> {
    device: &'a BlockDevice,
    chunks: &'a ChunkMap,
    node_size: u32,
}

impl<'a> TreeContext<'a> {
    pub fn new(device: &'a BlockDevice, chunks: &'a ChunkMap, node_size: u32) -> Self {
        Self {
            device,
            chunks,
            node_size,
        }
    }

    /// Read a tree root, where no parent level exists to check against.
    pub fn read_root(&self, logical: u64) -> Result<Node> {
        let physical = self.chunks.to_physical(logical)?;
        let data = self.device.read_block(physical, self.node_size)?;
        let node = Node::parse(data)?;
        tracing::debug!(
            "Read root node at logical 0x{:x} (physical 0x{:x}), level {}, {} items",
            logical,
            physical,
            node.header().level,
            node.header().item_count
        );
        Ok(node)
    }
}

impl TreeReader for TreeContext<'_> {
    fn read_tree(&self, logical: u64, parent_level: u8) -> Result<Node> {
        let physical = self.chunks.to_physical(logical)?;
        let data = self.device.read_block(physical, self.node_size)?;
        let node = Node::parse(data)?;
        check_child_level(parent_level, &node)?;
        tracing::trace!(
            "Descend to node at logical 0x{:x}, level {}",
            logical,
            node.header().level
        );
        Ok(node)
    }
}

// ============================================================================
// Leaf nodes
// ============================================================================

/// Leaf node: index entries plus their decoded payloads. Items keyed under
/// the reserved CsumItem or TreeReloc object ids are left undecoded (`None`)
/// and never surface from `find`.
#[derive(Debug)]
pub struct LeafNode {
    pub header: NodeHeader,
    pub items: Vec<(NodeItem, Option<Item>)>,
}

impl LeafNode {
    fn parse(header: NodeHeader, data: &[u8]) -> Result<Self, DecodeError> {
        let mut items: Vec<(NodeItem, Option<Item>)> =
            Vec::with_capacity(header.item_count as usize);
        let mut offset = NodeHeader::SIZE;

        for _ in 0..header.item_count {
            DecodeError::check_len(data, offset + NodeItem::SIZE)?;
            let node_item = NodeItem::parse(&data[offset..])?;
            offset += NodeItem::SIZE;

            let skip = matches!(
                node_item.key.objectid,
                reserved::CSUM_ITEM | reserved::TREE_RELOC
            );
            let decoded = if skip {
                None
            } else {
                let start = NodeHeader::SIZE + node_item.data_offset as usize;
                let end = start + node_item.data_size as usize;
                DecodeError::check_len(data, end)?;
                Some(Item::decode(node_item.key.item_type, &data[start..end])?)
            };

            if let Some((prev, _)) = items.last() {
                debug_assert!(
                    prev.key <= node_item.key,
                    "leaf items out of order: {} after {}",
                    node_item.key,
                    prev.key
                );
            }
            items.push((node_item, decoded));
        }

        Ok(Self { header, items })
    }

    /// All decoded items matching the key's `(objectid, item_type)` pair,
    /// each with its full on-disk key. The search key's `offset` is ignored,
    /// so multi-valued families (ExtentData, DirIndex, ...) come back in
    /// full. Scanning stops at the first item whose objectid exceeds the
    /// key's; ascending order is a precondition.
    pub fn find(&self, key: &Key) -> Vec<(Key, Item)> {
        let mut results = Vec::new();
        for (node_item, decoded) in &self.items {
            if node_item.key.objectid > key.objectid {
                break;
            }
            if node_item.key.objectid == key.objectid
                && node_item.key.item_type == key.item_type
            {
                if let Some(item) = decoded {
                    results.push((node_item.key, item.clone()));
                }
            }
        }
        results
    }
}

// ============================================================================
// Internal nodes
// ============================================================================

/// Internal node: key pointers to children one level down. Children are
/// resolved through the `TreeReader` on first descent and memoized per
/// pointer slot for the lifetime of this node.
#[derive(Debug)]
pub struct InternalNode {
    pub header: NodeHeader,
    pub pointers: Vec<KeyPointer>,
    children: Vec<Option<Box<Node>>>,
}

impl InternalNode {
    fn parse(header: NodeHeader, data: &[u8]) -> Result<Self, DecodeError> {
        if header.item_count == 0 {
            return Err(DecodeError::EmptyInternalNode(header.logical_address));
        }

        let mut pointers: Vec<KeyPointer> = Vec::with_capacity(header.item_count as usize);
        let mut offset = NodeHeader::SIZE;
        for _ in 0..header.item_count {
            DecodeError::check_len(data, offset + KeyPointer::SIZE)?;
            let pointer = KeyPointer::parse(&data[offset..])?;
            if let Some(prev) = pointers.last() {
                debug_assert!(
                    prev.key <= pointer.key,
                    "key pointers out of order: {} after {}",
                    pointer.key,
                    prev.key
                );
            }
            pointers.push(pointer);
            offset += KeyPointer::SIZE;
        }

        let children = (0..pointers.len()).map(|_| None).collect();
        Ok(Self {
            header,
            pointers,
            children,
        })
    }

    /// Descend into every child that can hold the key.
    ///
    /// Adjacent pointers may share a leading objectid, so matches can span
    /// sibling subtrees: the search starts at the pointer just before the
    /// first strictly-greater one and keeps going right until a pointer's
    /// objectid exceeds the key's.
    pub fn find(&mut self, key: &Key, reader: &dyn TreeReader) -> Result<Vec<(Key, Item)>> {
        if self.pointers[0].key.objectid > key.objectid {
            return Ok(Vec::new());
        }

        let mut i = 1;
        while i < self.pointers.len() && self.pointers[i].key.objectid < key.objectid {
            i += 1;
        }

        let mut results = Vec::new();
        for j in (i - 1)..self.pointers.len() {
            if self.pointers[j].key.objectid > key.objectid {
                break;
            }
            let child = self.child(j, reader)?;
            results.extend(child.find(key, reader)?);
        }
        Ok(results)
    }

    /// Resolve child `j`, reading it at most once per node instance.
    fn child(&mut self, j: usize, reader: &dyn TreeReader) -> Result<&mut Node> {
        if self.children[j].is_none() {
            let node = reader.read_tree(self.pointers[j].block_number, self.header.level)?;
            self.children[j] = Some(Box::new(node));
        }
        Ok(self.children[j].as_mut().unwrap())
    }
}

// ============================================================================
// Node dispatch
// ============================================================================

/// A decoded tree node. The single level byte at header offset 0x64 decides
/// the variant; that dispatch is a format invariant.
#[derive(Debug)]
pub enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl Node {
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let header = NodeHeader::parse(data)?;
        if header.level == 0 {
            Ok(Node::Leaf(LeafNode::parse(header, data)?))
        } else {
            Ok(Node::Internal(InternalNode::parse(header, data)?))
        }
    }

    pub fn header(&self) -> &NodeHeader {
        match self {
            Node::Leaf(leaf) => &leaf.header,
            Node::Internal(internal) => &internal.header,
        }
    }

    /// All items under this node matching `(objectid, item_type)`.
    /// A miss is an empty list, never an error.
    pub fn find(&mut self, key: &Key, reader: &dyn TreeReader) -> Result<Vec<(Key, Item)>> {
        match self {
            Node::Leaf(leaf) => Ok(leaf.find(key)),
            Node::Internal(internal) => internal.find(key, reader),
        }
    }

    /// First match in search order, if any.
    pub fn find_first(&mut self, key: &Key, reader: &dyn TreeReader) -> Result<Option<Item>> {
        Ok(self.find(key, reader)?.into_iter().next().map(|(_, item)| item))
    }
}

/// One tree of the forest: a root node pinned at its logical address.
pub struct Tree {
    root_logical: u64,
    root: Node,
}

impl Tree {
    /// Load the root node of the tree rooted at `logical`.
    pub fn load(context: &TreeContext<'_>, logical: u64) -> Result<Self> {
        let root = context.read_root(logical)?;
        Ok(Self {
            root_logical: logical,
            root,
        })
    }

    pub fn root_logical(&self) -> u64 {
        self.root_logical
    }

    pub fn level(&self) -> u8 {
        self.root.header().level
    }

    pub fn find(&mut self, key: &Key, reader: &dyn TreeReader) -> Result<Vec<(Key, Item)>> {
        self.root.find(key, reader)
    }

    pub fn find_first(&mut self, key: &Key, reader: &dyn TreeReader) -> Result<Option<Item>> {
        self.root.find_first(key, reader)
    }
}

// ============================================================================
// Tests
// ============================================================================
