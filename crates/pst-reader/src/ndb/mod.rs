//! ## [Node Database (NDB) Layer](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/e4efaad0-1876-446e-9d34-bb921588f924)
//!
//! The paged bottom half of the store: header, the NBT/BBT root B-trees,
//! block validation and deobfuscation, reassembly of logical data streams
//! from data-block trees, and sub-node resolution.

use std::sync::{Arc, Mutex};

pub mod block_id;
pub mod node_id;

pub(crate) mod block;
pub(crate) mod cache;
pub(crate) mod header;
pub(crate) mod page;

use block::{DataTreeBlock, SubNodeBlock, SubNodeEntry};
use block_id::BlockId;
use cache::NdbCaches;
use header::{FileVariant, Header};
use node_id::NodeId;
use page::{BbtEntry, NbtEntry};

use crate::{io::PagedReader, Error, Result};

/// A node's block bindings: its data stream root and optional sub-node tree.
///
/// Both top-level NBT entries and sub-node entries reduce to this, which is
/// what lets the LTP readers run unchanged over either.
#[derive(Clone, Copy, Debug)]
pub(crate) struct NodeHandle {
    pub(crate) data: BlockId,
    pub(crate) sub: Option<BlockId>,
}

impl From<NbtEntry> for NodeHandle {
    fn from(entry: NbtEntry) -> Self {
        Self {
            data: entry.data,
            sub: entry.sub,
        }
    }
}

impl From<SubNodeEntry> for NodeHandle {
    fn from(entry: SubNodeEntry) -> Self {
        Self {
            data: entry.data,
            sub: entry.sub,
        }
    }
}

/// The node database of one open file: reader, parsed header, and caches.
pub(crate) struct Ndb {
    reader: PagedReader,
    header: Header,
    caches: Mutex<NdbCaches>,
}

impl Ndb {
    pub(crate) fn new(reader: PagedReader, header: Header) -> Self {
        Self {
            reader,
            header,
            caches: Mutex::new(NdbCaches::new()),
        }
    }

    pub(crate) fn variant(&self) -> FileVariant {
        self.header.variant
    }

    pub(crate) fn file_size(&self) -> u64 {
        self.header.root.file_size
    }

    pub(crate) fn close(&self) {
        self.reader.close();
    }

    /// NBT lookup: NID to its data/sub-node block bindings.
    pub(crate) fn node(&self, node: NodeId) -> Result<NbtEntry> {
        page::find_node(
            &self.reader,
            self.header.variant,
            &self.header.root.node_btree,
            node,
        )
    }

    /// BBT lookup: BID to its file offset, size, and refcount.
    pub(crate) fn block_entry(&self, block: BlockId) -> Result<BbtEntry> {
        let key = u64::from(block);
        if let Ok(mut caches) = self.caches.lock() {
            if let Some(entry) = caches.entries.get(&key) {
                return Ok(*entry);
            }
        }

        let entry = page::find_block(
            &self.reader,
            self.header.variant,
            &self.header.root.block_btree,
            block,
        )?;

        if let Ok(mut caches) = self.caches.lock() {
            caches.entries.put(key, entry);
        }
        Ok(entry)
    }

    /// Read, validate, and decode the block behind `block`.
    pub(crate) fn block_data(&self, block: BlockId) -> Result<Arc<Vec<u8>>> {
        let key = u64::from(block);
        if let Ok(mut caches) = self.caches.lock() {
            if let Some(data) = caches.blocks.get(&key) {
                return Ok(Arc::clone(data));
            }
        }

        let entry = self.block_entry(block)?;
        let data = Arc::new(block::read_block(
            &self.reader,
            self.header.variant,
            self.header.crypt_method,
            &entry,
        )?);

        if let Ok(mut caches) = self.caches.lock() {
            caches.blocks.put(key, Arc::clone(&data));
        }
        Ok(data)
    }

    /// Resolve a node's data BID into its leaf payloads, in stream order.
    ///
    /// A leaf BID is its own single payload; an internal BID is an XBLOCK
    /// (or XXBLOCK over XBLOCKs) whose children contribute in order. The
    /// format caps the tree at two internal levels, which doubles as the
    /// cycle guard.
    pub(crate) fn node_blocks(&self, data: BlockId) -> Result<Vec<Arc<Vec<u8>>>> {
        let mut leaves = Vec::new();
        self.collect_leaves(data, 2, &mut leaves)?;
        Ok(leaves)
    }

    fn collect_leaves(
        &self,
        block: BlockId,
        internal_budget: u8,
        leaves: &mut Vec<Arc<Vec<u8>>>,
    ) -> Result<()> {
        let data = self.block_data(block)?;

        if !block.is_internal() {
            leaves.push(data);
            return Ok(());
        }

        if internal_budget == 0 {
            return Err(Error::Corrupt("data tree depth"));
        }

        let tree = DataTreeBlock::parse(self.header.variant, &data)?;
        if tree.level > internal_budget {
            return Err(Error::Corrupt("data tree level"));
        }

        for child in tree.children {
            if child.is_internal() && tree.level != 2 {
                return Err(Error::Corrupt("data tree leaf child"));
            }
            self.collect_leaves(child, internal_budget - 1, leaves)?;
        }

        Ok(())
    }

    /// Concatenate a node's leaf payloads into its logical byte stream.
    pub(crate) fn node_stream(&self, data: BlockId) -> Result<Vec<u8>> {
        let leaves = self.node_blocks(data)?;
        if let [only] = leaves.as_slice() {
            return Ok(only.as_ref().clone());
        }

        let total = leaves.iter().map(|leaf| leaf.len()).sum();
        let mut stream = Vec::with_capacity(total);
        for leaf in leaves {
            stream.extend_from_slice(&leaf);
        }
        Ok(stream)
    }

    /// Resolve `child` through the sub-node tree rooted at `sub`.
    ///
    /// Sub-node NIDs live in a namespace local to the owning node; they are
    /// never resolved through the global NBT.
    pub(crate) fn subnode(&self, sub: BlockId, child: NodeId) -> Result<SubNodeEntry> {
        let key = u32::from(child);
        let mut block = sub;

        // SIBLOCK over SLBLOCKs is the deepest legal shape.
        for _ in 0..2 {
            let data = self.block_data(block)?;
            match SubNodeBlock::parse(self.header.variant, &data)? {
                SubNodeBlock::Leaf(entries) => {
                    return entries
                        .binary_search_by_key(&key, |entry| entry.node)
                        .map(|index| entries[index])
                        .map_err(|_| Error::NotFound);
                }
                SubNodeBlock::Index(entries) => {
                    let upper = entries.partition_point(|(node, _)| *node <= key);
                    if upper == 0 {
                        return Err(Error::NotFound);
                    }
                    block = entries[upper - 1].1;
                }
            }
        }

        Err(Error::Corrupt("sub-node tree depth"))
    }

    /// Look up `child` under `handle` and return its handle, or `NotFound`
    /// when the node carries no sub-node tree at all.
    pub(crate) fn subnode_handle(&self, handle: NodeHandle, child: NodeId) -> Result<NodeHandle> {
        let sub = handle.sub.ok_or(Error::NotFound)?;
        Ok(NodeHandle::from(self.subnode(sub, child)?))
    }
}
