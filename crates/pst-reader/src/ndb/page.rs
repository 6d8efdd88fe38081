//! [Pages](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/5774b4f2-cdc4-453e-996a-8c8230116930)
//!
//! NBT and BBT pages share one 512-byte format: a fixed entry array, an
//! entry-count block, and a page trailer. Interior pages hold key/child-page
//! references; leaf pages hold full entries. Both trees are strictly ordered
//! by key.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use super::{block_id::BlockId, header::FileVariant, node_id::NodeId};
use crate::{crc::compute_crc, io::PagedReader, Error, Result};

pub(crate) const PAGE_SIZE: usize = 512;

/// The deepest legal NBT/BBT page chain; a longer descent is a cycle.
const MAX_TREE_DEPTH: u8 = 8;

/// [BREF](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/844a5ebf-488a-45fd-8fce-92a84d8e24a3):
/// a block id paired with its absolute file offset.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PageRef {
    pub(crate) block: BlockId,
    pub(crate) offset: u64,
}

/// `ptype`
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum TreeKind {
    /// `ptypeBBT`
    Block,
    /// `ptypeNBT`
    Node,
}

impl TreeKind {
    fn page_type(self) -> u8 {
        match self {
            TreeKind::Block => 0x80,
            TreeKind::Node => 0x81,
        }
    }
}

/// [NBTENTRY](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/53a4b926-8ac4-45c9-9c6d-8358d951dbcd)
#[derive(Clone, Copy, Debug)]
pub(crate) struct NbtEntry {
    pub(crate) node: NodeId,
    pub(crate) data: BlockId,
    pub(crate) sub: Option<BlockId>,
    pub(crate) parent: NodeId,
}

/// [BBTENTRY](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/53a4b926-8ac4-45c9-9c6d-8358d951dbcd)
#[derive(Clone, Copy, Debug)]
pub(crate) struct BbtEntry {
    pub(crate) block: BlockId,
    pub(crate) offset: u64,
    pub(crate) size: u16,
    /// `cRef` is informational on the read path; zero draws a warning only.
    pub(crate) ref_count: u16,
}

enum PageEntries {
    Interior(Vec<(u64, PageRef)>),
    NodeLeaf(Vec<NbtEntry>),
    BlockLeaf(Vec<BbtEntry>),
}

struct BTreePage {
    level: u8,
    entries: PageEntries,
}

fn read_page(
    reader: &PagedReader,
    variant: FileVariant,
    page: &PageRef,
    kind: TreeKind,
) -> Result<BTreePage> {
    let buffer = reader.read_at(page.offset, PAGE_SIZE)?;

    let (meta_offset, trailer_offset) = if variant.is_unicode() {
        (488, 496)
    } else {
        (496, 500)
    };

    let entry_count = buffer[meta_offset] as usize;
    let max_entries = buffer[meta_offset + 1] as usize;
    let entry_size = buffer[meta_offset + 2] as usize;
    let level = buffer[meta_offset + 3];

    let mut trailer = Cursor::new(&buffer[trailer_offset..]);
    let page_type = trailer.read_u8()?;
    let page_type_repeat = trailer.read_u8()?;
    if page_type != kind.page_type() || page_type != page_type_repeat {
        return Err(Error::Corrupt("PAGETRAILER ptype"));
    }

    let signature = trailer.read_u16::<LittleEndian>()?;
    let (crc, block_id) = if variant.is_unicode() {
        let crc = trailer.read_u32::<LittleEndian>()?;
        let block_id = trailer.read_u64::<LittleEndian>()?;
        (crc, block_id)
    } else {
        let block_id = u64::from(trailer.read_u32::<LittleEndian>()?);
        let crc = trailer.read_u32::<LittleEndian>()?;
        (crc, block_id)
    };

    if crc != compute_crc(0, &buffer[..trailer_offset]) {
        return Err(Error::Corrupt("PAGETRAILER dwCRC"));
    }
    if signature != BlockId::from(block_id).signature(page.offset) {
        return Err(Error::Corrupt("PAGETRAILER wSig"));
    }
    if u64::from(page.block) != 0 && u64::from(page.block) != block_id {
        return Err(Error::Corrupt("PAGETRAILER bid"));
    }

    let natural_size = entry_width(variant, kind, level);
    if entry_size < natural_size
        || entry_count > max_entries
        || entry_count * entry_size > meta_offset
    {
        return Err(Error::Corrupt("BTPAGE cEnt"));
    }

    let mut keys = Vec::with_capacity(entry_count);
    let entries = if level == 0 {
        match kind {
            TreeKind::Node => {
                let mut entries = Vec::with_capacity(entry_count);
                for index in 0..entry_count {
                    let mut cursor = Cursor::new(&buffer[index * entry_size..]);
                    let (node, data, sub, parent) = if variant.is_unicode() {
                        (
                            cursor.read_u64::<LittleEndian>()? as u32,
                            cursor.read_u64::<LittleEndian>()?,
                            cursor.read_u64::<LittleEndian>()?,
                            cursor.read_u32::<LittleEndian>()?,
                        )
                    } else {
                        (
                            cursor.read_u32::<LittleEndian>()?,
                            u64::from(cursor.read_u32::<LittleEndian>()?),
                            u64::from(cursor.read_u32::<LittleEndian>()?),
                            cursor.read_u32::<LittleEndian>()?,
                        )
                    };
                    keys.push(u64::from(node));
                    let sub = BlockId::from(sub);
                    entries.push(NbtEntry {
                        node: NodeId::from(node),
                        data: BlockId::from(data),
                        sub: (!sub.is_nil()).then_some(sub),
                        parent: NodeId::from(parent),
                    });
                }
                PageEntries::NodeLeaf(entries)
            }
            TreeKind::Block => {
                let mut entries = Vec::with_capacity(entry_count);
                for index in 0..entry_count {
                    let mut cursor = Cursor::new(&buffer[index * entry_size..]);
                    let (block, offset) = if variant.is_unicode() {
                        (
                            cursor.read_u64::<LittleEndian>()?,
                            cursor.read_u64::<LittleEndian>()?,
                        )
                    } else {
                        (
                            u64::from(cursor.read_u32::<LittleEndian>()?),
                            u64::from(cursor.read_u32::<LittleEndian>()?),
                        )
                    };
                    let size = cursor.read_u16::<LittleEndian>()?;
                    let ref_count = cursor.read_u16::<LittleEndian>()?;
                    keys.push(block);
                    entries.push(BbtEntry {
                        block: BlockId::from(block),
                        offset,
                        size,
                        ref_count,
                    });
                }
                PageEntries::BlockLeaf(entries)
            }
        }
    } else {
        let mut entries = Vec::with_capacity(entry_count);
        for index in 0..entry_count {
            let mut cursor = Cursor::new(&buffer[index * entry_size..]);
            let (key, block, offset) = if variant.is_unicode() {
                (
                    cursor.read_u64::<LittleEndian>()?,
                    cursor.read_u64::<LittleEndian>()?,
                    cursor.read_u64::<LittleEndian>()?,
                )
            } else {
                (
                    u64::from(cursor.read_u32::<LittleEndian>()?),
                    u64::from(cursor.read_u32::<LittleEndian>()?),
                    u64::from(cursor.read_u32::<LittleEndian>()?),
                )
            };
            keys.push(key);
            entries.push((
                key,
                PageRef {
                    block: BlockId::from(block),
                    offset,
                },
            ));
        }
        PageEntries::Interior(entries)
    };

    // Strictly ascending keys; a duplicate or inversion is corruption, not a
    // near-miss to paper over.
    if !keys.windows(2).all(|pair| pair[0] < pair[1]) {
        return Err(Error::Corrupt("BTPAGE key order"));
    }

    Ok(BTreePage { level, entries })
}

fn entry_width(variant: FileVariant, kind: TreeKind, level: u8) -> usize {
    match (variant.is_unicode(), kind, level) {
        (true, _, 1..) => 24,
        (false, _, 1..) => 12,
        (true, TreeKind::Node, 0) => 32,
        (false, TreeKind::Node, 0) => 16,
        (true, TreeKind::Block, 0) => 24,
        (false, TreeKind::Block, 0) => 12,
    }
}

/// Descend one of the root B-trees to the leaf entry with exactly `key`.
///
/// Per-page lookup is a binary search; a missing key fails with
/// [`Error::NotFound`], never a neighbor substitution.
fn find_leaf(
    reader: &PagedReader,
    variant: FileVariant,
    root: &PageRef,
    kind: TreeKind,
    key: u64,
) -> Result<PageEntries> {
    let mut page = read_page(reader, variant, root, kind)?;
    let mut expected_level: Option<u8> = None;

    for _ in 0..=MAX_TREE_DEPTH {
        if let Some(expected) = expected_level {
            if page.level != expected {
                return Err(Error::Corrupt("BTPAGE cLevel"));
            }
        } else if page.level > MAX_TREE_DEPTH {
            return Err(Error::Corrupt("BTPAGE cLevel"));
        }

        match page.entries {
            PageEntries::Interior(entries) => {
                let upper = entries.partition_point(|(entry_key, _)| *entry_key <= key);
                if upper == 0 {
                    return Err(Error::NotFound);
                }
                let child = entries[upper - 1].1;
                expected_level = Some(page.level - 1);
                page = read_page(reader, variant, &child, kind)?;
            }
            leaf => return Ok(leaf),
        }
    }

    Err(Error::Corrupt("BTPAGE descent depth"))
}

/// Look up `node` in the Node BTree.
pub(crate) fn find_node(
    reader: &PagedReader,
    variant: FileVariant,
    root: &PageRef,
    node: NodeId,
) -> Result<NbtEntry> {
    let key = u64::from(u32::from(node));
    match find_leaf(reader, variant, root, TreeKind::Node, key)? {
        PageEntries::NodeLeaf(entries) => entries
            .binary_search_by_key(&key, |entry| u64::from(u32::from(entry.node)))
            .map(|index| entries[index])
            .map_err(|_| Error::NotFound),
        _ => unreachable!("find_leaf returned the wrong leaf kind"),
    }
}

/// Look up `block` in the Block BTree.
pub(crate) fn find_block(
    reader: &PagedReader,
    variant: FileVariant,
    root: &PageRef,
    block: BlockId,
) -> Result<BbtEntry> {
    let key = u64::from(block);
    match find_leaf(reader, variant, root, TreeKind::Block, key)? {
        PageEntries::BlockLeaf(entries) => entries
            .binary_search_by_key(&key, |entry| u64::from(entry.block))
            .map(|index| entries[index])
            .map_err(|_| Error::NotFound),
        _ => unreachable!("find_leaf returned the wrong leaf kind"),
    }
}
