//! ## [HN (Heap-on-Node)](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/77ce49a3-3772-4d8d-bb2c-2f7520a238a6)
//!
//! A node's logical stream reinterpreted as a heap: each leaf block is one
//! heap page, addressed by `(page, allocation)` pairs packed into HIDs and
//! bounded by the per-page allocation map.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use std::sync::Arc;

use crate::ndb::{Ndb, NodeHandle};
use crate::{Error, Result};

/// [HID](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/85b9e985-ea53-447f-b70c-eb82bfbdcbc9):
/// `hidType` (5 bits, always zero), `hidIndex` (11 bits, 1-based),
/// `hidBlockIndex` (16 bits).
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub(crate) struct HeapId(u32);

impl HeapId {
    /// 0-based allocation index within the page.
    pub(crate) fn index(&self) -> Result<u16> {
        if self.0 & 0x1F != 0 {
            return Err(Error::InvalidHid(self.0));
        }
        let index = ((self.0 >> 5) & 0x7FF) as u16;
        if index < 1 {
            return Err(Error::InvalidHid(self.0));
        }
        Ok(index - 1)
    }

    pub(crate) fn block_index(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub(crate) fn is_nil(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for HeapId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<HeapId> for u32 {
    fn from(value: HeapId) -> Self {
        value.0
    }
}

/// `bClientSig`: what structure the heap carries.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum HeapClient {
    /// `bTypeTC`: Table Context
    Table = 0x7C,
    /// `bTypeBTH`: BTree-on-Heap
    Tree = 0xB5,
    /// `bTypePC`: Property Context
    Properties = 0xBC,
}

impl TryFrom<u8> for HeapClient {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x7C => Ok(Self::Table),
            0xB5 => Ok(Self::Tree),
            0xBC => Ok(Self::Properties),
            _ => Err(Error::Corrupt("HNHDR bClientSig")),
        }
    }
}

/// An opened heap: the node's leaf payloads plus the parsed HNHDR, with the
/// owning node's handle kept for sub-node value resolution.
pub(crate) struct HeapNode {
    blocks: Vec<Arc<Vec<u8>>>,
    client: HeapClient,
    user_root: HeapId,
    node: NodeHandle,
}

impl HeapNode {
    /// Load the node's stream and parse the heap header on page 0.
    pub(crate) fn open(ndb: &Ndb, node: NodeHandle) -> Result<Self> {
        let blocks = ndb.node_blocks(node.data)?;
        let first = blocks.first().ok_or(Error::Corrupt("empty heap node"))?;

        let mut cursor = Cursor::new(first.as_slice());

        // ibHnpm
        cursor.read_u16::<LittleEndian>()?;

        // bSig
        let signature = cursor.read_u8()?;
        if signature != 0xEC {
            return Err(Error::Corrupt("HNHDR bSig"));
        }

        // bClientSig
        let client = HeapClient::try_from(cursor.read_u8()?)?;

        // hidUserRoot
        let user_root = HeapId::from(cursor.read_u32::<LittleEndian>()?);

        // rgbFillLevel follows; fill levels only matter to writers.

        Ok(Self {
            blocks,
            client,
            user_root,
            node,
        })
    }

    pub(crate) fn client(&self) -> HeapClient {
        self.client
    }

    pub(crate) fn user_root(&self) -> HeapId {
        self.user_root
    }

    pub(crate) fn node(&self) -> NodeHandle {
        self.node
    }

    /// Resolve an HID to its allocation's bytes.
    pub(crate) fn resolve(&self, heap_id: HeapId) -> Result<&[u8]> {
        let block_index = usize::from(heap_id.block_index());
        let block = self
            .blocks
            .get(block_index)
            .ok_or(Error::InvalidHid(u32::from(heap_id)))?;

        let mut cursor = Cursor::new(block.as_slice());

        // Page 0 opens with the HNHDR, fill-level bitmap pages (8, then
        // every 128th after) with an HNBITMAPHDR, everything else with an
        // HNPAGEHDR; all three lead with the page-map offset.
        let page_map_offset = cursor.read_u16::<LittleEndian>()?;

        let page_map = block
            .get(usize::from(page_map_offset)..)
            .ok_or(Error::Corrupt("HNPAGEMAP offset"))?;
        let mut cursor = Cursor::new(page_map);

        // cAlloc, cFree
        let alloc_count = cursor.read_u16::<LittleEndian>()?;
        cursor.read_u16::<LittleEndian>()?;

        let index = usize::from(heap_id.index()?);
        if index >= usize::from(alloc_count) {
            return Err(Error::InvalidHid(u32::from(heap_id)));
        }

        // rgibAlloc has cAlloc+1 entries; consecutive pairs bound each
        // allocation.
        let mut start = 0;
        let mut end = 0;
        for entry in 0..=usize::from(alloc_count) {
            let offset = cursor.read_u16::<LittleEndian>()?;
            if entry == index {
                start = usize::from(offset);
            }
            if entry == index + 1 {
                end = usize::from(offset);
            }
        }

        if start > end || end > block.len() {
            return Err(Error::Corrupt("HNPAGEMAP rgibAlloc"));
        }

        Ok(&block[start..end])
    }
}
