//! Synthetic Unicode PST images for the end-to-end tests.
//!
//! The builder lays out real on-disk structures — header, NBT/BBT pages,
//! trailered blocks, heaps, BTHs, property and table contexts — through the
//! same CRC/signature/cipher primitives the reader validates with, so every
//! scenario runs against bytes a conforming writer could have produced.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::crc::compute_crc;
use crate::ndb::block::{block_allocation, BlockCodec};
use crate::ndb::block_id::BlockId;
use crate::ndb::header::CryptMethod;

mod scenarios;

const HEADER_SPAN: usize = 0x600;
const PAGE_SIZE: usize = 512;
const TRAILER_SIZE: usize = 16;
const MAX_PAYLOAD: usize = 8192 - TRAILER_SIZE;

/// Leaf-page capacities: 488-byte entry regions over 32-byte NBT and
/// 24-byte BBT/interior entries.
const NBT_PER_PAGE: usize = 15;
const BBT_PER_PAGE: usize = 20;

struct BlockSpec {
    bid: u64,
    data: Vec<u8>,
    corrupt_crc: bool,
}

pub(crate) struct ImageBuilder {
    crypt: CryptMethod,
    blocks: Vec<BlockSpec>,
    nodes: Vec<(u32, u64, u64)>,
    next_bid: u64,
}

impl ImageBuilder {
    pub(crate) fn new(crypt: CryptMethod) -> Self {
        Self {
            crypt,
            blocks: Vec::new(),
            nodes: Vec::new(),
            next_bid: 4,
        }
    }

    fn push_block(&mut self, internal: bool, data: Vec<u8>) -> u64 {
        let bid = self.next_bid | if internal { 0x2 } else { 0x0 };
        self.next_bid += 4;
        self.blocks.push(BlockSpec {
            bid,
            data,
            corrupt_crc: false,
        });
        bid
    }

    /// Add an external data block, stored through the image's cipher.
    pub(crate) fn data_block(&mut self, data: &[u8]) -> u64 {
        let bid = self.next_bid;
        let mut stored = data.to_vec();
        BlockCodec::new(self.crypt, BlockId::from(bid)).encode(&mut stored);
        self.push_block(false, stored)
    }

    /// Add an internal (pointer) block; never ciphered.
    pub(crate) fn internal_block(&mut self, data: Vec<u8>) -> u64 {
        self.push_block(true, data)
    }

    /// Store `data` as a node stream: one leaf when it fits, an XBLOCK over
    /// leaves otherwise.
    pub(crate) fn stream(&mut self, data: &[u8]) -> u64 {
        if data.len() <= MAX_PAYLOAD {
            return self.data_block(data);
        }

        let children: Vec<u64> = data
            .chunks(MAX_PAYLOAD)
            .map(|chunk| self.data_block(chunk))
            .collect();

        let mut xblock = Vec::new();
        xblock.push(0x01);
        xblock.push(0x01);
        xblock
            .write_u16::<LittleEndian>(children.len() as u16)
            .unwrap();
        xblock
            .write_u32::<LittleEndian>(data.len() as u32)
            .unwrap();
        for child in &children {
            xblock.write_u64::<LittleEndian>(*child).unwrap();
        }
        self.internal_block(xblock)
    }

    /// Add an SLBLOCK over `(nid, data bid, sub bid)` entries.
    pub(crate) fn subnode_block(&mut self, entries: &[(u32, u64, u64)]) -> u64 {
        let mut sorted = entries.to_vec();
        sorted.sort_by_key(|(nid, _, _)| *nid);

        let mut block = Vec::new();
        block.push(0x02);
        block.push(0x00);
        block.write_u16::<LittleEndian>(sorted.len() as u16).unwrap();
        block.write_u32::<LittleEndian>(0).unwrap();
        for (nid, data, sub) in sorted {
            block.write_u64::<LittleEndian>(u64::from(nid)).unwrap();
            block.write_u64::<LittleEndian>(data).unwrap();
            block.write_u64::<LittleEndian>(sub).unwrap();
        }
        self.internal_block(block)
    }

    /// Register a node in the NBT.
    pub(crate) fn node(&mut self, nid: u32, data: u64, sub: u64) {
        self.nodes.push((nid, data, sub));
    }

    /// Flip the stored CRC of `bid` when the image is built.
    pub(crate) fn corrupt_block_crc(&mut self, bid: u64) {
        let spec = self
            .blocks
            .iter_mut()
            .find(|spec| spec.bid == bid)
            .expect("corrupting an unknown block");
        spec.corrupt_crc = true;
    }

    /// Lay the image out and return its bytes.
    pub(crate) fn build(&self) -> Vec<u8> {
        let mut image = vec![0_u8; HEADER_SPAN];
        let mut bbt_entries: Vec<(u64, u64, u16)> = Vec::new();

        for spec in &self.blocks {
            let offset = image.len() as u64;
            let allocation = block_allocation(spec.data.len(), TRAILER_SIZE);
            let mut region = vec![0_u8; allocation];
            region[..spec.data.len()].copy_from_slice(&spec.data);

            let mut crc = compute_crc(0, &spec.data);
            if spec.corrupt_crc {
                crc ^= 0x1;
            }

            let mut trailer = &mut region[allocation - TRAILER_SIZE..];
            trailer
                .write_u16::<LittleEndian>(spec.data.len() as u16)
                .unwrap();
            trailer
                .write_u16::<LittleEndian>(BlockId::from(spec.bid).signature(offset))
                .unwrap();
            trailer.write_u32::<LittleEndian>(crc).unwrap();
            trailer.write_u64::<LittleEndian>(spec.bid).unwrap();

            image.extend_from_slice(&region);
            bbt_entries.push((spec.bid, offset, spec.data.len() as u16));
        }

        // Pages are 512-aligned.
        let padding = image.len().next_multiple_of(PAGE_SIZE) - image.len();
        image.extend(std::iter::repeat_n(0, padding));

        let mut page_bid = 0x8000_u64;

        bbt_entries.sort_by_key(|(bid, _, _)| *bid);
        let bbt_leaves: Vec<Vec<u8>> = bbt_entries
            .chunks(BBT_PER_PAGE)
            .map(|chunk| {
                let mut entries = Vec::new();
                for (bid, offset, size) in chunk {
                    let mut entry = Vec::new();
                    entry.write_u64::<LittleEndian>(*bid).unwrap();
                    entry.write_u64::<LittleEndian>(*offset).unwrap();
                    entry.write_u16::<LittleEndian>(*size).unwrap();
                    entry.write_u16::<LittleEndian>(1).unwrap();
                    entry.write_u32::<LittleEndian>(0).unwrap();
                    entries.extend_from_slice(&entry);
                }
                entries
            })
            .collect();
        let bbt_keys: Vec<u64> = bbt_entries
            .chunks(BBT_PER_PAGE)
            .map(|chunk| chunk[0].0)
            .collect();
        let bbt_root = write_tree(
            &mut image,
            &mut page_bid,
            0x80,
            24,
            &bbt_leaves,
            &bbt_keys,
        );

        let mut nodes = self.nodes.clone();
        nodes.sort_by_key(|(nid, _, _)| *nid);
        let nbt_leaves: Vec<Vec<u8>> = nodes
            .chunks(NBT_PER_PAGE)
            .map(|chunk| {
                let mut entries = Vec::new();
                for (nid, data, sub) in chunk {
                    let mut entry = Vec::new();
                    entry.write_u64::<LittleEndian>(u64::from(*nid)).unwrap();
                    entry.write_u64::<LittleEndian>(*data).unwrap();
                    entry.write_u64::<LittleEndian>(*sub).unwrap();
                    entry.write_u32::<LittleEndian>(0).unwrap();
                    entry.write_u32::<LittleEndian>(0).unwrap();
                    entries.extend_from_slice(&entry);
                }
                entries
            })
            .collect();
        let nbt_keys: Vec<u64> = nodes
            .chunks(NBT_PER_PAGE)
            .map(|chunk| u64::from(chunk[0].0))
            .collect();
        let nbt_root = write_tree(
            &mut image,
            &mut page_bid,
            0x81,
            32,
            &nbt_leaves,
            &nbt_keys,
        );

        let file_size = image.len() as u64;
        write_header(&mut image, self.crypt, file_size, nbt_root, bbt_root);
        image
    }
}

/// Write leaf pages (and one interior root when there are several) and
/// return the root's BREF.
fn write_tree(
    image: &mut Vec<u8>,
    page_bid: &mut u64,
    page_type: u8,
    leaf_entry_size: u8,
    leaves: &[Vec<u8>],
    first_keys: &[u64],
) -> (u64, u64) {
    let mut leaf_refs = Vec::new();
    for leaf in leaves {
        let count = leaf.len() / usize::from(leaf_entry_size);
        leaf_refs.push(write_page(
            image,
            page_bid,
            page_type,
            0,
            leaf,
            count,
            leaf_entry_size,
        ));
    }

    if leaf_refs.len() == 1 {
        return leaf_refs[0];
    }

    let mut entries = Vec::new();
    for (key, (bid, offset)) in first_keys.iter().zip(&leaf_refs) {
        entries.write_u64::<LittleEndian>(*key).unwrap();
        entries.write_u64::<LittleEndian>(*bid).unwrap();
        entries.write_u64::<LittleEndian>(*offset).unwrap();
    }
    write_page(
        image,
        page_bid,
        page_type,
        1,
        &entries,
        leaf_refs.len(),
        24,
    )
}

fn write_page(
    image: &mut Vec<u8>,
    page_bid: &mut u64,
    page_type: u8,
    level: u8,
    entries: &[u8],
    entry_count: usize,
    entry_size: u8,
) -> (u64, u64) {
    let bid = *page_bid;
    *page_bid += 4;
    let offset = image.len() as u64;

    let mut page = vec![0_u8; PAGE_SIZE];
    page[..entries.len()].copy_from_slice(entries);
    page[488] = entry_count as u8;
    page[489] = (488 / usize::from(entry_size)) as u8;
    page[490] = entry_size;
    page[491] = level;

    let crc = compute_crc(0, &page[..496]);
    let mut trailer = &mut page[496..];
    trailer.write_u8(page_type).unwrap();
    trailer.write_u8(page_type).unwrap();
    trailer
        .write_u16::<LittleEndian>(BlockId::from(bid).signature(offset))
        .unwrap();
    trailer.write_u32::<LittleEndian>(crc).unwrap();
    trailer.write_u64::<LittleEndian>(bid).unwrap();

    image.extend_from_slice(&page);
    (bid, offset)
}

fn write_header(
    image: &mut [u8],
    crypt: CryptMethod,
    file_size: u64,
    nbt_root: (u64, u64),
    bbt_root: (u64, u64),
) {
    let mut region = Vec::with_capacity(516);
    region.write_u16::<LittleEndian>(0x4D53).unwrap(); // wMagicClient
    region.write_u16::<LittleEndian>(23).unwrap(); // wVer
    region.write_u16::<LittleEndian>(19).unwrap(); // wVerClient
    region.write_u8(0x01).unwrap(); // bPlatformCreate
    region.write_u8(0x01).unwrap(); // bPlatformAccess
    region.write_u32::<LittleEndian>(0).unwrap(); // dwReserved1
    region.write_u32::<LittleEndian>(0).unwrap(); // dwReserved2
    region.write_u64::<LittleEndian>(0).unwrap(); // bidUnused
    region.write_u64::<LittleEndian>(0).unwrap(); // bidNextP
    region.write_u32::<LittleEndian>(0).unwrap(); // dwUnique
    region.extend_from_slice(&[0_u8; 128]); // rgnid
    region.write_u64::<LittleEndian>(0).unwrap(); // qwUnused

    // ROOT
    region.write_u32::<LittleEndian>(0).unwrap(); // dwReserved
    region.write_u64::<LittleEndian>(file_size).unwrap(); // ibFileEof
    region.write_u64::<LittleEndian>(0).unwrap(); // ibAMapLast
    region.write_u64::<LittleEndian>(0).unwrap(); // cbAMapFree
    region.write_u64::<LittleEndian>(0).unwrap(); // cbPMapFree
    region.write_u64::<LittleEndian>(nbt_root.0).unwrap();
    region.write_u64::<LittleEndian>(nbt_root.1).unwrap();
    region.write_u64::<LittleEndian>(bbt_root.0).unwrap();
    region.write_u64::<LittleEndian>(bbt_root.1).unwrap();
    region.write_u8(0x02).unwrap(); // fAMapValid
    region.write_u8(0).unwrap(); // bReserved
    region.write_u16::<LittleEndian>(0).unwrap(); // wReserved

    region.write_u32::<LittleEndian>(0).unwrap(); // dwAlign
    region.extend_from_slice(&[0xFF; 128]); // rgbFM
    region.extend_from_slice(&[0xFF; 128]); // rgbFP
    region.write_u8(0x80).unwrap(); // bSentinel
    region.write_u8(crypt as u8).unwrap(); // bCryptMethod
    region.write_u16::<LittleEndian>(0).unwrap(); // rgbReserved
    region.write_u64::<LittleEndian>(0).unwrap(); // bidNextB
    assert_eq!(region.len(), 516);

    let mut header = Vec::with_capacity(560);
    header
        .write_u32::<LittleEndian>(u32::from_be_bytes(*b"NDB!"))
        .unwrap();
    header
        .write_u32::<LittleEndian>(compute_crc(0, &region[..471]))
        .unwrap();
    header.extend_from_slice(&region);
    header
        .write_u32::<LittleEndian>(compute_crc(0, &region))
        .unwrap();
    header.extend_from_slice(&[0_u8; 36]);

    image[..header.len()].copy_from_slice(&header);
}

/// A single-block Heap-on-Node under construction.
pub(crate) struct HeapBuilder {
    client: u8,
    allocations: Vec<Vec<u8>>,
}

impl HeapBuilder {
    pub(crate) fn new(client: u8) -> Self {
        Self {
            client,
            allocations: Vec::new(),
        }
    }

    /// Append an allocation and return its HID.
    pub(crate) fn alloc(&mut self, data: Vec<u8>) -> u32 {
        self.allocations.push(data);
        (self.allocations.len() as u32) << 5
    }

    /// Produce the heap block's bytes with `user_root` in the HNHDR.
    pub(crate) fn build(self, user_root: u32) -> Vec<u8> {
        let mut offsets = vec![12_u16];
        for allocation in &self.allocations {
            offsets.push(offsets.last().unwrap() + allocation.len() as u16);
        }
        let page_map_offset = *offsets.last().unwrap();

        let mut block = Vec::new();
        block.write_u16::<LittleEndian>(page_map_offset).unwrap(); // ibHnpm
        block.write_u8(0xEC).unwrap(); // bSig
        block.write_u8(self.client).unwrap(); // bClientSig
        block.write_u32::<LittleEndian>(user_root).unwrap(); // hidUserRoot
        block.write_u32::<LittleEndian>(0).unwrap(); // rgbFillLevel

        for allocation in &self.allocations {
            block.extend_from_slice(allocation);
        }

        // HNPAGEMAP
        block
            .write_u16::<LittleEndian>(self.allocations.len() as u16)
            .unwrap();
        block.write_u16::<LittleEndian>(0).unwrap();
        for offset in offsets {
            block.write_u16::<LittleEndian>(offset).unwrap();
        }

        block
    }
}

/// Append a leaf-only BTH to `heap` and return the header allocation's HID.
pub(crate) fn bth(
    heap: &mut HeapBuilder,
    key_size: u8,
    entry_size: u8,
    records: &[(u64, Vec<u8>)],
) -> u32 {
    let mut sorted = records.to_vec();
    sorted.sort_by_key(|(key, _)| *key);

    let root = if sorted.is_empty() {
        0
    } else {
        let mut leaf = Vec::new();
        for (key, value) in &sorted {
            assert_eq!(value.len(), usize::from(entry_size));
            leaf.extend_from_slice(&key.to_le_bytes()[..usize::from(key_size)]);
            leaf.extend_from_slice(value);
        }
        heap.alloc(leaf)
    };

    let mut header = Vec::new();
    header.write_u8(0xB5).unwrap();
    header.write_u8(key_size).unwrap();
    header.write_u8(entry_size).unwrap();
    header.write_u8(0).unwrap();
    header.write_u32::<LittleEndian>(root).unwrap();
    heap.alloc(header)
}

/// How one PC property is stored.
pub(crate) enum PcValue {
    /// Small fixed value, inline in the record.
    Inline(u32),
    /// Bytes in a heap allocation.
    Heap(Vec<u8>),
    /// Bytes behind a sub-node NID.
    Node(u32),
}

/// Build a Property Context heap block over `(id, type, value)` triples.
pub(crate) fn pc_block(props: Vec<(u16, u16, PcValue)>) -> Vec<u8> {
    let mut heap = HeapBuilder::new(0xBC);

    let mut records = Vec::new();
    for (id, kind, value) in props {
        let reference = match value {
            PcValue::Inline(raw) => raw,
            PcValue::Heap(bytes) => heap.alloc(bytes),
            PcValue::Node(nid) => nid,
        };
        let mut record = Vec::new();
        record.write_u16::<LittleEndian>(kind).unwrap();
        record.write_u32::<LittleEndian>(reference).unwrap();
        records.push((u64::from(id), record));
    }

    let root = bth(&mut heap, 2, 6, &records);
    heap.build(root)
}

/// A UTF-16LE property value with no terminator, as PCs store strings.
pub(crate) fn utf16(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// One column of a synthetic table.
pub(crate) struct TcColumn {
    pub(crate) tag: u32,
    pub(crate) offset: u16,
    pub(crate) size: u8,
    pub(crate) bit: u8,
}

/// HID of the `index`-th (0-based) allocation made in a heap block. Lets
/// callers of [`tc_block`] reference the `values` allocations from row
/// bytes.
pub(crate) fn hid_of_alloc(index: usize) -> u32 {
    ((index + 1) as u32) << 5
}

/// Build a Table Context heap block.
///
/// `values` are allocated first, so rows can carry `hid_of_alloc(i)`
/// references to them. `ends` are the TCINFO `rgib` group boundaries; each
/// row's bytes must be exactly `ends[3]` long with the cell-existence
/// bitmap filled in.
pub(crate) fn tc_block(
    columns: &[TcColumn],
    ends: [u16; 4],
    rows: &[(u32, Vec<u8>)],
    values: Vec<Vec<u8>>,
) -> Vec<u8> {
    let mut heap = HeapBuilder::new(0x7C);
    for value in values {
        heap.alloc(value);
    }

    let rows_reference = if rows.is_empty() {
        0
    } else {
        let mut matrix = Vec::new();
        for (_, bytes) in rows {
            assert_eq!(bytes.len(), usize::from(ends[3]));
            matrix.extend_from_slice(bytes);
        }
        heap.alloc(matrix)
    };

    let index_records: Vec<(u64, Vec<u8>)> = rows
        .iter()
        .enumerate()
        .map(|(position, (row_id, _))| {
            (u64::from(*row_id), (position as u32).to_le_bytes().to_vec())
        })
        .collect();
    let row_index = bth(&mut heap, 4, 4, &index_records);

    let mut info = Vec::new();
    info.write_u8(0x7C).unwrap();
    info.write_u8(columns.len() as u8).unwrap();
    for end in ends {
        info.write_u16::<LittleEndian>(end).unwrap();
    }
    info.write_u32::<LittleEndian>(row_index).unwrap();
    info.write_u32::<LittleEndian>(rows_reference).unwrap();
    info.write_u32::<LittleEndian>(0).unwrap(); // hidIndex
    for column in columns {
        info.write_u32::<LittleEndian>(column.tag).unwrap();
        info.write_u16::<LittleEndian>(column.offset).unwrap();
        info.write_u8(column.size).unwrap();
        info.write_u8(column.bit).unwrap();
    }

    let user_root = heap.alloc(info);
    heap.build(user_root)
}
