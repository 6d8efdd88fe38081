//! [Blocks](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/a9c1981d-d1ea-457c-b39e-dc7fb0eb95d4)
//!
//! Leaf blocks hold raw node data; XBLOCK/XXBLOCK internal blocks list child
//! BIDs whose leaf payloads concatenate into the node's logical stream.
//! Sub-node blocks (SLBLOCK/SIBLOCK) form the per-node tree of auxiliary
//! streams.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use super::{
    block_id::BlockId,
    header::{CryptMethod, FileVariant},
    page::BbtEntry,
};
use crate::{crc::compute_crc, io::PagedReader, Error, Result};

pub(crate) const MAX_BLOCK_SIZE: usize = 8192;

/// `mpbbR` from the [Cryptographic Code Summary](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/d947ce5e-77cc-46e8-a7c5-a1a7b72e8323)
/// of the PST specification.
#[rustfmt::skip]
const KEY_DATA_R: [u8; 256] = [
    0x41, 0x36, 0x13, 0x62, 0xA8, 0x21, 0x6E, 0xBB, 0xF4, 0x16, 0xCC, 0x04, 0x7F, 0x64, 0xE8, 0x5D,
    0x1E, 0xF2, 0xCB, 0x2A, 0x74, 0xC5, 0x5E, 0x35, 0xD2, 0x95, 0x47, 0x9E, 0x96, 0x2D, 0x9A, 0x88,
    0x4C, 0x7D, 0x84, 0x3F, 0xDB, 0xAC, 0x31, 0xB6, 0x48, 0x5F, 0xF6, 0xC4, 0xD8, 0x39, 0x8B, 0xE7,
    0x23, 0x3B, 0x38, 0x8E, 0xC8, 0xC1, 0xDF, 0x25, 0xB1, 0x20, 0xA5, 0x46, 0x60, 0x4E, 0x9C, 0xFB,
    0xAA, 0xD3, 0x56, 0x51, 0x45, 0x7C, 0x55, 0x00, 0x07, 0xC9, 0x2B, 0x9D, 0x85, 0x9B, 0x09, 0xA0,
    0x8F, 0xAD, 0xB3, 0x0F, 0x63, 0xAB, 0x89, 0x4B, 0xD7, 0xA7, 0x15, 0x5A, 0x71, 0x66, 0x42, 0xBF,
    0x26, 0x4A, 0x6B, 0x98, 0xFA, 0xEA, 0x77, 0x53, 0xB2, 0x70, 0x05, 0x2C, 0xFD, 0x59, 0x3A, 0x86,
    0x7E, 0xCE, 0x06, 0xEB, 0x82, 0x78, 0x57, 0xC7, 0x8D, 0x43, 0xAF, 0xB4, 0x1C, 0xD4, 0x5B, 0xCD,
    0xE2, 0xE9, 0x27, 0x4F, 0xC3, 0x08, 0x72, 0x80, 0xCF, 0xB0, 0xEF, 0xF5, 0x28, 0x6D, 0xBE, 0x30,
    0x4D, 0x34, 0x92, 0xD5, 0x0E, 0x3C, 0x22, 0x32, 0xE5, 0xE4, 0xF9, 0x9F, 0xC2, 0xD1, 0x0A, 0x81,
    0x12, 0xE1, 0xEE, 0x91, 0x83, 0x76, 0xE3, 0x97, 0xE6, 0x61, 0x8A, 0x17, 0x79, 0xA4, 0xB7, 0xDC,
    0x90, 0x7A, 0x5C, 0x8C, 0x02, 0xA6, 0xCA, 0x69, 0xDE, 0x50, 0x1A, 0x11, 0x93, 0xB9, 0x52, 0x87,
    0x58, 0xFC, 0xED, 0x1D, 0x37, 0x49, 0x1B, 0x6A, 0xE0, 0x29, 0x33, 0x99, 0xBD, 0x6C, 0xD9, 0x94,
    0xF3, 0x40, 0x54, 0x6F, 0xF0, 0xC6, 0x73, 0xB8, 0xD6, 0x3E, 0x65, 0x18, 0x44, 0x1F, 0xDD, 0x67,
    0x10, 0xF1, 0x0C, 0x19, 0xEC, 0xAE, 0x03, 0xA1, 0x14, 0x7B, 0xA9, 0x0B, 0xFF, 0xF8, 0xA3, 0xC0,
    0xA2, 0x01, 0xF7, 0x2E, 0xBC, 0x24, 0x68, 0x75, 0x0D, 0xFE, 0xBA, 0x2F, 0xB5, 0xD0, 0xDA, 0x3D,
];

/// `mpbbS`
#[rustfmt::skip]
const KEY_DATA_S: [u8; 256] = [
    0x14, 0x53, 0x0F, 0x56, 0xB3, 0xC8, 0x7A, 0x9C, 0xEB, 0x65, 0x48, 0x17, 0x16, 0x15, 0x9F, 0x02,
    0xCC, 0x54, 0x7C, 0x83, 0x00, 0x0D, 0x0C, 0x0B, 0xA2, 0x62, 0xA8, 0x76, 0xDB, 0xD9, 0xED, 0xC7,
    0xC5, 0xA4, 0xDC, 0xAC, 0x85, 0x74, 0xD6, 0xD0, 0xA7, 0x9B, 0xAE, 0x9A, 0x96, 0x71, 0x66, 0xC3,
    0x63, 0x99, 0xB8, 0xDD, 0x73, 0x92, 0x8E, 0x84, 0x7D, 0xA5, 0x5E, 0xD1, 0x5D, 0x93, 0xB1, 0x57,
    0x51, 0x50, 0x80, 0x89, 0x52, 0x94, 0x4F, 0x4E, 0x0A, 0x6B, 0xBC, 0x8D, 0x7F, 0x6E, 0x47, 0x46,
    0x41, 0x40, 0x44, 0x01, 0x11, 0xCB, 0x03, 0x3F, 0xF7, 0xF4, 0xE1, 0xA9, 0x8F, 0x3C, 0x3A, 0xF9,
    0xFB, 0xF0, 0x19, 0x30, 0x82, 0x09, 0x2E, 0xC9, 0x9D, 0xA0, 0x86, 0x49, 0xEE, 0x6F, 0x4D, 0x6D,
    0xC4, 0x2D, 0x81, 0x34, 0x25, 0x87, 0x1B, 0x88, 0xAA, 0xFC, 0x06, 0xA1, 0x12, 0x38, 0xFD, 0x4C,
    0x42, 0x72, 0x64, 0x13, 0x37, 0x24, 0x6A, 0x75, 0x77, 0x43, 0xFF, 0xE6, 0xB4, 0x4B, 0x36, 0x5C,
    0xE4, 0xD8, 0x35, 0x3D, 0x45, 0xB9, 0x2C, 0xEC, 0xB7, 0x31, 0x2B, 0x29, 0x07, 0x68, 0xA3, 0x0E,
    0x69, 0x7B, 0x18, 0x9E, 0x21, 0x39, 0xBE, 0x28, 0x1A, 0x5B, 0x78, 0xF5, 0x23, 0xCA, 0x2A, 0xB0,
    0xAF, 0x3E, 0xFE, 0x04, 0x8C, 0xE7, 0xE5, 0x98, 0x32, 0x95, 0xD3, 0xF6, 0x4A, 0xE8, 0xA6, 0xEA,
    0xE9, 0xF3, 0xD5, 0x2F, 0x70, 0x20, 0xF2, 0x1F, 0x05, 0x67, 0xAD, 0x55, 0x10, 0xCE, 0xCD, 0xE3,
    0x27, 0x3B, 0xDA, 0xBA, 0xD7, 0xC2, 0x26, 0xD4, 0x91, 0x1D, 0xD2, 0x1C, 0x22, 0x33, 0xF8, 0xFA,
    0xF1, 0x5A, 0xEF, 0xCF, 0x90, 0xB6, 0x8B, 0xB5, 0xBD, 0xC0, 0xBF, 0x08, 0x97, 0x1E, 0x6C, 0xE2,
    0x61, 0xE0, 0xC6, 0xC1, 0x59, 0xAB, 0xBB, 0x58, 0xDE, 0x5F, 0xDF, 0x60, 0x79, 0x7E, 0xB2, 0x8A,
];

const fn invert(table: &[u8; 256]) -> [u8; 256] {
    let mut inverse = [0_u8; 256];
    let mut index = 0;
    while index < 256 {
        inverse[table[index] as usize] = index as u8;
        index += 1;
    }
    inverse
}

/// `mpbbI`, defined by the specification as the inverse permutation of
/// `mpbbR`.
const KEY_DATA_I: [u8; 256] = invert(&KEY_DATA_R);

/// In-place codec for a data block's stored bytes.
///
/// The [Permutative](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/5faf4800-645d-49d1-9457-2ac40eb467bd)
/// encoding substitutes every byte through one table; the
/// [Cyclic](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/9979fc01-0a3e-496f-900f-a6a867951f23)
/// encoding chains all three tables under a running key seeded from the
/// block id. Only external (leaf) data blocks are stored transformed.
pub(crate) struct BlockCodec {
    method: CryptMethod,
    key: u32,
}

impl BlockCodec {
    pub(crate) fn new(method: CryptMethod, block: BlockId) -> Self {
        Self {
            method,
            key: block.cyclic_key(),
        }
    }

    /// Undo the stored transform.
    pub(crate) fn decode(&self, data: &mut [u8]) {
        match self.method {
            CryptMethod::None => {}
            CryptMethod::Permute => {
                for byte in data.iter_mut() {
                    *byte = KEY_DATA_I[usize::from(*byte)];
                }
            }
            CryptMethod::Cyclic => self.cyclic(data),
        }
    }

    /// Apply the stored transform; only synthetic test images are ever
    /// written.
    #[cfg(test)]
    pub(crate) fn encode(&self, data: &mut [u8]) {
        match self.method {
            CryptMethod::None => {}
            CryptMethod::Permute => {
                for byte in data.iter_mut() {
                    *byte = KEY_DATA_R[usize::from(*byte)];
                }
            }
            CryptMethod::Cyclic => self.cyclic(data),
        }
    }

    /// The Cyclic transform undoes itself: S is its own inverse and I
    /// inverts R, so one walk serves both directions.
    fn cyclic(&self, data: &mut [u8]) {
        let mut key = (self.key ^ (self.key >> 16)) as u16;

        for byte in data.iter_mut() {
            let low = key as u8;
            let high = (key >> 8) as u8;

            let mut value = byte.wrapping_add(low);
            value = KEY_DATA_R[usize::from(value)].wrapping_add(high);
            value = KEY_DATA_S[usize::from(value)].wrapping_sub(high);
            *byte = KEY_DATA_I[usize::from(value)].wrapping_sub(low);

            key = key.wrapping_add(1);
        }
    }
}

/// On-disk allocation of a block: data plus trailer, rounded up to 64 bytes.
pub(crate) fn block_allocation(data_size: usize, trailer_size: usize) -> usize {
    let size = data_size + trailer_size;
    if size >= MAX_BLOCK_SIZE {
        MAX_BLOCK_SIZE
    } else {
        size.div_ceil(64) * 64
    }
}

/// Read one block, validate its trailer, and (for leaf blocks) undo the
/// store's obfuscation.
pub(crate) fn read_block(
    reader: &PagedReader,
    variant: FileVariant,
    crypt_method: CryptMethod,
    entry: &BbtEntry,
) -> Result<Vec<u8>> {
    let trailer_size = variant.block_trailer_size();
    let data_size = entry.size as usize;
    if data_size == 0 || data_size > variant.max_block_payload() {
        return Err(Error::Corrupt("BBTENTRY cb"));
    }

    let allocation = block_allocation(data_size, trailer_size);
    let buffer = reader.read_at(entry.offset, allocation)?;
    let mut data = buffer[..data_size].to_vec();

    // BLOCKTRAILER sits at the end of the 64-byte-aligned allocation.
    let mut trailer = Cursor::new(&buffer[allocation - trailer_size..]);
    let size = trailer.read_u16::<LittleEndian>()?;
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

    if usize::from(size) != data_size {
        return Err(Error::Corrupt("BLOCKTRAILER cb"));
    }
    if block_id != u64::from(entry.block) {
        return Err(Error::Corrupt("BLOCKTRAILER bid"));
    }
    if crc != compute_crc(0, &data) {
        return Err(Error::Corrupt("block crc"));
    }
    if signature != entry.block.signature(entry.offset) {
        return Err(Error::Corrupt("BLOCKTRAILER wSig"));
    }

    if entry.ref_count == 0 {
        log::warn!(
            "[pst] block 0x{block_id:X} is referenced but carries cRef 0",
        );
    }

    // Internal blocks and pages are never transformed.
    if !entry.block.is_internal() {
        BlockCodec::new(crypt_method, entry.block).decode(&mut data);
    }

    Ok(data)
}

/// [XBLOCK](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/5b7a6935-e83d-4917-9f62-6ce3707f09e0)
/// / XXBLOCK header: `btype` 0x01, `cLevel` 1 or 2.
pub(crate) struct DataTreeBlock {
    pub(crate) level: u8,
    pub(crate) children: Vec<BlockId>,
}

impl DataTreeBlock {
    pub(crate) fn parse(variant: FileVariant, data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let block_type = cursor.read_u8()?;
        if block_type != 0x01 {
            return Err(Error::Corrupt("XBLOCK btype"));
        }

        let level = cursor.read_u8()?;
        if !(1..=2).contains(&level) {
            return Err(Error::Corrupt("XBLOCK cLevel"));
        }

        let entry_count = cursor.read_u16::<LittleEndian>()?;

        // lcbTotal
        cursor.read_u32::<LittleEndian>()?;

        let mut children = Vec::with_capacity(usize::from(entry_count));
        for _ in 0..entry_count {
            let child = if variant.is_unicode() {
                cursor.read_u64::<LittleEndian>()?
            } else {
                u64::from(cursor.read_u32::<LittleEndian>()?)
            };
            children.push(BlockId::from(child));
        }

        Ok(Self { level, children })
    }
}

/// One entry of a sub-node tree: the child's data block and, optionally, a
/// sub-node tree of its own.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SubNodeEntry {
    pub(crate) node: u32,
    pub(crate) data: BlockId,
    pub(crate) sub: Option<BlockId>,
}

/// [SLBLOCK](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/85c4d943-0779-43c5-bd98-61dc9bb5dfd6)
/// / SIBLOCK: `btype` 0x02, `cLevel` 0 (leaf) or 1 (index).
pub(crate) enum SubNodeBlock {
    Leaf(Vec<SubNodeEntry>),
    Index(Vec<(u32, BlockId)>),
}

impl SubNodeBlock {
    pub(crate) fn parse(variant: FileVariant, data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let block_type = cursor.read_u8()?;
        if block_type != 0x02 {
            return Err(Error::Corrupt("SLBLOCK btype"));
        }

        let level = cursor.read_u8()?;
        let entry_count = cursor.read_u16::<LittleEndian>()?;

        if variant.is_unicode() {
            // dwPadding
            cursor.read_u32::<LittleEndian>()?;
        }

        let read_value = |cursor: &mut Cursor<&[u8]>| -> Result<u64> {
            Ok(if variant.is_unicode() {
                cursor.read_u64::<LittleEndian>()?
            } else {
                u64::from(cursor.read_u32::<LittleEndian>()?)
            })
        };

        let mut last_key = None;
        match level {
            0 => {
                let mut entries = Vec::with_capacity(usize::from(entry_count));
                for _ in 0..entry_count {
                    let node = read_value(&mut cursor)? as u32;
                    let data = BlockId::from(read_value(&mut cursor)?);
                    let sub = BlockId::from(read_value(&mut cursor)?);
                    if last_key.replace(node).is_some_and(|last| last >= node) {
                        return Err(Error::Corrupt("SLBLOCK key order"));
                    }
                    entries.push(SubNodeEntry {
                        node,
                        data,
                        sub: (!sub.is_nil()).then_some(sub),
                    });
                }
                Ok(SubNodeBlock::Leaf(entries))
            }
            1 => {
                let mut entries = Vec::with_capacity(usize::from(entry_count));
                for _ in 0..entry_count {
                    let node = read_value(&mut cursor)? as u32;
                    let block = BlockId::from(read_value(&mut cursor)?);
                    if last_key.replace(node).is_some_and(|last| last >= node) {
                        return Err(Error::Corrupt("SIBLOCK key order"));
                    }
                    entries.push((node, block));
                }
                Ok(SubNodeBlock::Index(entries))
            }
            _ => Err(Error::Corrupt("SLBLOCK cLevel")),
        }
    }
}
