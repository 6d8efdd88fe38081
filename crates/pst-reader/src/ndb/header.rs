//! [HEADER](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/c9876f5a-664b-46a3-9887-ba63f113abf5)

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Seek, SeekFrom};

use super::{block_id::BlockId, page::PageRef};
use crate::{crc::compute_crc, io::PagedReader, Error, Result};

/// `dwMagic`
const HEADER_MAGIC: u32 = u32::from_be_bytes(*b"NDB!");

/// `wMagicClient`
const HEADER_MAGIC_CLIENT: u16 = u16::from_be_bytes(*b"MS");

/// `wVerClient`
const NDB_CLIENT_VERSION: u16 = 19;

/// `bSentinel`
const NDB_SENTINEL: u8 = 0x80;

/// On-disk size of the Unicode header block (magic through rgbReserved3).
const UNICODE_HEADER_SIZE: usize = 560;
/// On-disk size of the ANSI header block.
const ANSI_HEADER_SIZE: usize = 512;

/// `wVer`: the file variant. Every offset-bearing structure in the file is
/// sized by it.
#[repr(u16)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FileVariant {
    /// 32-bit offsets, the smaller structure sizes.
    Ansi = 15,
    /// 64-bit offsets.
    Unicode = 23,
}

impl FileVariant {
    pub(crate) fn is_unicode(self) -> bool {
        self == FileVariant::Unicode
    }

    /// Size of a BLOCKTRAILER for this variant.
    pub(crate) fn block_trailer_size(self) -> usize {
        if self.is_unicode() {
            16
        } else {
            12
        }
    }

    /// Largest data payload a single block can carry.
    pub(crate) fn max_block_payload(self) -> usize {
        8192 - self.block_trailer_size()
    }
}

/// `bCryptMethod`
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub enum CryptMethod {
    /// `NDB_CRYPT_NONE`: Data blocks are not encoded
    #[default]
    None = 0x00,
    /// `NDB_CRYPT_PERMUTE`: Encoded with the [Permutation algorithm](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/5faf4800-645d-49d1-9457-2ac40eb467bd)
    Permute = 0x01,
    /// `NDB_CRYPT_CYCLIC`: Encoded with the [Cyclic algorithm](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/9979fc01-0a3e-496f-900f-a6a867951f23)
    Cyclic = 0x02,
}

impl TryFrom<u8> for CryptMethod {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(CryptMethod::None),
            0x01 => Ok(CryptMethod::Permute),
            0x02 => Ok(CryptMethod::Cyclic),
            _ => Err(Error::Corrupt("invalid HEADER bCryptMethod")),
        }
    }
}

/// [ROOT](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/32ce8c94-4757-46c8-a169-3fd21abee584)
#[derive(Clone, Debug)]
pub(crate) struct Root {
    /// `ibFileEof`: total size of the file in bytes.
    pub(crate) file_size: u64,
    /// `BREFNBT`: root page of the Node BTree.
    pub(crate) node_btree: PageRef,
    /// `BREFBBT`: root page of the Block BTree.
    pub(crate) block_btree: PageRef,
    /// `fAMapValid`
    pub(crate) amap_valid: bool,
}

impl Root {
    fn read(cursor: &mut Cursor<&[u8]>, variant: FileVariant) -> Result<Self> {
        let read_index = |cursor: &mut Cursor<&[u8]>| -> Result<u64> {
            Ok(if variant.is_unicode() {
                cursor.read_u64::<LittleEndian>()?
            } else {
                u64::from(cursor.read_u32::<LittleEndian>()?)
            })
        };

        // dwReserved
        cursor.read_u32::<LittleEndian>()?;

        // ibFileEof
        let file_size = read_index(cursor)?;

        // ibAMapLast, cbAMapFree, cbPMapFree
        for _ in 0..3 {
            read_index(cursor)?;
        }

        // BREFNBT
        let node_btree = PageRef {
            block: BlockId::from(read_index(cursor)?),
            offset: read_index(cursor)?,
        };

        // BREFBBT
        let block_btree = PageRef {
            block: BlockId::from(read_index(cursor)?),
            offset: read_index(cursor)?,
        };

        // fAMapValid
        let amap_valid = cursor.read_u8()? != 0;

        // bReserved, wReserved
        cursor.read_u8()?;
        cursor.read_u16::<LittleEndian>()?;

        Ok(Self {
            file_size,
            node_btree,
            block_btree,
            amap_valid,
        })
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Header {
    pub(crate) variant: FileVariant,
    pub(crate) crypt_method: CryptMethod,
    pub(crate) root: Root,
}

impl Header {
    /// Read and validate the header at the start of the backing file.
    ///
    /// Magic, version, and the partial/full CRCs fail hard; oddities a
    /// read-only consumer can tolerate (unexpected client version, sentinel)
    /// only draw warnings.
    pub(crate) fn read(reader: &PagedReader) -> Result<Self> {
        let prefix = reader.read_at(0, ANSI_HEADER_SIZE)?;
        let mut cursor = Cursor::new(prefix.as_slice());

        // dwMagic
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != HEADER_MAGIC {
            return Err(Error::BadMagic);
        }

        // dwCRCPartial
        let crc_partial = cursor.read_u32::<LittleEndian>()?;

        // wMagicClient
        let magic_client = cursor.read_u16::<LittleEndian>()?;
        if magic_client != HEADER_MAGIC_CLIENT {
            return Err(Error::BadMagic);
        }

        // wVer
        let version = cursor.read_u16::<LittleEndian>()?;
        let variant = match version {
            14..=15 => FileVariant::Ansi,
            23 => FileVariant::Unicode,
            _ => return Err(Error::UnsupportedVersion(version)),
        };

        // Everything after dwCRCPartial is CRC-protected; the Unicode layout
        // extends past the ANSI prefix read above.
        let region: Vec<u8> = if variant.is_unicode() {
            reader.read_at(0, UNICODE_HEADER_SIZE)?[8..524].to_vec()
        } else {
            prefix[8..504 + 8].to_vec()
        };

        if crc_partial != compute_crc(0, &region[..471]) {
            return Err(Error::Corrupt("HEADER dwCRCPartial"));
        }

        if variant.is_unicode() {
            let full = reader.read_at(524, 4)?;
            let crc_full = u32::from_le_bytes(full.try_into().unwrap());
            if crc_full != compute_crc(0, &region) {
                return Err(Error::Corrupt("HEADER dwCRCFull"));
            }
        }

        let mut cursor = Cursor::new(region.as_slice());
        cursor.seek(SeekFrom::Start(4))?;

        // wVerClient
        let client_version = cursor.read_u16::<LittleEndian>()?;
        if client_version != NDB_CLIENT_VERSION {
            log::warn!("[pst] unexpected HEADER wVerClient: 0x{client_version:04X}");
        }

        // bPlatformCreate, bPlatformAccess, dwReserved1, dwReserved2
        cursor.seek(SeekFrom::Start(16))?;

        if variant.is_unicode() {
            // bidUnused, bidNextP
            cursor.seek(SeekFrom::Current(16))?;
        } else {
            // bidNextB, bidNextP
            cursor.seek(SeekFrom::Current(8))?;
        }

        // dwUnique
        cursor.read_u32::<LittleEndian>()?;

        // rgnid
        cursor.seek(SeekFrom::Current(128))?;

        if variant.is_unicode() {
            // qwUnused
            cursor.seek(SeekFrom::Current(8))?;
        }

        // root
        let root = Root::read(&mut cursor, variant)?;

        if variant.is_unicode() {
            // dwAlign
            cursor.read_u32::<LittleEndian>()?;
        }

        // rgbFM, rgbFP
        cursor.seek(SeekFrom::Current(256))?;

        // bSentinel
        let sentinel = cursor.read_u8()?;
        if sentinel != NDB_SENTINEL {
            log::warn!("[pst] unexpected HEADER bSentinel: 0x{sentinel:02X}");
        }

        // bCryptMethod
        let crypt_method = CryptMethod::try_from(cursor.read_u8()?)?;

        if root.file_size > reader.len() {
            return Err(Error::Corrupt("ROOT ibFileEof past end of file"));
        }

        if !root.amap_valid {
            log::warn!("[pst] allocation maps are flagged invalid; reading anyway");
        }

        log::debug!(
            "[pst] opened {variant:?} store, crypt {crypt_method:?}, NBT @0x{:X}, BBT @0x{:X}",
            root.node_btree.offset,
            root.block_btree.offset,
        );

        Ok(Self {
            variant,
            crypt_method,
            root,
        })
    }
}
