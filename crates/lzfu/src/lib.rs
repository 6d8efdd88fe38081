//! Decompressor for [Rich Text Format (RTF) Compression](https://learn.microsoft.com/en-us/openspecs/exchange_server_protocols/ms-oxrtfcp/65dfe2df-1b69-43fc-8ebd-21819a7463fb),
//! the encoding used by the `PidTagRtfCompressed` property of Outlook message
//! stores.
//!
//! The input is a `COMPSIZE`/`RAWSIZE`/`COMPTYPE`/`CRC` header followed by
//! either the raw RTF text (`MELA`) or an LZ stream over a 4 KiB circular
//! dictionary pre-seeded with RTF boilerplate (`LZFu`).

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

mod crc;
mod dictionary;

use dictionary::{DictionaryReference, TokenDictionary};

#[derive(Error, Debug)]
pub enum Error {
    #[error("input shorter than the 16-byte header: {0}")]
    HeaderTooShort(usize),
    #[error("COMPSIZE mismatch: {0}")]
    CompressedSizeMismatch(u32),
    #[error("COMPRESSED CRC mismatch: 0x{0:08X}")]
    CrcMismatch(u32),
    #[error("invalid COMPTYPE: 0x{0:08X}")]
    UnknownCompression(u32),
    #[error("RAWSIZE is past the end of the input: {0}")]
    RawSizeTooLarge(u32),
}

pub type Result<T> = std::result::Result<T, Error>;

/// `COMPTYPE` tag of an LZ-compressed stream, the bytes `LZFu`.
const COMPRESSED: u32 = 0x75465A4C;
/// `COMPTYPE` tag of a stored stream, the bytes `MELA`.
const UNCOMPRESSED: u32 = 0x414C454D;

/// Decompress a `PidTagRtfCompressed` value into the raw RTF bytes.
///
/// `verify_crc` checks the header CRC over everything past the header before
/// decoding; stored (`MELA`) streams carry no meaningful CRC and skip the
/// check either way.
pub fn decompress(data: &[u8], verify_crc: bool) -> Result<Vec<u8>> {
    if data.len() < 16 {
        return Err(Error::HeaderTooShort(data.len()));
    }

    let mut header = Cursor::new(&data[..16]);
    let compressed_size = header.read_u32::<LittleEndian>().unwrap();
    let raw_size = header.read_u32::<LittleEndian>().unwrap() as usize;
    let compression_type = header.read_u32::<LittleEndian>().unwrap();
    let crc = header.read_u32::<LittleEndian>().unwrap();

    // COMPSIZE counts everything after itself.
    if compressed_size as usize + 4 != data.len() {
        return Err(Error::CompressedSizeMismatch(compressed_size));
    }

    match compression_type {
        COMPRESSED => {
            if verify_crc && crc != crc::compute_crc(0, &data[16..]) {
                return Err(Error::CrcMismatch(crc));
            }

            Ok(decode_tokens(&data[16..], raw_size))
        }
        UNCOMPRESSED => {
            let end = raw_size
                .checked_add(16)
                .filter(|end| *end <= data.len())
                .ok_or(Error::RawSizeTooLarge(raw_size as u32))?;
            Ok(data[16..end].to_vec())
        }
        invalid => Err(Error::UnknownCompression(invalid)),
    }
}

/// Decompress and convert to a string.
///
/// The compressed stream is defined over single-byte characters; they map
/// onto the corresponding U+0000..U+00FF code points.
pub fn decompress_to_string(data: &[u8], verify_crc: bool) -> Result<String> {
    let bytes = decompress(data, verify_crc)?;
    Ok(bytes.into_iter().map(char::from).collect())
}

/// Run the token stream: a control byte announces up to eight tokens, LSB
/// first; a clear flag is a literal byte and a set flag a dictionary
/// reference. Decoding ends at the write-cursor sentinel, at `RAWSIZE`
/// output bytes, or when the input runs dry.
fn decode_tokens(input: &[u8], raw_size: usize) -> Vec<u8> {
    let mut dictionary = TokenDictionary::new();
    let mut output = Vec::with_capacity(raw_size);
    let mut cursor = Cursor::new(input);

    'decode: while let Ok(control) = cursor.read_u8() {
        for run in 0..8 {
            if output.len() >= raw_size {
                break 'decode;
            }

            if control & (1 << run) == 0 {
                let Ok(byte) = cursor.read_u8() else {
                    break 'decode;
                };
                output.push(byte);
                dictionary.push(byte);
            } else {
                let Ok(reference) = DictionaryReference::read(&mut cursor) else {
                    break 'decode;
                };
                let Some(token) = dictionary.copy_reference(reference) else {
                    break 'decode;
                };
                output.extend_from_slice(&token);
            }
        }
    }

    output.truncate(raw_size);
    output
}
