//! Crate-wide error type.

use std::io;
use thiserror::Error;

/// Every failure the reader can surface, as one flat sum.
///
/// Structural variants name the MS-PST structure that failed validation. A
/// structural failure poisons nothing beyond the request that hit it; the
/// file handle stays usable for unrelated nodes.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("read of 0x{len:X} bytes at 0x{offset:X} is past the end of the file")]
    Truncated { offset: u64, len: usize },
    #[error("invalid HEADER dwMagic")]
    BadMagic,
    #[error("unsupported HEADER wVer: 0x{0:04X}")]
    UnsupportedVersion(u16),
    #[error("corrupt structure: {0}")]
    Corrupt(&'static str),
    #[error("key not found")]
    NotFound,
    #[error("invalid HID: 0x{0:08X}")]
    InvalidHid(u32),
    #[error("invalid BTHHEADER: {0}")]
    InvalidBthHeader(&'static str),
    #[error("unknown RTF COMPTYPE: 0x{0:08X}")]
    UnknownCompression(u32),
    #[error("store is password protected")]
    PasswordRequired,
    #[error("password does not match the stored PidTagPstPassword CRC")]
    PasswordIncorrect,
    #[error("file handle has been closed")]
    Disposed,
}

pub type Result<T> = std::result::Result<T, Error>;
