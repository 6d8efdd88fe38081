//! Paged access to the backing file.
//!
//! One mutex serializes every seek+read pair so concurrent descents never
//! interleave positions on the shared handle. Bytes are always copied out;
//! no caller ever sees an aliased buffer.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Mutex;

use crate::{Error, Result};

/// A read-only, seekable byte source backing an open store.
///
/// `std::fs::File` is the usual implementation; tests feed in-memory
/// images through a `Cursor`.
pub trait ByteSource: Read + Seek + Send {}

impl<T> ByteSource for T where T: Read + Seek + Send {}

pub(crate) struct PagedReader {
    source: Mutex<Option<Box<dyn ByteSource>>>,
    len: u64,
}

impl PagedReader {
    pub(crate) fn new(mut source: Box<dyn ByteSource>) -> Result<Self> {
        let len = source.seek(SeekFrom::End(0))?;
        Ok(Self {
            source: Mutex::new(Some(source)),
            len,
        })
    }

    /// Total length of the backing source in bytes.
    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    /// Read exactly `len` bytes at `offset` into a fresh buffer.
    pub(crate) fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let end = offset.checked_add(len as u64);
        if end.is_none() || end.unwrap() > self.len {
            return Err(Error::Truncated { offset, len });
        }

        let mut guard = self
            .source
            .lock()
            .map_err(|_| Error::Corrupt("poisoned file lock"))?;
        let source = guard.as_mut().ok_or(Error::Disposed)?;

        source.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0_u8; len];
        source.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Drop the backing source. Every subsequent read fails with
    /// [`Error::Disposed`].
    pub(crate) fn close(&self) {
        if let Ok(mut guard) = self.source.lock() {
            *guard = None;
        }
    }
}

impl fmt::Debug for PagedReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedReader").field("len", &self.len).finish()
    }
}
