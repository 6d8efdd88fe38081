//! ## [BTree-on-Heap (BTH)](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/2dd1a95a-c8b1-4ac5-87d1-10cb8de64053)
//!
//! A self-describing tree stored in heap allocations: the header gives key
//! width, record width, depth, and the root allocation; interior allocations
//! hold sorted key/child pairs and leaves sorted key/record pairs.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use super::heap::{HeapId, HeapNode};
use crate::{Error, Result};

/// [BTHHEADER](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/8e4ae05c-3c24-4103-b7e5-ffef6f244834)
pub(crate) struct HeapTree<'h> {
    heap: &'h HeapNode,
    key_size: u8,
    entry_size: u8,
    levels: u8,
    root: HeapId,
}

impl<'h> HeapTree<'h> {
    pub(crate) fn open(heap: &'h HeapNode, header: HeapId) -> Result<Self> {
        let mut cursor = Cursor::new(heap.resolve(header)?);

        // bType
        let signature = cursor.read_u8()?;
        if signature != 0xB5 {
            return Err(Error::InvalidBthHeader("bType"));
        }

        // cbKey
        let key_size = cursor.read_u8()?;
        if !matches!(key_size, 2 | 4 | 8 | 16) {
            return Err(Error::InvalidBthHeader("cbKey"));
        }

        // cbEnt
        let entry_size = cursor.read_u8()?;
        if !(1..=32).contains(&entry_size) {
            return Err(Error::InvalidBthHeader("cbEnt"));
        }

        // bIdxLevels
        let levels = cursor.read_u8()?;
        if levels > 8 {
            return Err(Error::InvalidBthHeader("bIdxLevels"));
        }

        // hidRoot
        let root = HeapId::from(cursor.read_u32::<LittleEndian>()?);

        Ok(Self {
            heap,
            key_size,
            entry_size,
            levels,
            root,
        })
    }

    pub(crate) fn key_size(&self) -> u8 {
        self.key_size
    }

    pub(crate) fn entry_size(&self) -> u8 {
        self.entry_size
    }

    /// Keys compare as little-endian unsigned integers of `cbKey` width.
    fn read_key(&self, cursor: &mut Cursor<&[u8]>) -> Result<u128> {
        let mut bytes = [0_u8; 16];
        let width = usize::from(self.key_size);
        std::io::Read::read_exact(cursor, &mut bytes[..width])?;
        Ok(u128::from_le_bytes(bytes))
    }

    fn records_in(&self, allocation: &[u8], record_size: usize) -> usize {
        allocation.len() / record_size
    }

    /// Binary-search the record with exactly `key`.
    pub(crate) fn lookup(&self, key: u128) -> Result<Option<Vec<u8>>> {
        if self.root.is_nil() {
            return Ok(None);
        }

        let key_size = usize::from(self.key_size);
        let mut current = self.root;

        // Interior levels map keys to the last child whose first key does
        // not exceed them.
        for _ in 0..self.levels {
            let allocation = self.heap.resolve(current)?;
            let record_size = key_size + 4;

            let mut branches = Vec::with_capacity(self.records_in(allocation, record_size));
            for index in 0..self.records_in(allocation, record_size) {
                let mut cursor = Cursor::new(&allocation[index * record_size..]);
                let entry_key = self.read_key(&mut cursor)?;
                branches.push((entry_key, HeapId::from(cursor.read_u32::<LittleEndian>()?)));
            }

            let upper = branches.partition_point(|(entry_key, _)| *entry_key <= key);
            if upper == 0 {
                return Ok(None);
            }
            current = branches[upper - 1].1;
        }

        let allocation = self.heap.resolve(current)?;
        let record_size = key_size + usize::from(self.entry_size);
        let count = self.records_in(allocation, record_size);

        let mut low = 0;
        let mut high = count;
        while low < high {
            let middle = (low + high) / 2;
            let mut cursor = Cursor::new(&allocation[middle * record_size..]);
            let entry_key = self.read_key(&mut cursor)?;
            match entry_key.cmp(&key) {
                std::cmp::Ordering::Less => low = middle + 1,
                std::cmp::Ordering::Greater => high = middle,
                std::cmp::Ordering::Equal => {
                    let start = middle * record_size + key_size;
                    return Ok(Some(allocation[start..start + usize::from(self.entry_size)].to_vec()));
                }
            }
        }

        Ok(None)
    }

    /// Walk the whole tree in key order.
    ///
    /// The sorted-order invariant is validated across the walk; a violation
    /// is corruption.
    pub(crate) fn entries(&self) -> Result<Vec<(u128, Vec<u8>)>> {
        if self.root.is_nil() {
            return Ok(Vec::new());
        }

        let key_size = usize::from(self.key_size);
        let mut level = self.levels;
        let mut frontier = vec![self.root];

        while level > 0 {
            let mut next_frontier = Vec::new();
            for heap_id in frontier {
                let allocation = self.heap.resolve(heap_id)?;
                let record_size = key_size + 4;
                for index in 0..self.records_in(allocation, record_size) {
                    let mut cursor = Cursor::new(&allocation[index * record_size..]);
                    self.read_key(&mut cursor)?;
                    next_frontier.push(HeapId::from(cursor.read_u32::<LittleEndian>()?));
                }
            }
            frontier = next_frontier;
            level -= 1;
        }

        let record_size = key_size + usize::from(self.entry_size);
        let mut records = Vec::new();
        for heap_id in frontier {
            let allocation = self.heap.resolve(heap_id)?;
            for index in 0..self.records_in(allocation, record_size) {
                let mut cursor = Cursor::new(&allocation[index * record_size..]);
                let key = self.read_key(&mut cursor)?;
                let start = index * record_size + key_size;
                records.push((key, allocation[start..start + usize::from(self.entry_size)].to_vec()));
            }
        }

        if !records.windows(2).all(|pair| pair[0].0 < pair[1].0) {
            return Err(Error::Corrupt("BTH key order"));
        }

        Ok(records)
    }
}
