//! ## [Table Context (TC)](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/5e48be0d-a75a-4918-a277-50408ff96740)
//!
//! A row-major table over a heap: TCINFO describes the column schema and
//! row width, a row-index BTH maps row ids to row positions, and the row
//! matrix lives either in a heap allocation or a dedicated sub-node stream.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use super::heap::{HeapClient, HeapId, HeapNode};
use super::prop::{self, PropertyTag, PropertyValue};
use super::tree::HeapTree;
use crate::ndb::{node_id::NodeId, Ndb, NodeHandle};
use crate::{Error, Result};

pub(crate) const fn existence_bitmap_size(column_count: usize) -> usize {
    column_count.div_ceil(8)
}

/// [TCOLDESC](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/3a2f63cf-bb40-4559-910c-e55ec43d9cbb)
#[derive(Clone, Copy, Debug)]
pub(crate) struct TableColumn {
    pub(crate) tag: PropertyTag,
    pub(crate) offset: u16,
    pub(crate) size: u8,
    pub(crate) bit: u8,
}

enum RowStorage {
    /// No rows at all (`hnidRows` of zero).
    Empty,
    /// Row matrix inline in one heap allocation.
    Inline(HeapId),
    /// Row matrix partitioned over a sub-node data stream.
    SubNode(NodeId),
}

pub(crate) struct TableContext {
    heap: HeapNode,
    columns: Vec<TableColumn>,
    /// `rgib.bm`: total row width including the cell-existence bitmap.
    row_width: usize,
    /// `rgib.b1`: where the cell-existence bitmap starts within a row.
    bitmap_offset: usize,
    row_index: HeapId,
    rows: RowStorage,
}

/// One materialized row: its id and raw bytes.
pub(crate) struct TableRow {
    pub(crate) id: u32,
    bytes: Vec<u8>,
}

impl TableContext {
    /// Open the TC stored on `node`.
    pub(crate) fn open(ndb: &Ndb, node: NodeHandle) -> Result<Self> {
        let heap = HeapNode::open(ndb, node)?;
        if heap.client() != HeapClient::Table {
            return Err(Error::Corrupt("HNHDR bClientSig is not bTypeTC"));
        }

        let info = heap.resolve(heap.user_root())?.to_vec();
        let mut cursor = Cursor::new(info.as_slice());

        // bType
        if cursor.read_u8()? != 0x7C {
            return Err(Error::Corrupt("TCINFO bType"));
        }

        // cCols
        let column_count = usize::from(cursor.read_u8()?);

        // rgib: ending offsets of the 4-, 2-, and 1-byte value groups, then
        // of the cell-existence bitmap (the total row width).
        let end_4byte = cursor.read_u16::<LittleEndian>()?;
        let end_2byte = cursor.read_u16::<LittleEndian>()?;
        let end_1byte = cursor.read_u16::<LittleEndian>()?;
        let end_bitmap = cursor.read_u16::<LittleEndian>()?;

        if end_2byte < end_4byte || end_1byte < end_2byte || end_bitmap < end_1byte {
            return Err(Error::Corrupt("TCINFO rgib"));
        }
        if usize::from(end_bitmap - end_1byte) != existence_bitmap_size(column_count) {
            return Err(Error::Corrupt("TCINFO rgib.bm"));
        }

        // hidRowIndex
        let row_index = HeapId::from(cursor.read_u32::<LittleEndian>()?);

        // hnidRows
        let rows_raw = cursor.read_u32::<LittleEndian>()?;
        let rows = if rows_raw == 0 {
            RowStorage::Empty
        } else if rows_raw & 0x1F == 0 {
            RowStorage::Inline(HeapId::from(rows_raw))
        } else {
            RowStorage::SubNode(NodeId::from(rows_raw))
        };

        // hidIndex (deprecated)
        cursor.read_u32::<LittleEndian>()?;

        // rgTCOLDESC
        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let tag = cursor.read_u32::<LittleEndian>()?;
            let offset = cursor.read_u16::<LittleEndian>()?;
            let size = cursor.read_u8()?;
            let bit = cursor.read_u8()?;

            if usize::from(offset) + usize::from(size) > usize::from(end_1byte)
                || usize::from(bit) >= column_count
            {
                return Err(Error::Corrupt("TCOLDESC"));
            }

            columns.push(TableColumn {
                tag: PropertyTag::try_from(tag)?,
                offset,
                size,
                bit,
            });
        }

        Ok(Self {
            heap,
            columns,
            row_width: usize::from(end_bitmap),
            bitmap_offset: usize::from(end_1byte),
            row_index,
            rows,
        })
    }

    pub(crate) fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    fn row_index_tree(&self) -> Result<HeapTree<'_>> {
        let tree = HeapTree::open(&self.heap, self.row_index)?;
        if tree.key_size() != 4 {
            return Err(Error::InvalidBthHeader("TCROWID key size"));
        }
        Ok(tree)
    }

    fn row_position(record: &[u8]) -> u32 {
        // dwRowIndex is 4 bytes in Unicode files and 2 in ANSI.
        let mut raw = [0_u8; 4];
        let width = record.len().min(4);
        raw[..width].copy_from_slice(&record[..width]);
        u32::from_le_bytes(raw)
    }

    /// Row ids in row-index key order, the canonical row order set by the
    /// writer, paired with each row's position in the row matrix.
    pub(crate) fn row_ids(&self) -> Result<Vec<(u32, u32)>> {
        Ok(self
            .row_index_tree()?
            .entries()?
            .into_iter()
            .map(|(key, record)| (key as u32, Self::row_position(&record)))
            .collect())
    }

    pub(crate) fn row_count(&self) -> Result<usize> {
        Ok(self.row_ids()?.len())
    }

    /// Fetch one row's raw bytes by its position in the row matrix.
    fn row_bytes(&self, ndb: &Ndb, position: u32) -> Result<Vec<u8>> {
        let position = position as usize;
        match &self.rows {
            RowStorage::Empty => Err(Error::NotFound),
            RowStorage::Inline(heap_id) => {
                let matrix = self.heap.resolve(*heap_id)?;
                let start = position * self.row_width;
                let end = start + self.row_width;
                if end > matrix.len() {
                    return Err(Error::Corrupt("row matrix bounds"));
                }
                Ok(matrix[start..end].to_vec())
            }
            RowStorage::SubNode(node) => {
                let child = ndb.subnode_handle(self.heap.node(), *node)?;
                let blocks = ndb.node_blocks(child.data)?;

                // Rows never straddle blocks; each block holds a fixed
                // count regardless of its actual fill.
                let per_block = ndb.variant().max_block_payload() / self.row_width;
                if per_block == 0 {
                    return Err(Error::Corrupt("row wider than a block"));
                }

                let block = blocks
                    .get(position / per_block)
                    .ok_or(Error::Corrupt("row matrix bounds"))?;
                let start = (position % per_block) * self.row_width;
                let end = start + self.row_width;
                if end > block.len() {
                    return Err(Error::Corrupt("row matrix bounds"));
                }
                Ok(block[start..end].to_vec())
            }
        }
    }

    /// Fetch the row with `row_id`, or `NotFound`.
    pub(crate) fn row(&self, ndb: &Ndb, row_id: u32) -> Result<TableRow> {
        let record = self
            .row_index_tree()?
            .lookup(u128::from(row_id))?
            .ok_or(Error::NotFound)?;
        let bytes = self.row_bytes(ndb, Self::row_position(&record))?;
        Ok(TableRow { id: row_id, bytes })
    }

    /// Materialize every row in row-index key order.
    pub(crate) fn rows(&self, ndb: &Ndb) -> Result<Vec<TableRow>> {
        self.row_ids()?
            .into_iter()
            .map(|(id, position)| {
                Ok(TableRow {
                    id,
                    bytes: self.row_bytes(ndb, position)?,
                })
            })
            .collect()
    }

    /// Decode one cell of `row`, honoring the cell-existence bitmap.
    pub(crate) fn cell(
        &self,
        ndb: &Ndb,
        row: &TableRow,
        column: &TableColumn,
    ) -> Result<Option<PropertyValue>> {
        let bit = usize::from(column.bit);
        let byte = row
            .bytes
            .get(self.bitmap_offset + bit / 8)
            .ok_or(Error::Corrupt("cell existence bitmap bounds"))?;
        if byte & (1 << (7 - bit % 8)) == 0 {
            return Ok(None);
        }

        let start = usize::from(column.offset);
        let end = start + usize::from(column.size);
        let raw = row
            .bytes
            .get(start..end)
            .ok_or(Error::Corrupt("cell bounds"))?;

        let kind = column.tag.kind;
        let value = match kind.fixed_width() {
            // Fixed values, including the 8-byte ones, sit in the row.
            Some(_) => prop::decode_value(kind, raw)?,
            None => {
                let reference = u32::from_le_bytes(
                    raw.try_into()
                        .map_err(|_| Error::Corrupt("variable cell size"))?,
                );
                let buffer = self.resolve_hnid(ndb, reference)?;
                prop::decode_value(kind, &buffer)?
            }
        };

        Ok(Some(value))
    }

    /// Decode the cell under `prop_id` of the row with `row_id`.
    pub(crate) fn cell_by_id(
        &self,
        ndb: &Ndb,
        row_id: u32,
        prop_id: u16,
    ) -> Result<Option<PropertyValue>> {
        let row = self.row(ndb, row_id)?;
        let Some(column) = self.columns.iter().find(|column| column.tag.id == prop_id) else {
            return Ok(None);
        };
        self.cell(ndb, &row, column)
    }

    fn resolve_hnid(&self, ndb: &Ndb, raw: u32) -> Result<Vec<u8>> {
        if raw == 0 {
            return Ok(Vec::new());
        }

        let node = NodeId::from(raw);
        if raw & 0x1F == 0 {
            return Ok(self.heap.resolve(HeapId::from(raw))?.to_vec());
        }

        let child = ndb.subnode_handle(self.heap.node(), node)?;
        ndb.node_stream(child.data)
    }

    /// Enumerate one row as `(tag, value)` pairs, skipping absent cells.
    /// Cells that fail to decode surface as per-entry errors.
    pub(crate) fn enumerate_row(
        &self,
        ndb: &Ndb,
        row: &TableRow,
    ) -> Vec<(PropertyTag, Result<PropertyValue>)> {
        let mut cells = Vec::new();
        for column in &self.columns {
            match self.cell(ndb, row, column) {
                Ok(None) => {}
                Ok(Some(value)) => cells.push((column.tag, Ok(value))),
                Err(error) => {
                    log::warn!(
                        "[pst] failed to decode cell 0x{:04X} of row 0x{:X}: {error}",
                        column.tag.id,
                        row.id,
                    );
                    cells.push((column.tag, Err(error)));
                }
            }
        }
        cells.sort_by_key(|(tag, _)| *tag);
        cells
    }
}
