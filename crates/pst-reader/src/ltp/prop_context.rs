//! ## [Property Context (PC)](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/294c83c6-ff92-42f5-b6b6-876c29fa9737)
//!
//! A BTH with 2-byte property-id keys and 6-byte records (`wPropType` +
//! `dwValueHnid`). Small fixed values sit inline in the record; everything
//! else resolves through the heap or the owning node's sub-node tree.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use super::heap::{HeapClient, HeapId, HeapNode};
use super::prop::{self, PropertyTag, PropertyType, PropertyValue};
use super::tree::HeapTree;
use crate::ndb::{node_id::NodeId, Ndb, NodeHandle};
use crate::{Error, Result};

/// Size of the record part of a PC BTH entry.
const PC_RECORD_SIZE: u8 = 6;

pub(crate) struct PropertyContext {
    heap: HeapNode,
}

impl PropertyContext {
    /// Open the PC stored on `node`.
    pub(crate) fn open(ndb: &Ndb, node: NodeHandle) -> Result<Self> {
        let heap = HeapNode::open(ndb, node)?;
        if heap.client() != HeapClient::Properties {
            return Err(Error::Corrupt("HNHDR bClientSig is not bTypePC"));
        }
        Ok(Self { heap })
    }

    fn tree(&self) -> Result<HeapTree<'_>> {
        let tree = HeapTree::open(&self.heap, self.heap.user_root())?;
        if tree.key_size() != 2 || tree.entry_size() != PC_RECORD_SIZE {
            return Err(Error::InvalidBthHeader("PC record sizes"));
        }
        Ok(tree)
    }

    /// Decode one 6-byte record into its value.
    fn decode_record(&self, ndb: &Ndb, record: &[u8]) -> Result<(PropertyType, PropertyValue)> {
        let mut cursor = Cursor::new(record);

        // wPropType
        let kind = PropertyType::try_from(cursor.read_u16::<LittleEndian>()?)?;

        // dwValueHnid
        let raw = cursor.read_u32::<LittleEndian>()?;

        let value = if kind.fixed_width().is_some_and(|width| width <= 4) {
            prop::decode_inline(kind, raw)?
        } else {
            let buffer = self.resolve_hnid(ndb, raw)?;
            prop::decode_value(kind, &buffer)?
        };

        Ok((kind, value))
    }

    /// Resolve a `dwValueHnid`: zero reads as an empty buffer, an HID as a
    /// heap allocation, and anything else as a sub-node data stream.
    fn resolve_hnid(&self, ndb: &Ndb, raw: u32) -> Result<Vec<u8>> {
        if raw == 0 {
            return Ok(Vec::new());
        }

        let node = NodeId::from(raw);
        if u32::from(node) & 0x1F == 0 {
            return Ok(self.heap.resolve(HeapId::from(raw))?.to_vec());
        }

        let child = ndb.subnode_handle(self.heap.node(), node)?;
        ndb.node_stream(child.data)
    }

    /// Look up a property by id alone, decoding with its stored type.
    pub(crate) fn get_id(&self, ndb: &Ndb, id: u16) -> Result<Option<PropertyValue>> {
        let Some(record) = self.tree()?.lookup(u128::from(id))? else {
            return Ok(None);
        };
        let (_, value) = self.decode_record(ndb, &record)?;
        Ok(Some(value))
    }

    /// Look up a property by full tag. A property whose stored type differs
    /// from the requested one reads as absent.
    pub(crate) fn get(&self, ndb: &Ndb, tag: PropertyTag) -> Result<Option<PropertyValue>> {
        let Some(record) = self.tree()?.lookup(u128::from(tag.id))? else {
            return Ok(None);
        };
        let (kind, value) = self.decode_record(ndb, &record)?;
        Ok((kind == tag.kind).then_some(value))
    }

    pub(crate) fn contains(&self, ndb: &Ndb, tag: PropertyTag) -> Result<bool> {
        Ok(self.get(ndb, tag)?.is_some())
    }

    /// Walk every property in ascending tag order.
    ///
    /// A property whose value fails to decode is reported as that entry's
    /// error; it does not abort the walk.
    pub(crate) fn enumerate(
        &self,
        ndb: &Ndb,
    ) -> Result<Vec<(PropertyTag, Result<PropertyValue>)>> {
        let mut properties = Vec::new();
        for (key, record) in self.tree()?.entries()? {
            let id = key as u16;
            let kind = PropertyType::try_from(u16::from_le_bytes([record[0], record[1]]))
                .unwrap_or_default();
            let decoded = self.decode_record(ndb, &record).map(|(_, value)| value);
            if let Err(error) = &decoded {
                log::warn!("[pst] failed to decode property 0x{id:04X}: {error}");
            }
            properties.push((PropertyTag::new(id, kind), decoded));
        }
        Ok(properties)
    }
}
