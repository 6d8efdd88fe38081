//! ## [Named Property Lookup Map](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/e17e195d-0454-4b9b-b398-c9127a26a678)
//!
//! The name-to-id map at `NID_NAME_TO_ID_MAP` resolves property ids at or
//! above 0x8000 to a property-set GUID plus a numeric id or a name.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::ltp::prop_context::PropertyContext;
use crate::ndb::node_id::NID_NAME_TO_ID_MAP;
use crate::ndb::{Ndb, NodeHandle};
use crate::{Error, Result};

/// `PidTagNameidStreamGuid`
const PROP_GUID_STREAM: u16 = 0x0002;
/// `PidTagNameidStreamEntry`
const PROP_ENTRY_STREAM: u16 = 0x0003;
/// `PidTagNameidStreamString`
const PROP_STRING_STREAM: u16 = 0x0004;

/// First property id the map can describe.
const FIRST_NAMED_PROP: u16 = 0x8000;

/// `PS_MAPI`
const PS_MAPI: [u8; 16] = [
    0x28, 0x03, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x46,
];

/// `PS_PUBLIC_STRINGS`
const PS_PUBLIC_STRINGS: [u8; 16] = [
    0x29, 0x03, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x46,
];

/// What a named property is named by.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum NamedPropertyId {
    Numeric(u32),
    Name(String),
}

/// A resolved name-to-id map entry.
#[derive(Clone, Debug)]
pub struct NamedProperty {
    /// Property-set GUID; `None` for entries declared GUID-less.
    pub guid: Option<[u8; 16]>,
    pub id: NamedPropertyId,
}

pub(crate) struct NamedPropertyMap {
    entries: Vec<u8>,
    guids: Vec<u8>,
    strings: Vec<u8>,
}

impl NamedPropertyMap {
    pub(crate) fn read(ndb: &Ndb) -> Result<Self> {
        let node = ndb.node(NID_NAME_TO_ID_MAP)?;
        let context = PropertyContext::open(ndb, NodeHandle::from(node))?;

        let stream = |id: u16| -> Result<Vec<u8>> {
            Ok(context
                .get_id(ndb, id)?
                .and_then(|value| value.as_bytes().map(<[u8]>::to_vec))
                .unwrap_or_default())
        };

        Ok(Self {
            entries: stream(PROP_ENTRY_STREAM)?,
            guids: stream(PROP_GUID_STREAM)?,
            strings: stream(PROP_STRING_STREAM)?,
        })
    }

    /// Resolve `property_id` (≥ 0x8000) to its name. Ids below the named
    /// range and ids past the map read as `None`.
    pub(crate) fn resolve(&self, property_id: u16) -> Result<Option<NamedProperty>> {
        if property_id < FIRST_NAMED_PROP {
            return Ok(None);
        }
        let wanted_index = property_id - FIRST_NAMED_PROP;

        // NAMEID records are 8 bytes: dwPropertyID, a wGuid word carrying
        // the name flag in bit 0, and wPropIdx.
        for record in self.entries.chunks_exact(8) {
            let mut cursor = Cursor::new(record);
            let property = cursor.read_u32::<LittleEndian>()?;
            let guid_word = cursor.read_u16::<LittleEndian>()?;
            let index = cursor.read_u16::<LittleEndian>()?;

            if index != wanted_index {
                continue;
            }

            let is_name = guid_word & 0x1 != 0;
            let guid = match guid_word >> 1 {
                0 => None,
                1 => Some(PS_MAPI),
                2 => Some(PS_PUBLIC_STRINGS),
                slot => {
                    let start = usize::from(slot - 3) * 16;
                    let raw = self
                        .guids
                        .get(start..start + 16)
                        .ok_or(Error::Corrupt("NAMEID wGuid"))?;
                    Some(raw.try_into().unwrap())
                }
            };

            let id = if is_name {
                NamedPropertyId::Name(self.read_name(property as usize)?)
            } else {
                NamedPropertyId::Numeric(property)
            };

            return Ok(Some(NamedProperty { guid, id }));
        }

        Ok(None)
    }

    /// Names live in the string stream as a byte length followed by UTF-16.
    fn read_name(&self, offset: usize) -> Result<String> {
        let header = self
            .strings
            .get(offset..offset + 4)
            .ok_or(Error::Corrupt("NAMEID string offset"))?;
        let length = u32::from_le_bytes(header.try_into().unwrap()) as usize;

        let raw = self
            .strings
            .get(offset + 4..offset + 4 + length)
            .ok_or(Error::Corrupt("NAMEID string bounds"))?;

        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }
}
