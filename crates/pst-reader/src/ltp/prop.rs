//! ## [Property Data Types](https://learn.microsoft.com/en-us/openspecs/exchange_server_protocols/MS-OXCDATA/0c77892e-288e-435a-9c49-be1c20c7afdb)
//!
//! The fixed set of on-disk value types, the 32-bit property tag that pairs
//! a type with a property id, and typed decoding of value buffers.

use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt::Debug;
use std::io::{Cursor, Read};
use std::mem;

use crate::ndb::node_id::NodeId;
use crate::{Error, Result};

/// `wPropType`
#[repr(u16)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Debug)]
pub enum PropertyType {
    /// `PtypNull`: None: This property is a placeholder.
    #[default]
    Null = 0x0000,
    /// `PtypUnspecified`: the type is carried elsewhere.
    Unspecified = 0x0001,
    /// `PtypInteger16`: 2 bytes; a 16-bit integer
    Integer16 = 0x0002,
    /// `PtypInteger32`: 4 bytes; a 32-bit integer
    Integer32 = 0x0003,
    /// `PtypFloating32`: 4 bytes; a 32-bit floating-point number
    Floating32 = 0x0004,
    /// `PtypFloating64`: 8 bytes; a 64-bit floating-point number
    Floating64 = 0x0005,
    /// `PtypCurrency`: 8 bytes; a 64-bit signed, scaled integer representation
    /// of a decimal currency value, with four places to the right of the
    /// decimal point
    Currency = 0x0006,
    /// `PtypFloatingTime`: 8 bytes; days since December 30, 1899, with the
    /// fraction of a day in the fractional part
    FloatingTime = 0x0007,
    /// `PtypErrorCode`: 4 bytes; a 32-bit error code
    ErrorCode = 0x000A,
    /// `PtypBoolean`: 1 byte; restricted to 1 or 0
    Boolean = 0x000B,
    /// `PtypObject`: an embedded object reached through the sub-node tree
    Object = 0x000D,
    /// `PtypInteger64`: 8 bytes; a 64-bit integer
    Integer64 = 0x0014,
    /// `PtypString8`: Variable size; a multibyte string in the externally
    /// specified codepage
    String8 = 0x001E,
    /// `PtypString`: Variable size; a UTF-16LE string
    Unicode = 0x001F,
    /// `PtypTime`: 8 bytes; 100-nanosecond intervals since January 1, 1601
    Time = 0x0040,
    /// `PtypGuid`: 16 bytes; Data1/Data2/Data3 little-endian
    Guid = 0x0048,
    /// `PtypBinary`: Variable size
    Binary = 0x0102,

    MultipleInteger16 = 0x1002,
    MultipleInteger32 = 0x1003,
    MultipleFloating32 = 0x1004,
    MultipleFloating64 = 0x1005,
    MultipleCurrency = 0x1006,
    MultipleFloatingTime = 0x1007,
    MultipleInteger64 = 0x1014,
    MultipleString8 = 0x101E,
    MultipleUnicode = 0x101F,
    MultipleTime = 0x1040,
    MultipleGuid = 0x1048,
    MultipleBinary = 0x1102,
}

impl TryFrom<u16> for PropertyType {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0x0000 => Ok(Self::Null),
            0x0001 => Ok(Self::Unspecified),
            0x0002 => Ok(Self::Integer16),
            0x0003 => Ok(Self::Integer32),
            0x0004 => Ok(Self::Floating32),
            0x0005 => Ok(Self::Floating64),
            0x0006 => Ok(Self::Currency),
            0x0007 => Ok(Self::FloatingTime),
            0x000A => Ok(Self::ErrorCode),
            0x000B => Ok(Self::Boolean),
            0x000D => Ok(Self::Object),
            0x0014 => Ok(Self::Integer64),
            0x001E => Ok(Self::String8),
            0x001F => Ok(Self::Unicode),
            0x0040 => Ok(Self::Time),
            0x0048 => Ok(Self::Guid),
            0x0102 => Ok(Self::Binary),
            0x1002 => Ok(Self::MultipleInteger16),
            0x1003 => Ok(Self::MultipleInteger32),
            0x1004 => Ok(Self::MultipleFloating32),
            0x1005 => Ok(Self::MultipleFloating64),
            0x1006 => Ok(Self::MultipleCurrency),
            0x1007 => Ok(Self::MultipleFloatingTime),
            0x1014 => Ok(Self::MultipleInteger64),
            0x101E => Ok(Self::MultipleString8),
            0x101F => Ok(Self::MultipleUnicode),
            0x1040 => Ok(Self::MultipleTime),
            0x1048 => Ok(Self::MultipleGuid),
            0x1102 => Ok(Self::MultipleBinary),
            _ => Err(Error::Corrupt("invalid wPropType")),
        }
    }
}

impl PropertyType {
    /// Width of the type's value when it fits inline in a PC record; `None`
    /// for variable-size and multi-valued types.
    pub(crate) fn fixed_width(self) -> Option<usize> {
        match self {
            Self::Null | Self::Unspecified => Some(0),
            Self::Boolean => Some(1),
            Self::Integer16 => Some(2),
            Self::Integer32 | Self::Floating32 | Self::ErrorCode => Some(4),
            Self::Floating64
            | Self::Currency
            | Self::FloatingTime
            | Self::Integer64
            | Self::Time => Some(8),
            Self::Guid => Some(16),
            _ => None,
        }
    }
}

/// A 32-bit property tag: the property id in the high word, the type in the
/// low word.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PropertyTag {
    pub id: u16,
    pub kind: PropertyType,
}

impl PropertyTag {
    pub const fn new(id: u16, kind: PropertyType) -> Self {
        Self { id, kind }
    }
}

impl Debug for PropertyTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PropertyTag {{ 0x{:04X}: {:?} }}", self.id, self.kind)
    }
}

impl From<PropertyTag> for u32 {
    fn from(tag: PropertyTag) -> Self {
        (u32::from(tag.id) << 16) | u32::from(tag.kind as u16)
    }
}

impl TryFrom<u32> for PropertyTag {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Ok(Self {
            id: (value >> 16) as u16,
            kind: PropertyType::try_from(value as u16)?,
        })
    }
}

/// A decoded property value.
#[derive(Clone, Default, Debug, PartialEq)]
pub enum PropertyValue {
    #[default]
    Null,
    Integer16(i16),
    Integer32(i32),
    Floating32(f32),
    Floating64(f64),
    Currency(i64),
    FloatingTime(f64),
    ErrorCode(i32),
    Boolean(bool),
    Integer64(i64),
    /// A string in the store's 8-bit codepage, left undecoded.
    String8(Vec<u8>),
    /// A UTF-16LE string, decoded lossily.
    Unicode(String),
    /// 100-nanosecond intervals since January 1, 1601 (FILETIME).
    Time(i64),
    Guid([u8; 16]),
    Binary(Vec<u8>),
    /// An embedded object: the sub-node carrying it and its total size.
    Object { node: NodeId, size: u32 },

    MultipleInteger16(Vec<i16>),
    MultipleInteger32(Vec<i32>),
    MultipleFloating32(Vec<f32>),
    MultipleFloating64(Vec<f64>),
    MultipleCurrency(Vec<i64>),
    MultipleFloatingTime(Vec<f64>),
    MultipleInteger64(Vec<i64>),
    MultipleString8(Vec<Vec<u8>>),
    MultipleUnicode(Vec<String>),
    MultipleTime(Vec<i64>),
    MultipleGuid(Vec<[u8; 16]>),
    MultipleBinary(Vec<Vec<u8>>),
}

fn decode_utf16(bytes: &[u8]) -> String {
    let mut units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    // Values written by some producers keep the terminator; strip one.
    if units.last() == Some(&0) {
        units.pop();
    }
    String::from_utf16_lossy(&units)
}

fn trim_nul(mut bytes: Vec<u8>) -> Vec<u8> {
    if bytes.last() == Some(&0) {
        bytes.pop();
    }
    bytes
}

fn read_guid(cursor: &mut Cursor<&[u8]>) -> Result<[u8; 16]> {
    let mut guid = [0_u8; 16];
    cursor.read_exact(&mut guid)?;
    Ok(guid)
}

/// Decode the multi-value layout for variable-width elements: a count, that
/// many offsets, then the concatenated element buffers.
fn decode_multi_offsets(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut cursor = Cursor::new(data);

    // ulCount
    let count = cursor.read_u32::<LittleEndian>()? as usize;
    if count > data.len() / mem::size_of::<u32>() {
        return Err(Error::Corrupt("multi-value ulCount"));
    }

    // rgulDataOffsets
    let mut offsets = Vec::with_capacity(count + 1);
    for _ in 0..count {
        offsets.push(cursor.read_u32::<LittleEndian>()? as usize);
    }
    offsets.push(data.len());

    let mut values = Vec::with_capacity(count);
    for bounds in offsets.windows(2) {
        let (start, end) = (bounds[0], bounds[1]);
        if start > end || end > data.len() {
            return Err(Error::Corrupt("multi-value rgulDataOffsets"));
        }
        values.push(data[start..end].to_vec());
    }

    Ok(values)
}

/// Decode a value buffer as `kind`.
///
/// Used for every value that does not fit inline in a PC record: the buffer
/// comes from a heap allocation or a sub-node data stream. An empty buffer
/// decodes to the type's empty value, which is how HNID 0 reads.
pub(crate) fn decode_value(kind: PropertyType, data: &[u8]) -> Result<PropertyValue> {
    let mut cursor = Cursor::new(data);

    let fixed_err = Error::Corrupt("fixed-width value size");
    match kind {
        PropertyType::Null | PropertyType::Unspecified => Ok(PropertyValue::Null),

        PropertyType::Boolean => match data {
            [] => Ok(PropertyValue::Boolean(false)),
            [value, ..] => Ok(PropertyValue::Boolean(*value != 0)),
        },

        PropertyType::Integer16 => match data.len() {
            0 => Ok(PropertyValue::Integer16(0)),
            2.. => Ok(PropertyValue::Integer16(cursor.read_i16::<LittleEndian>()?)),
            _ => Err(fixed_err),
        },

        PropertyType::Integer32 => match data.len() {
            0 => Ok(PropertyValue::Integer32(0)),
            4.. => Ok(PropertyValue::Integer32(cursor.read_i32::<LittleEndian>()?)),
            _ => Err(fixed_err),
        },

        PropertyType::Floating32 => match data.len() {
            0 => Ok(PropertyValue::Floating32(0.0)),
            4.. => Ok(PropertyValue::Floating32(cursor.read_f32::<LittleEndian>()?)),
            _ => Err(fixed_err),
        },

        PropertyType::ErrorCode => match data.len() {
            0 => Ok(PropertyValue::ErrorCode(0)),
            4.. => Ok(PropertyValue::ErrorCode(cursor.read_i32::<LittleEndian>()?)),
            _ => Err(fixed_err),
        },

        PropertyType::Floating64 => match data.len() {
            0 => Ok(PropertyValue::Floating64(0.0)),
            8.. => Ok(PropertyValue::Floating64(cursor.read_f64::<LittleEndian>()?)),
            _ => Err(fixed_err),
        },

        PropertyType::FloatingTime => match data.len() {
            0 => Ok(PropertyValue::FloatingTime(0.0)),
            8.. => Ok(PropertyValue::FloatingTime(cursor.read_f64::<LittleEndian>()?)),
            _ => Err(fixed_err),
        },

        PropertyType::Currency => match data.len() {
            0 => Ok(PropertyValue::Currency(0)),
            8.. => Ok(PropertyValue::Currency(cursor.read_i64::<LittleEndian>()?)),
            _ => Err(fixed_err),
        },

        PropertyType::Integer64 => match data.len() {
            0 => Ok(PropertyValue::Integer64(0)),
            8.. => Ok(PropertyValue::Integer64(cursor.read_i64::<LittleEndian>()?)),
            _ => Err(fixed_err),
        },

        PropertyType::Time => match data.len() {
            0 => Ok(PropertyValue::Time(0)),
            8.. => Ok(PropertyValue::Time(cursor.read_i64::<LittleEndian>()?)),
            _ => Err(fixed_err),
        },

        PropertyType::Guid => match data.len() {
            0 => Ok(PropertyValue::Guid([0; 16])),
            16.. => Ok(PropertyValue::Guid(read_guid(&mut cursor)?)),
            _ => Err(fixed_err),
        },

        PropertyType::String8 => Ok(PropertyValue::String8(trim_nul(data.to_vec()))),

        PropertyType::Unicode => Ok(PropertyValue::Unicode(decode_utf16(data))),

        PropertyType::Binary => Ok(PropertyValue::Binary(data.to_vec())),

        PropertyType::Object => {
            if data.is_empty() {
                return Ok(PropertyValue::Null);
            }
            let node = NodeId::from(cursor.read_u32::<LittleEndian>()?);
            let size = cursor.read_u32::<LittleEndian>()?;
            Ok(PropertyValue::Object { node, size })
        }

        PropertyType::MultipleInteger16 => Ok(PropertyValue::MultipleInteger16(
            data.chunks_exact(2)
                .map(|raw| i16::from_le_bytes([raw[0], raw[1]]))
                .collect(),
        )),

        PropertyType::MultipleInteger32 => Ok(PropertyValue::MultipleInteger32(
            data.chunks_exact(4)
                .map(|raw| i32::from_le_bytes(raw.try_into().unwrap()))
                .collect(),
        )),

        PropertyType::MultipleFloating32 => Ok(PropertyValue::MultipleFloating32(
            data.chunks_exact(4)
                .map(|raw| f32::from_le_bytes(raw.try_into().unwrap()))
                .collect(),
        )),

        PropertyType::MultipleFloating64 => Ok(PropertyValue::MultipleFloating64(
            data.chunks_exact(8)
                .map(|raw| f64::from_le_bytes(raw.try_into().unwrap()))
                .collect(),
        )),

        PropertyType::MultipleCurrency => Ok(PropertyValue::MultipleCurrency(
            data.chunks_exact(8)
                .map(|raw| i64::from_le_bytes(raw.try_into().unwrap()))
                .collect(),
        )),

        PropertyType::MultipleFloatingTime => Ok(PropertyValue::MultipleFloatingTime(
            data.chunks_exact(8)
                .map(|raw| f64::from_le_bytes(raw.try_into().unwrap()))
                .collect(),
        )),

        PropertyType::MultipleInteger64 => Ok(PropertyValue::MultipleInteger64(
            data.chunks_exact(8)
                .map(|raw| i64::from_le_bytes(raw.try_into().unwrap()))
                .collect(),
        )),

        PropertyType::MultipleTime => Ok(PropertyValue::MultipleTime(
            data.chunks_exact(8)
                .map(|raw| i64::from_le_bytes(raw.try_into().unwrap()))
                .collect(),
        )),

        PropertyType::MultipleGuid => Ok(PropertyValue::MultipleGuid(
            data.chunks_exact(16)
                .map(|raw| <[u8; 16]>::try_from(raw).unwrap())
                .collect(),
        )),

        PropertyType::MultipleString8 => Ok(PropertyValue::MultipleString8(
            decode_multi_offsets(data)?
                .into_iter()
                .map(trim_nul)
                .collect(),
        )),

        PropertyType::MultipleUnicode => Ok(PropertyValue::MultipleUnicode(
            decode_multi_offsets(data)?
                .iter()
                .map(|raw| decode_utf16(raw))
                .collect(),
        )),

        PropertyType::MultipleBinary => {
            Ok(PropertyValue::MultipleBinary(decode_multi_offsets(data)?))
        }
    }
}

/// Decode a value that fits inline in the low bytes of a PC record.
pub(crate) fn decode_inline(kind: PropertyType, raw: u32) -> Result<PropertyValue> {
    match kind {
        PropertyType::Null | PropertyType::Unspecified => Ok(PropertyValue::Null),
        PropertyType::Boolean => Ok(PropertyValue::Boolean(raw & 0xFF != 0)),
        PropertyType::Integer16 => Ok(PropertyValue::Integer16(raw as u16 as i16)),
        PropertyType::Integer32 => Ok(PropertyValue::Integer32(raw as i32)),
        PropertyType::Floating32 => Ok(PropertyValue::Floating32(f32::from_bits(raw))),
        PropertyType::ErrorCode => Ok(PropertyValue::ErrorCode(raw as i32)),
        _ => Err(Error::Corrupt("inline value type")),
    }
}

impl PropertyValue {
    /// Best-effort string view for the text-bearing variants.
    pub fn as_text(&self) -> Option<String> {
        match self {
            PropertyValue::Unicode(text) => Some(text.clone()),
            PropertyValue::String8(bytes) => {
                Some(bytes.iter().copied().map(char::from).collect())
            }
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            PropertyValue::Integer32(value) => Some(*value),
            PropertyValue::Integer16(value) => Some(i32::from(*value)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_filetime(&self) -> Option<i64> {
        match self {
            PropertyValue::Time(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::Binary(bytes) | PropertyValue::String8(bytes) => Some(bytes),
            _ => None,
        }
    }
}
