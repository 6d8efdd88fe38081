//! ## [Messaging Layer](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/3f1bc553-d15d-4dcf-9b80-fbf1dd6c7e79)
//!
//! The domain model over NDB/LTP: store, folders, messages, recipients,
//! attachments, bodies, and the named-property map.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::ndb::node_id::NodeId;
use crate::{Error, Result};

pub mod attachment;
pub mod folder;
pub mod message;
pub mod named_prop;
pub mod properties;
pub mod recipient;

pub(crate) mod store;

/// [EntryID](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/28029c27-171c-4ec1-9da3-0a89c327f27e):
/// a store-qualified node reference, as carried by properties like
/// `PidTagIpmSubTreeEntryId`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct EntryId {
    /// `uid`: the record key of the store the NID belongs to.
    pub(crate) uid: [u8; 16],
    pub(crate) node: NodeId,
}

impl EntryId {
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        // rgbFlags
        let flags = cursor.read_u32::<LittleEndian>()?;
        if flags != 0 {
            return Err(Error::Corrupt("EntryID rgbFlags"));
        }

        let mut uid = [0_u8; 16];
        cursor.read_exact(&mut uid)?;

        let node = NodeId::from(cursor.read_u32::<LittleEndian>()?);

        Ok(Self { uid, node })
    }
}

/// Convert a FILETIME (100ns ticks since 1601-01-01) into a UTC timestamp.
/// Zero and out-of-range values read as `None`.
pub(crate) fn filetime_to_utc(filetime: i64) -> Option<chrono::DateTime<chrono::Utc>> {
    use chrono::TimeZone;

    if filetime <= 0 {
        return None;
    }

    // Seconds between 1601-01-01 and the Unix epoch.
    const EPOCH_DELTA_SECONDS: i64 = 11_644_473_600;

    let seconds = filetime / 10_000_000 - EPOCH_DELTA_SECONDS;
    let nanos = (filetime % 10_000_000) * 100;
    chrono::Utc
        .timestamp_opt(seconds, nanos as u32)
        .single()
}
