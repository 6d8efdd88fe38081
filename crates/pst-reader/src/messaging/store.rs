//! ## [Message Store](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/aa0539bd-e7bf-4cec-8bde-0b87c2a86baf)
//!
//! The store node's property context, read once on open, and the password
//! gate that runs before any user-visible access.

use std::collections::BTreeMap;

use super::EntryId;
use crate::crc::compute_crc;
use crate::ltp::prop::{PropertyType, PropertyValue};
use crate::ltp::prop_context::PropertyContext;
use crate::ndb::node_id::{NodeId, NID_MESSAGE_STORE};
use crate::ndb::{Ndb, NodeHandle};
use crate::{Error, Result};

/// `PidTagDisplayName`
const PROP_DISPLAY_NAME: u16 = 0x3001;
/// `PidTagIpmSubTreeEntryId`
const PROP_IPM_SUBTREE_ENTRY_ID: u16 = 0x35E0;
/// `PidTagRecordKey`
const PROP_RECORD_KEY: u16 = 0x0FF9;
/// `PidTagPstPassword`: the CRC of the store password.
const PROP_PST_PASSWORD: u16 = 0x67FF;

pub(crate) struct Store {
    properties: BTreeMap<u16, (PropertyType, PropertyValue)>,
    context: PropertyContext,
}

impl Store {
    /// Read the message-store PC at its well-known NID.
    pub(crate) fn read(ndb: &Ndb) -> Result<Self> {
        let node = ndb.node(NID_MESSAGE_STORE)?;
        let context = PropertyContext::open(ndb, NodeHandle::from(node))?;

        let mut properties = BTreeMap::new();
        for (tag, value) in context.enumerate(ndb)? {
            // Decode failures were warned about during enumeration; the
            // store stays usable without those properties.
            if let Ok(value) = value {
                properties.insert(tag.id, (tag.kind, value));
            }
        }

        Ok(Self {
            properties,
            context,
        })
    }

    pub(crate) fn context(&self) -> &PropertyContext {
        &self.context
    }

    pub(crate) fn get(&self, id: u16) -> Option<&PropertyValue> {
        self.properties.get(&id).map(|(_, value)| value)
    }

    pub(crate) fn display_name(&self) -> Option<String> {
        self.get(PROP_DISPLAY_NAME)?.as_text()
    }

    pub(crate) fn record_key(&self) -> Option<&[u8]> {
        self.get(PROP_RECORD_KEY)?.as_bytes()
    }

    /// The NID of the top-of-information-store folder, resolved through
    /// `PidTagIpmSubTreeEntryId`.
    pub(crate) fn ipm_subtree_node(&self) -> Result<NodeId> {
        let value = self
            .get(PROP_IPM_SUBTREE_ENTRY_ID)
            .ok_or(Error::NotFound)?;
        let bytes = value.as_bytes().ok_or(Error::Corrupt("PidTagIpmSubTreeEntryId"))?;
        let entry_id = EntryId::parse(bytes)?;

        if let Some(record_key) = self.record_key() {
            if record_key != entry_id.uid {
                log::warn!("[pst] PidTagIpmSubTreeEntryId names a different store");
                return Err(Error::NotFound);
            }
        }

        Ok(entry_id.node)
    }

    /// Run the password gate.
    ///
    /// An absent or zero `PidTagPstPassword` means the store is unlocked.
    /// Otherwise the stored value is the CRC of the password text in one of
    /// the historical encodings; any grid hit unlocks.
    pub(crate) fn check_password(&self, password: Option<&str>) -> Result<()> {
        let stored = match self.get(PROP_PST_PASSWORD) {
            None => return Ok(()),
            Some(PropertyValue::Integer32(0)) => return Ok(()),
            Some(PropertyValue::Integer32(stored)) => *stored as u32,
            Some(_) => return Err(Error::Corrupt("PidTagPstPassword type")),
        };

        match password {
            None => Err(Error::PasswordRequired),
            Some(password) if password_matches(stored, password) => Ok(()),
            Some(_) => Err(Error::PasswordIncorrect),
        }
    }
}

#[derive(Clone, Copy)]
enum PasswordEncoding {
    Utf16Le,
    Utf8,
    Ascii,
}

/// Every encoding historically used to hash store passwords, each tried
/// with and without a trailing NUL.
const PASSWORD_CANDIDATES: [(PasswordEncoding, bool); 6] = [
    (PasswordEncoding::Utf16Le, true),
    (PasswordEncoding::Utf16Le, false),
    (PasswordEncoding::Utf8, true),
    (PasswordEncoding::Utf8, false),
    (PasswordEncoding::Ascii, true),
    (PasswordEncoding::Ascii, false),
];

fn encode_password(
    password: &str,
    encoding: PasswordEncoding,
    trailing_nul: bool,
) -> Option<Vec<u8>> {
    let mut bytes = match encoding {
        PasswordEncoding::Utf16Le => password
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect::<Vec<u8>>(),
        PasswordEncoding::Utf8 => password.as_bytes().to_vec(),
        PasswordEncoding::Ascii => {
            if !password.is_ascii() {
                return None;
            }
            password.as_bytes().to_vec()
        }
    };

    if trailing_nul {
        match encoding {
            PasswordEncoding::Utf16Le => bytes.extend_from_slice(&[0, 0]),
            _ => bytes.push(0),
        }
    }

    Some(bytes)
}

/// `true` when `password` hashes to `stored` under any candidate encoding,
/// as typed or uppercased (the uppercase form is only tried when it
/// differs).
pub(crate) fn password_matches(stored: u32, password: &str) -> bool {
    let mut forms = vec![password.to_string()];
    let upper = password.to_uppercase();
    if upper != password {
        forms.push(upper);
    }

    forms.iter().any(|form| {
        PASSWORD_CANDIDATES.iter().any(|(encoding, trailing_nul)| {
            encode_password(form, *encoding, *trailing_nul)
                .is_some_and(|bytes| compute_crc(0, &bytes) == stored)
        })
    })
}
