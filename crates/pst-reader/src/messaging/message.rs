//! ## [Messages](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/3f16fabe-4674-4242-b125-ba4d0f0bdf51)
//!
//! A message binds a message NID's property context with the recipient and
//! attachment tables stored at well-known NIDs inside its sub-node tree,
//! and resolves the body out of the plain/HTML/RTF properties.

use chrono::{DateTime, Utc};
use std::cell::OnceCell;

use super::attachment::Attachment;
use super::properties::PropertySet;
use super::recipient::Recipient;
use super::filetime_to_utc;
use crate::ltp::prop_context::PropertyContext;
use crate::ltp::table_context::TableContext;
use crate::ndb::node_id::{NodeId, NID_ATTACHMENT_TABLE, NID_RECIPIENT_TABLE};
use crate::ndb::NodeHandle;
use crate::{Error, PstFile, Result};

/// `PidTagSubject`
const PROP_SUBJECT: u16 = 0x0037;
/// `PidTagClientSubmitTime`
const PROP_CLIENT_SUBMIT_TIME: u16 = 0x0039;
/// `PidTagSentRepresentingName`
const PROP_SENT_REPRESENTING_NAME: u16 = 0x0042;
/// `PidTagSenderName`
const PROP_SENDER_NAME: u16 = 0x0C1A;
/// `PidTagDisplayBcc`
const PROP_DISPLAY_BCC: u16 = 0x0E02;
/// `PidTagDisplayCc`
const PROP_DISPLAY_CC: u16 = 0x0E03;
/// `PidTagDisplayTo`
const PROP_DISPLAY_TO: u16 = 0x0E04;
/// `PidTagMessageDeliveryTime`
const PROP_MESSAGE_DELIVERY_TIME: u16 = 0x0E06;
/// `PidTagBody`
const PROP_BODY: u16 = 0x1000;
/// `PidTagRtfCompressed`
const PROP_RTF_COMPRESSED: u16 = 0x1009;
/// `PidTagHtml`
const PROP_BODY_HTML: u16 = 0x1013;

/// How a message body is stored.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BodyFormat {
    Plain,
    Html,
    /// RTF, already decompressed from `PidTagRtfCompressed`.
    Rtf,
}

/// A resolved message body.
pub struct Body {
    format: BodyFormat,
    bytes: Vec<u8>,
}

impl Body {
    pub fn format(&self) -> BodyFormat {
        self.format
    }

    /// The body bytes: UTF-8 for plain text, the stored octets for HTML
    /// (the store's codepage is not applied), raw RTF for RTF.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Text view for the formats with a defined character mapping.
    pub fn text(&self) -> Option<String> {
        match self.format {
            BodyFormat::Plain | BodyFormat::Rtf => {
                Some(String::from_utf8_lossy(&self.bytes).into_owned())
            }
            BodyFormat::Html => None,
        }
    }
}

pub struct Message<'f> {
    file: &'f PstFile,
    node: NodeHandle,
    node_id: NodeId,
    context: PropertyContext,
    /// Lazily opened recipient table; rows borrow it through the facade.
    recipient_table: OnceCell<Option<TableContext>>,
}

impl<'f> Message<'f> {
    pub(crate) fn open(file: &'f PstFile, node_id: NodeId) -> Result<Self> {
        let entry = file.ndb().node(node_id)?;
        Self::from_handle(file, NodeHandle::from(entry), node_id)
    }

    /// Bind a message whose node is already resolved; embedded messages
    /// arrive this way, through an attachment's sub-node tree.
    pub(crate) fn from_handle(
        file: &'f PstFile,
        node: NodeHandle,
        node_id: NodeId,
    ) -> Result<Self> {
        let context = PropertyContext::open(file.ndb(), node)?;
        Ok(Self {
            file,
            node,
            node_id,
            context,
            recipient_table: OnceCell::new(),
        })
    }

    pub fn node_id(&self) -> u32 {
        u32::from(self.node_id)
    }

    fn text_prop(&self, id: u16) -> Result<Option<String>> {
        Ok(self
            .context
            .get_id(self.file.ndb(), id)?
            .and_then(|value| value.as_text()))
    }

    fn time_prop(&self, id: u16) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .context
            .get_id(self.file.ndb(), id)?
            .and_then(|value| value.as_filetime())
            .and_then(filetime_to_utc))
    }

    /// `PidTagSubject`, with the leading prefix-length marker stripped.
    pub fn subject(&self) -> Result<String> {
        let subject = self.text_prop(PROP_SUBJECT)?.unwrap_or_default();

        // Stored subjects may open with 0x01 followed by a byte encoding
        // the length of the "RE:"-style prefix; both are presentation
        // metadata, not subject text.
        let mut chars = subject.chars();
        if chars.next() == Some('\u{1}') {
            chars.next();
            return Ok(chars.collect());
        }

        Ok(subject)
    }

    /// `PidTagSenderName`, falling back to `PidTagSentRepresentingName`.
    pub fn from(&self) -> Result<String> {
        if let Some(sender) = self.text_prop(PROP_SENDER_NAME)? {
            return Ok(sender);
        }
        Ok(self
            .text_prop(PROP_SENT_REPRESENTING_NAME)?
            .unwrap_or_default())
    }

    /// `PidTagDisplayTo`
    pub fn to(&self) -> Result<String> {
        Ok(self.text_prop(PROP_DISPLAY_TO)?.unwrap_or_default())
    }

    /// `PidTagDisplayCc`
    pub fn cc(&self) -> Result<String> {
        Ok(self.text_prop(PROP_DISPLAY_CC)?.unwrap_or_default())
    }

    /// `PidTagDisplayBcc`
    pub fn bcc(&self) -> Result<String> {
        Ok(self.text_prop(PROP_DISPLAY_BCC)?.unwrap_or_default())
    }

    /// `PidTagClientSubmitTime`
    pub fn submitted_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.time_prop(PROP_CLIENT_SUBMIT_TIME)
    }

    /// `PidTagMessageDeliveryTime`
    pub fn received_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.time_prop(PROP_MESSAGE_DELIVERY_TIME)
    }

    /// Resolve the body: plain text, then HTML, then compressed RTF.
    pub fn body(&self) -> Result<Option<Body>> {
        let ndb = self.file.ndb();

        if let Some(text) = self.text_prop(PROP_BODY)? {
            return Ok(Some(Body {
                format: BodyFormat::Plain,
                bytes: text.into_bytes(),
            }));
        }

        if let Some(value) = self.context.get_id(ndb, PROP_BODY_HTML)? {
            if let Some(bytes) = value.as_bytes() {
                return Ok(Some(Body {
                    format: BodyFormat::Html,
                    bytes: bytes.to_vec(),
                }));
            }
        }

        if let Some(value) = self.context.get_id(ndb, PROP_RTF_COMPRESSED)? {
            if let Some(compressed) = value.as_bytes() {
                let bytes = lzfu::decompress(compressed, true).map_err(|error| match error {
                    lzfu::Error::UnknownCompression(tag) => Error::UnknownCompression(tag),
                    lzfu::Error::CrcMismatch(_) => Error::Corrupt("RTF stream crc"),
                    _ => Error::Corrupt("RTF stream"),
                })?;
                return Ok(Some(Body {
                    format: BodyFormat::Rtf,
                    bytes,
                }));
            }
        }

        Ok(None)
    }

    /// Open one of the tables at a well-known NID in the message's sub-node
    /// tree; a missing table reads as `None`.
    fn sub_table(&self, node: NodeId) -> Result<Option<TableContext>> {
        let ndb = self.file.ndb();
        let handle = match ndb.subnode_handle(self.node, node) {
            Ok(handle) => handle,
            Err(Error::NotFound) => return Ok(None),
            Err(error) => return Err(error),
        };
        TableContext::open(ndb, handle).map(Some)
    }

    /// Recipient rows, in stored order.
    pub fn recipients(&self) -> Result<Vec<Recipient<'_>>> {
        if self.recipient_table.get().is_none() {
            let table = self.sub_table(NID_RECIPIENT_TABLE)?;
            let _ = self.recipient_table.set(table);
        }
        let Some(table) = self.recipient_table.get().and_then(Option::as_ref) else {
            return Ok(Vec::new());
        };

        table
            .rows(self.file.ndb())?
            .iter()
            .map(|row| Recipient::project(self.file, table, row))
            .collect()
    }

    /// Attachment objects, in stored order.
    pub fn attachments(&self) -> Result<Vec<Attachment<'f>>> {
        let Some(table) = self.sub_table(NID_ATTACHMENT_TABLE)? else {
            return Ok(Vec::new());
        };

        table
            .row_ids()?
            .into_iter()
            .map(|(row_id, _)| Attachment::open(self.file, self.node, NodeId::from(row_id)))
            .collect()
    }

    pub fn properties(&self) -> PropertySet<'_> {
        PropertySet::from_context(self.file.ndb(), &self.context)
    }
}

impl std::fmt::Debug for Message<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("node", &self.node_id)
            .finish()
    }
}
