//! ## [Attachment Objects](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/46eb4828-c6a5-420d-a137-9ee36df317c1)
//!
//! An attachment row's id is a sub-NID inside the owning message's sub-node
//! tree; the node behind it carries the attachment's own property context,
//! whose `PidTagAttachDataBinary` resolves to raw bytes or to a recursively
//! embedded message.

use super::message::Message;
use super::properties::PropertySet;
use crate::ltp::prop::PropertyValue;
use crate::ltp::prop_context::PropertyContext;
use crate::ndb::node_id::NodeId;
use crate::ndb::NodeHandle;
use crate::{Error, PstFile, Result};

/// `PidTagAttachSize`
const PROP_ATTACH_SIZE: u16 = 0x0E20;
/// `PidTagAttachDataBinary` / `PidTagAttachDataObject`
const PROP_ATTACH_DATA: u16 = 0x3701;
/// `PidTagAttachFilename`
const PROP_ATTACH_FILENAME: u16 = 0x3704;
/// `PidTagAttachMethod`
const PROP_ATTACH_METHOD: u16 = 0x3705;
/// `PidTagAttachLongFilename`
const PROP_ATTACH_LONG_FILENAME: u16 = 0x3707;
/// `PidTagAttachMimeTag`
const PROP_ATTACH_MIME_TAG: u16 = 0x370E;

/// `afEmbeddedMessage`
const METHOD_EMBEDDED_MESSAGE: i32 = 5;

pub struct Attachment<'f> {
    file: &'f PstFile,
    /// The attachment node's bindings; embedded content hangs off its
    /// sub-node tree.
    node: NodeHandle,
    context: PropertyContext,
}

impl<'f> Attachment<'f> {
    /// Resolve attachment `node` through the owning message's sub-node
    /// tree.
    pub(crate) fn open(file: &'f PstFile, message: NodeHandle, node: NodeId) -> Result<Self> {
        let ndb = file.ndb();
        let handle = ndb.subnode_handle(message, node)?;
        let context = PropertyContext::open(ndb, handle)?;

        Ok(Self {
            file,
            node: handle,
            context,
        })
    }

    fn text_prop(&self, id: u16) -> Result<Option<String>> {
        Ok(self
            .context
            .get_id(self.file.ndb(), id)?
            .and_then(|value| value.as_text()))
    }

    /// `PidTagAttachLongFilename`, falling back to the 8.3
    /// `PidTagAttachFilename`.
    pub fn filename(&self) -> Result<String> {
        if let Some(name) = self.text_prop(PROP_ATTACH_LONG_FILENAME)? {
            return Ok(name);
        }
        Ok(self.text_prop(PROP_ATTACH_FILENAME)?.unwrap_or_default())
    }

    /// `PidTagAttachMimeTag`
    pub fn mime_type(&self) -> Result<Option<String>> {
        self.text_prop(PROP_ATTACH_MIME_TAG)
    }

    /// `PidTagAttachSize`: the total size Outlook accounts to the
    /// attachment, metadata included.
    pub fn size(&self) -> Result<Option<i32>> {
        Ok(self
            .context
            .get_id(self.file.ndb(), PROP_ATTACH_SIZE)?
            .and_then(|value| value.as_i32()))
    }

    /// `PidTagAttachMethod`
    pub fn method(&self) -> Result<Option<i32>> {
        Ok(self
            .context
            .get_id(self.file.ndb(), PROP_ATTACH_METHOD)?
            .and_then(|value| value.as_i32()))
    }

    /// The attachment payload, when it is stored as raw bytes.
    pub fn bytes(&self) -> Result<Option<Vec<u8>>> {
        match self.context.get_id(self.file.ndb(), PROP_ATTACH_DATA)? {
            Some(PropertyValue::Binary(bytes)) => Ok(Some(bytes)),
            _ => Ok(None),
        }
    }

    /// The embedded message, when `PidTagAttachMethod` says the payload is
    /// one.
    pub fn embedded_message(&self) -> Result<Option<Message<'f>>> {
        if self.method()? != Some(METHOD_EMBEDDED_MESSAGE) {
            return Ok(None);
        }

        let Some(PropertyValue::Object { node, .. }) =
            self.context.get_id(self.file.ndb(), PROP_ATTACH_DATA)?
        else {
            return Err(Error::Corrupt("PidTagAttachDataObject"));
        };

        let handle = self.file.ndb().subnode_handle(self.node, node)?;
        Message::from_handle(self.file, handle, node).map(Some)
    }

    pub fn properties(&self) -> PropertySet<'_> {
        PropertySet::from_context(self.file.ndb(), &self.context)
    }
}
