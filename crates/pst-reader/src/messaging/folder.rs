//! ## [Folders](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/dee5b9d0-5513-4c5e-94aa-8bd28a9350b2)
//!
//! A folder binds one folder NID's property context with the hierarchy,
//! contents, and FAI contents tables stored under the sibling NID types at
//! the same index.

use super::message::Message;
use super::properties::PropertySet;
use crate::ltp::prop_context::PropertyContext;
use crate::ltp::table_context::TableContext;
use crate::ndb::node_id::{NodeId, NodeIdType};
use crate::ndb::NodeHandle;
use crate::{Error, PstFile, Result};

/// `PidTagDisplayName`
const PROP_DISPLAY_NAME: u16 = 0x3001;
/// `PidTagContentCount`
const PROP_CONTENT_COUNT: u16 = 0x3602;
/// `PidTagContentUnreadCount`
const PROP_CONTENT_UNREAD_COUNT: u16 = 0x3603;
/// `PidTagSubfolders`
const PROP_SUBFOLDERS: u16 = 0x360A;

pub struct Folder<'f> {
    file: &'f PstFile,
    node: NodeId,
    path: String,
    context: PropertyContext,
}

impl<'f> Folder<'f> {
    pub(crate) fn open(file: &'f PstFile, node: NodeId, parent_path: &str) -> Result<Self> {
        match node.id_type()? {
            NodeIdType::NormalFolder | NodeIdType::SearchFolder => {}
            _ => return Err(Error::Corrupt("folder NID type")),
        }

        let ndb = file.ndb();
        let entry = ndb.node(node)?;
        log::debug!(
            "[pst] opening folder {:?} under parent {:?}",
            entry.node,
            entry.parent,
        );
        let context = PropertyContext::open(ndb, NodeHandle::from(entry))?;

        let mut folder = Self {
            file,
            node,
            path: String::new(),
            context,
        };

        let name = folder.display_name()?;
        folder.path = if parent_path.is_empty() {
            "/".to_string()
        } else if parent_path == "/" {
            format!("/{name}")
        } else {
            format!("{parent_path}/{name}")
        };

        Ok(folder)
    }

    pub fn node_id(&self) -> u32 {
        u32::from(self.node)
    }

    /// `PidTagDisplayName`; the root folder typically has none and reads as
    /// an empty string.
    pub fn display_name(&self) -> Result<String> {
        Ok(self
            .context
            .get_id(self.file.ndb(), PROP_DISPLAY_NAME)?
            .and_then(|value| value.as_text())
            .unwrap_or_default())
    }

    /// Slash-separated path from the traversal root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `PidTagContentCount`
    pub fn message_count(&self) -> Result<i32> {
        Ok(self
            .context
            .get_id(self.file.ndb(), PROP_CONTENT_COUNT)?
            .and_then(|value| value.as_i32())
            .unwrap_or_default())
    }

    /// `PidTagContentUnreadCount`
    pub fn unread_count(&self) -> Result<i32> {
        Ok(self
            .context
            .get_id(self.file.ndb(), PROP_CONTENT_UNREAD_COUNT)?
            .and_then(|value| value.as_i32())
            .unwrap_or_default())
    }

    /// `PidTagSubfolders`
    pub fn has_subfolders(&self) -> Result<bool> {
        Ok(self
            .context
            .get_id(self.file.ndb(), PROP_SUBFOLDERS)?
            .and_then(|value| value.as_bool())
            .unwrap_or_default())
    }

    /// Open one of the folder's sibling tables; a table node that does not
    /// exist reads as `None`.
    fn sibling_table(&self, id_type: NodeIdType) -> Result<Option<TableContext>> {
        let ndb = self.file.ndb();
        let node = NodeId::new(id_type, self.node.index())?;
        let entry = match ndb.node(node) {
            Ok(entry) => entry,
            Err(Error::NotFound) => return Ok(None),
            Err(error) => return Err(error),
        };
        TableContext::open(ndb, NodeHandle::from(entry)).map(Some)
    }

    /// Child folders, in hierarchy-table order.
    pub fn folders(&self) -> Result<Vec<Folder<'f>>> {
        let Some(table) = self.sibling_table(NodeIdType::HierarchyTable)? else {
            return Ok(Vec::new());
        };

        table
            .row_ids()?
            .into_iter()
            .map(|(row_id, _)| Folder::open(self.file, NodeId::from(row_id), &self.path))
            .collect()
    }

    /// Messages, in contents-table order.
    pub fn messages(&self) -> Result<Vec<Message<'f>>> {
        let Some(table) = self.sibling_table(NodeIdType::ContentsTable)? else {
            return Ok(Vec::new());
        };

        table
            .row_ids()?
            .into_iter()
            .map(|(row_id, _)| Message::open(self.file, NodeId::from(row_id)))
            .collect()
    }

    /// Number of folder-associated (FAI) objects.
    pub fn associated_count(&self) -> Result<usize> {
        match self.sibling_table(NodeIdType::AssociatedContentsTable)? {
            Some(table) => table.row_count(),
            None => Ok(0),
        }
    }

    pub fn properties(&self) -> PropertySet<'_> {
        PropertySet::from_context(self.file.ndb(), &self.context)
    }
}
