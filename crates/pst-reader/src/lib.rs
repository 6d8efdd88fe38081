//! Read-only reader for Outlook personal-storage (PST) and offline-storage
//! (OST) files.
//!
//! The file's two on-disk layers — the Node Database (paged blocks and the
//! NBT/BBT B-trees) and the List/Table/Property layer (heaps, trees, and
//! contexts over node streams) — stay internal; the public surface is the
//! message store they serialize: folders, messages, recipients,
//! attachments, bodies, and per-entity property sets.
//!
//! ```no_run
//! use pst_reader::PstFile;
//!
//! # fn main() -> pst_reader::Result<()> {
//! let pst = PstFile::open("inbox.pst", None)?;
//! for folder in pst.root_folder()?.folders()? {
//!     println!("{} ({})", folder.path(), folder.message_count()?);
//!     for message in folder.messages()? {
//!         println!("  {}", message.subject()?);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::fs::File;
use std::path::Path;

mod crc;
mod error;
mod io;

pub mod ltp;
pub mod messaging;
pub mod ndb;

#[cfg(test)]
mod testkit;

pub use error::{Error, Result};
pub use io::ByteSource;
pub use ltp::prop::{PropertyTag, PropertyType, PropertyValue};
pub use messaging::attachment::Attachment;
pub use messaging::folder::Folder;
pub use messaging::message::{Body, BodyFormat, Message};
pub use messaging::named_prop::{NamedProperty, NamedPropertyId};
pub use messaging::properties::{PropertySet, PropertySource};
pub use messaging::recipient::{Recipient, RecipientKind};
pub use ndb::header::FileVariant;

use messaging::named_prop::NamedPropertyMap;
use messaging::store::Store;
use ndb::header::Header;
use ndb::node_id::NID_ROOT_FOLDER;
use ndb::Ndb;

/// An open PST/OST file: the root handle every domain entity borrows from.
///
/// Entities are created lazily on traversal and hold a reference back to
/// their file; disposing the file (`close`) invalidates them all at once.
pub struct PstFile {
    ndb: Ndb,
    store: Store,
}

impl PstFile {
    /// Open the file at `path`, validating the password gate before
    /// anything else becomes reachable.
    ///
    /// The gate's verdict is final for this handle: a wrong password fails
    /// with [`Error::PasswordIncorrect`] and a second attempt requires a
    /// fresh `open`.
    pub fn open(path: impl AsRef<Path>, password: Option<&str>) -> Result<Self> {
        Self::open_source(Box::new(File::open(path)?), password)
    }

    /// Open from any read-only seekable byte source.
    pub fn open_source(source: Box<dyn ByteSource>, password: Option<&str>) -> Result<Self> {
        let reader = io::PagedReader::new(source)?;
        let header = Header::read(&reader)?;
        let ndb = Ndb::new(reader, header);

        let store = Store::read(&ndb)?;
        store.check_password(password)?;

        Ok(Self { ndb, store })
    }

    pub(crate) fn ndb(&self) -> &Ndb {
        &self.ndb
    }

    pub fn variant(&self) -> FileVariant {
        self.ndb.variant()
    }

    /// Total file size recorded in the header.
    pub fn size(&self) -> u64 {
        self.ndb.file_size()
    }

    /// `PidTagDisplayName` of the store itself.
    pub fn display_name(&self) -> Option<String> {
        self.store.display_name()
    }

    /// The root mailbox folder (`NID_ROOT_FOLDER`).
    pub fn root_folder(&self) -> Result<Folder<'_>> {
        Folder::open(self, NID_ROOT_FOLDER, "")
    }

    /// The top-of-information-store folder, resolved through the store's
    /// `PidTagIpmSubTreeEntryId`. This is the subtree mail clients show.
    pub fn ipm_subtree(&self) -> Result<Folder<'_>> {
        Folder::open(self, self.store.ipm_subtree_node()?, "")
    }

    /// The store node's own property set.
    pub fn properties(&self) -> PropertySet<'_> {
        PropertySet::from_context(&self.ndb, self.store.context())
    }

    /// Resolve a named property id (≥ 0x8000) through the name-to-id map.
    pub fn named_property(&self, property_id: u16) -> Result<Option<NamedProperty>> {
        NamedPropertyMap::read(&self.ndb)?.resolve(property_id)
    }

    /// Release the backing file. Every outstanding handle derived from this
    /// file fails with [`Error::Disposed`] afterwards.
    pub fn close(&self) {
        self.ndb.close();
    }
}
