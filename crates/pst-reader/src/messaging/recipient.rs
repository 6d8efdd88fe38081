//! Recipient rows, projected from a message's recipient table.
//!
//! Recipients carry no sub-node detail of their own; a recipient is its
//! table row, with the headline fields decoded up front and the rest
//! reachable through the row-backed property set.

use super::properties::PropertySet;
use crate::ltp::table_context::{TableContext, TableRow};
use crate::{PstFile, Result};

/// `PidTagRecipientType`
const PROP_RECIPIENT_TYPE: u16 = 0x0C15;
/// `PidTagDisplayName`
const PROP_DISPLAY_NAME: u16 = 0x3001;
/// `PidTagEmailAddress`
const PROP_EMAIL_ADDRESS: u16 = 0x3003;
/// `PidTagSmtpAddress`
const PROP_SMTP_ADDRESS: u16 = 0x39FE;

/// `PidTagRecipientType` values.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RecipientKind {
    To,
    Cc,
    Bcc,
    /// A value outside the defined set, kept verbatim.
    Other(i32),
}

impl From<i32> for RecipientKind {
    fn from(value: i32) -> Self {
        match value {
            1 => RecipientKind::To,
            2 => RecipientKind::Cc,
            3 => RecipientKind::Bcc,
            other => RecipientKind::Other(other),
        }
    }
}

pub struct Recipient<'m> {
    file: &'m PstFile,
    table: &'m TableContext,
    row_id: u32,
    display_name: String,
    email_address: String,
    kind: RecipientKind,
}

impl<'m> Recipient<'m> {
    pub(crate) fn project(
        file: &'m PstFile,
        table: &'m TableContext,
        row: &TableRow,
    ) -> Result<Self> {
        let ndb = file.ndb();

        let text_cell = |id: u16| -> Result<Option<String>> {
            Ok(table
                .cell_by_id(ndb, row.id, id)?
                .and_then(|value| value.as_text()))
        };

        let display_name = text_cell(PROP_DISPLAY_NAME)?.unwrap_or_default();
        let email_address = match text_cell(PROP_EMAIL_ADDRESS)? {
            Some(address) => address,
            None => text_cell(PROP_SMTP_ADDRESS)?.unwrap_or_default(),
        };
        let kind = table
            .cell_by_id(ndb, row.id, PROP_RECIPIENT_TYPE)?
            .and_then(|value| value.as_i32())
            .map(RecipientKind::from)
            .unwrap_or(RecipientKind::Other(0));

        Ok(Self {
            file,
            table,
            row_id: row.id,
            display_name,
            email_address,
            kind,
        })
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn email_address(&self) -> &str {
        &self.email_address
    }

    pub fn kind(&self) -> RecipientKind {
        self.kind
    }

    /// The recipient's full table row as a property set.
    pub fn properties(&self) -> PropertySet<'_> {
        PropertySet::from_table_row(self.file.ndb(), self.table, self.row_id)
    }
}
