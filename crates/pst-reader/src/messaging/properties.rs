//! The lazy property-set view exposed on every domain entity.
//!
//! Three operations — `get`, `contains`, `enumerate` — implemented once per
//! backing source: a live Property Context, a Table Context row, or cells
//! already materialized from a row.

use crate::ltp::prop::{PropertyTag, PropertyValue};
use crate::ltp::prop_context::PropertyContext;
use crate::ltp::table_context::{TableContext, TableRow};
use crate::ndb::Ndb;
use crate::{Error, Result};

/// A read-only map from property tag to decoded value.
pub trait PropertySource {
    fn get(&self, tag: PropertyTag) -> Result<Option<PropertyValue>>;

    fn contains(&self, tag: PropertyTag) -> Result<bool> {
        Ok(self.get(tag)?.is_some())
    }

    /// All properties in ascending tag order. Entries whose values fail to
    /// decode carry the per-entry error instead of aborting the walk.
    fn enumerate(&self) -> Result<Vec<(PropertyTag, Result<PropertyValue>)>>;
}

enum Source<'a> {
    Context {
        ndb: &'a Ndb,
        context: &'a PropertyContext,
    },
    TableRow {
        ndb: &'a Ndb,
        table: &'a TableContext,
        row_id: u32,
    },
}

/// The property set of one domain entity.
pub struct PropertySet<'a> {
    source: Source<'a>,
}

impl<'a> PropertySet<'a> {
    pub(crate) fn from_context(ndb: &'a Ndb, context: &'a PropertyContext) -> Self {
        Self {
            source: Source::Context { ndb, context },
        }
    }

    pub(crate) fn from_table_row(ndb: &'a Ndb, table: &'a TableContext, row_id: u32) -> Self {
        Self {
            source: Source::TableRow { ndb, table, row_id },
        }
    }

    /// Look up by property id alone, decoding with the stored type.
    pub fn get_id(&self, id: u16) -> Result<Option<PropertyValue>> {
        match &self.source {
            Source::Context { ndb, context } => context.get_id(ndb, id),
            Source::TableRow { ndb, table, row_id } => table.cell_by_id(ndb, *row_id, id),
        }
    }
}

impl PropertySource for PropertySet<'_> {
    fn get(&self, tag: PropertyTag) -> Result<Option<PropertyValue>> {
        match &self.source {
            Source::Context { ndb, context } => context.get(ndb, tag),
            Source::TableRow { ndb, table, row_id } => {
                Ok(table.cell_by_id(ndb, *row_id, tag.id)?.filter(|_| {
                    table
                        .columns()
                        .iter()
                        .any(|column| column.tag == tag)
                }))
            }
        }
    }

    fn enumerate(&self) -> Result<Vec<(PropertyTag, Result<PropertyValue>)>> {
        match &self.source {
            Source::Context { ndb, context } => context.enumerate(ndb),
            Source::TableRow { ndb, table, row_id } => {
                let row: TableRow = table.row(ndb, *row_id).map_err(|error| match error {
                    Error::NotFound => Error::Corrupt("row vanished from its table"),
                    other => other,
                })?;
                Ok(table.enumerate_row(ndb, &row))
            }
        }
    }
}
