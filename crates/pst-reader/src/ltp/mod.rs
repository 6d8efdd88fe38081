//! ## [Lists, Tables, and Properties (LTP) Layer](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/4c24c7d2-5c5a-4b99-88b2-f4b84cc293ae)
//!
//! Structured readers over NDB byte streams: the Heap-on-Node, the
//! BTree-on-Heap, and the Property/Table Contexts built from them.

pub mod prop;

pub(crate) mod heap;
pub(crate) mod prop_context;
pub(crate) mod table_context;
pub(crate) mod tree;
