//! Searchable-field mirrors.
//!
//! Fields marked searchable get a sibling column (`_s_<field>`) holding a
//! lower-cased, optionally hashed copy of the field value. The column is a
//! cache derived from the document and can always be rebuilt from it.

mod searchable;

pub use searchable::*;
