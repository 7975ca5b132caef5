//! Criteria to SQL translation and the fallback predicate registry.
//!
//! Flat, range-style criteria become native WHERE fragments that SQLite can
//! answer from indexes. Everything else is registered with the
//! [PredicateRegistry] and evaluated row by row through the
//! `docstore_match(token, data)` SQL function.

mod registry;
mod translator;

pub use registry::*;
pub use translator::*;
