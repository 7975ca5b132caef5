//! # docstore - Embedded JSON document store over SQLite
//!
//! docstore keeps schemaless JSON documents in SQLite tables and queries them
//! with MongoDB-style criteria.
//!
//! ## Key Features
//!
//! - **Criteria**: `$eq`, `$gte`, `$in`, `$regex`, `$fuzzy`, `$and`/`$or` and more,
//!   written as documents or with the fluent `field("age").gte(18)` API
//! - **SQL first**: criteria SQLite can answer become native WHERE fragments;
//!   the rest is evaluated per row through a registered SQL function
//! - **Encryption**: AES-256-GCM per document, database-wide or per collection
//! - **Searchable mirrors**: lower-cased (optionally hashed) copies of chosen
//!   fields in sibling columns, queryable even when documents are encrypted
//! - **Pipelines**: schema validation, lifecycle hooks, id generation, soft
//!   delete and a per-collection change version
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docstore::{doc, DocStore};
//! use docstore::common::SortOrder;
//! use docstore::filter::field;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = DocStore::builder().open("app.db")?;
//! let users = db.collection("users")?;
//!
//! users.insert(doc!{ "name": "Ann", "age": 30 })?;
//! users.insert(doc!{ "name": "Bo", "age": 17 })?;
//!
//! let adults = users
//!     .find(field("age").gte(18))?
//!     .sort("name", SortOrder::Ascending)
//!     .to_array()?;
//! assert_eq!(adults.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`collection`] - Documents, collections and their write pipelines
//! - [`common`] - Values, constants and key handling
//! - [`cursor`] - Lazy query results, population and projection
//! - [`errors`] - Error types and result definitions
//! - [`filter`] - Criteria and the in-process matcher
//! - [`index`] - Searchable-field mirrors
//! - [`query`] - SQL translation and the fallback predicate registry
//! - [`store`] - Codec, SQLite backend and metadata table
//! - [`docstore`] - The database handle
//! - [`docstore_builder`] - Builder for opening a database
//! - [`docstore_config`] - Database-wide configuration

pub mod collection;
pub mod common;
pub mod cursor;
pub mod docstore;
pub mod docstore_builder;
pub mod docstore_config;
pub mod errors;
pub mod filter;
pub mod index;
pub mod query;
pub mod store;

pub use crate::docstore::DocStore;
pub use docstore_builder::DocStoreBuilder;
pub use docstore_config::DocStoreConfig;
