//! Collections and documents.
//!
//! A [DocStoreCollection] stores schemaless [Document]s in one SQLite table
//! and runs every write through the same pipeline:
//!
//! 1. schema validation ([Schema])
//! 2. before-hooks, which may rewrite or cancel ([HookChain])
//! 3. `_id` assignment ([IdMode], [IdDecoration])
//! 4. encoding and searchable mirrors
//! 5. one transaction, one change-version bump
//! 6. after-hooks
//!
//! ```rust,ignore
//! use docstore::doc;
//! use docstore::collection::{HookOutcome, IdMode};
//!
//! let users = db.collection("users")?;
//! users.set_id_mode(IdMode::Prefix { prefix: "USR".into() })?;
//! users.on_before_insert(|doc| {
//!     Ok(if doc.contains_key("banned") { HookOutcome::Cancel } else { HookOutcome::Continue })
//! });
//!
//! let result = users.insert(doc!{ "name": "Ann" })?;
//! assert_eq!(result.first_id(), Some("USR-000001"));
//! ```
//!
//! # Soft delete
//!
//! With soft delete enabled, `remove` stamps the deletion field (default
//! `_deleted_at`) with the current time instead of deleting. Queries skip
//! stamped documents unless the cursor asks for them with `with_trashed` or
//! `only_trashed`. `restore` clears the stamp and `force_delete` removes
//! documents for good.

mod config;
mod document;
mod docstore_collection;
mod hooks;
mod id_generator;
pub(crate) mod operation;
mod schema;

pub use config::*;
pub use document::*;
pub use docstore_collection::*;
pub use hooks::*;
pub use id_generator::*;
pub use operation::WriteResult;
pub use schema::*;
