//! Persistence: the document codec, the SQLite backend and the metadata
//! table.
//!
//! Each collection is one SQLite table:
//!
//! ```text
//! id TEXT PRIMARY KEY | data TEXT | _s_<field> TEXT ...
//! ```
//!
//! `data` holds the document as written by [DocumentCodec], plain JSON or an
//! encrypted `{_id, ciphertext, iv}` record. The `_s_` columns hold the
//! searchable mirrors.

mod codec;
mod metadata;
mod sqlite_store;

pub use codec::*;
pub use metadata::*;
pub use sqlite_store::*;
