//! Query results.
//!
//! [DocumentCursor] is returned by `find`. It runs its query lazily, and can
//! sort, paginate, populate references and project fields on the way out.

mod document_cursor;
mod population;
mod projection;

pub use document_cursor::*;
pub use population::*;
pub use projection::*;
