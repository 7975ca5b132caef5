//! Query criteria and the in-process predicate matcher.
//!
//! Criteria are built from a MongoDB-style document or with the fluent API:
//! - `field("age").gte(18)` - comparison operators
//! - `field("tags").has("admin")` - array membership
//! - `or(vec![..])`, `and(vec![..])`, `where_fn(|doc| ..)` - combinators
//!
//! ```rust,ignore
//! use docstore::doc;
//! use docstore::filter::{field, Criteria};
//!
//! let adults = Criteria::parse(&doc!{ "age": { "$gte": 18 } })?;
//! assert!(adults.matches(&doc!{ "age": 30 }));
//! ```
//!
//! # Supported Operators
//!
//! - **Equality**: bare value (loose), `$eq`, `$ne` (strict)
//! - **Comparison**: `$gt`, `$gte`, `$lt`, `$lte`
//! - **Array**: `$in`, `$nin`, `$has`, `$all`, `$size`
//! - **Pattern**: `$regex` (`$preg`, `$match`), `$not`, `$fuzzy` (`$text`)
//! - **Other**: `$mod`, `$exists`, `$func` (`$fn`, `$f`, builder only)
//! - **Logical**: `$and`, `$or`, `$where` (builder only)

mod criteria;
mod fluent;
mod fuzzy;
mod matcher;
mod pattern;

pub use criteria::*;
pub use fluent::*;
pub use fuzzy::*;
pub use matcher::*;
pub use pattern::*;
