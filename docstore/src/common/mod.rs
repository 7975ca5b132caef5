mod constants;
mod security;
mod sort_order;
mod value;

pub use constants::*;
pub use security::*;
pub use sort_order::*;
pub use value::*;
