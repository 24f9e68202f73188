pub mod accounting;
pub mod errors;
pub mod flatten;
pub mod model;
pub mod query;

pub use accounting::*;
pub use errors::*;
pub use flatten::{flatten, validate_source};
pub use model::*;
pub use query::{compile, Predicate};
