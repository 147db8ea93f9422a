pub mod duplicates;
pub mod query;

pub use duplicates::{find_duplicates, DuplicatePair};
pub use query::{query, QueryMatch};
