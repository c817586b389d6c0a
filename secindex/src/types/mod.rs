mod column;
mod key;
mod predicate;

pub use column::{IndexedColumn, PartitionId};
pub use key::ByteKey;
pub use predicate::{Criterion, IndexedQuery, Predicate};
