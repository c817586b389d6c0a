//! In-memory secondary indexes and their per-partition grouping.

mod entry;
mod partition;
mod secondary_index;

pub use entry::IndexEntry;
pub use partition::PartitionIndexSet;
pub use secondary_index::{IndexStats, RebuildGuard, SecondaryIndex, SplitOutcome};
