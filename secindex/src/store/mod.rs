//! Access to the partitioned key-value store that indexes are built from.

mod base;
mod memory;

pub use base::{PartitionStore, ScannedCell};
pub use memory::{MemoryStore, PartitionState};
