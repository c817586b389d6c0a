//! In-memory secondary indexes for a partitioned key-value store.
//!
//! Each partition of the store may index any number of columns. A [`index::SecondaryIndex`]
//! maps the values stored in one column to the primary keys of the rows holding them and
//! answers equality, greater-than, less-than and inclusive range predicates. Indexes are built
//! by scanning the partition through a [`store::PartitionStore`], kept current by mutation
//! hooks, and split alongside their partition. [`service::IndexService`] is the entry point
//! that request handlers and partition lifecycle events call into.

mod macros;

pub mod error;
pub mod failpoints;
pub mod index;
pub mod registry;
pub mod service;
pub mod store;
pub mod types;
