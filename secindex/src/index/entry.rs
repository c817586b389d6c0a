use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::collections::btree_set;
use std::ops::Bound;

use crate::types::ByteKey;

/// One distinct indexed value and the primary keys of every row holding it.
///
/// Entries are identified by their value alone: two entries with the same value compare equal
/// regardless of their primary keys. Primary keys are kept in ascending byte order.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    value: ByteKey,
    primary_keys: BTreeSet<ByteKey>,
}

impl IndexEntry {
    pub fn new(value: ByteKey) -> Self {
        Self {
            value,
            primary_keys: BTreeSet::new(),
        }
    }

    pub fn value(&self) -> &ByteKey {
        &self.value
    }

    pub fn primary_keys(&self) -> &BTreeSet<ByteKey> {
        &self.primary_keys
    }

    /// Adds a primary key, returning false if it was already present.
    pub fn insert(&mut self, primary_key: ByteKey) -> bool {
        self.primary_keys.insert(primary_key)
    }

    /// Removes a primary key, returning false if it was not present.
    pub fn remove(&mut self, primary_key: &[u8]) -> bool {
        self.primary_keys.remove(primary_key)
    }

    pub fn len(&self) -> usize {
        self.primary_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary_keys.is_empty()
    }

    /// Partitions the primary keys around `split_key`.
    ///
    /// The first iterator yields the keys ordered strictly before `split_key`, the second the
    /// remaining ones, `split_key` itself included. Both halves are located by a logarithmic
    /// search in the ordered key set.
    pub fn split_at(
        &self,
        split_key: &[u8],
    ) -> (btree_set::Range<'_, ByteKey>, btree_set::Range<'_, ByteKey>) {
        let before = self
            .primary_keys
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(split_key)));
        let from = self
            .primary_keys
            .range::<[u8], _>((Bound::Included(split_key), Bound::Unbounded));

        (before, from)
    }
}

impl PartialEq for IndexEntry {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for IndexEntry {}

impl PartialOrd for IndexEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}
