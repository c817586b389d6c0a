use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::index::SecondaryIndex;
use crate::types::IndexedColumn;

/// The secondary indexes of one partition, at most one per column.
///
/// The set only routes to indexes: its lock guards the column map and is never held while an
/// index operation runs, callers receive an [`Arc`] to the index and release the set first.
#[derive(Debug, Default)]
pub struct PartitionIndexSet {
    indexes: RwLock<BTreeMap<IndexedColumn, Arc<SecondaryIndex>>>,
    rebuild_log_interval: Option<u64>,
}

impl PartitionIndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set whose indexes log rebuild progress every `interval` pairs.
    pub fn with_rebuild_log_interval(interval: u64) -> Self {
        Self {
            indexes: RwLock::new(BTreeMap::new()),
            rebuild_log_interval: Some(interval),
        }
    }

    /// Registers `index` for `column` unless an index is already registered for it.
    ///
    /// Returns false, leaving the set unchanged, when another index holds the column.
    pub async fn insert_if_absent(&self, column: &IndexedColumn, index: Arc<SecondaryIndex>) -> bool {
        let mut indexes = self.indexes.write().await;
        if indexes.contains_key(column) {
            return false;
        }

        indexes.insert(column.clone(), index);
        true
    }

    /// Returns true if `index` is the index currently registered for `column`.
    pub async fn is_current(&self, column: &IndexedColumn, index: &Arc<SecondaryIndex>) -> bool {
        self.indexes
            .read()
            .await
            .get(column)
            .is_some_and(|current| Arc::ptr_eq(current, index))
    }

    pub async fn get(&self, column: &IndexedColumn) -> Option<Arc<SecondaryIndex>> {
        self.indexes.read().await.get(column).cloned()
    }

    /// Removes the index of `column`, returning it if it existed.
    pub async fn remove(&self, column: &IndexedColumn) -> Option<Arc<SecondaryIndex>> {
        self.indexes.write().await.remove(column)
    }

    /// Removes the index of `column` only if it is still `index`.
    ///
    /// Used to roll back a creation without dropping an index that replaced it meanwhile.
    pub async fn remove_if_same(&self, column: &IndexedColumn, index: &Arc<SecondaryIndex>) -> bool {
        let mut indexes = self.indexes.write().await;
        match indexes.get(column) {
            Some(current) if Arc::ptr_eq(current, index) => {
                indexes.remove(column);
                true
            }
            _ => false,
        }
    }

    pub async fn contains(&self, column: &IndexedColumn) -> bool {
        self.indexes.read().await.contains_key(column)
    }

    /// Returns the indexed columns in ascending order.
    pub async fn columns(&self) -> Vec<IndexedColumn> {
        self.indexes.read().await.keys().cloned().collect()
    }

    /// Returns every index of the partition ordered by column.
    pub async fn indexes(&self) -> Vec<Arc<SecondaryIndex>> {
        self.indexes.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.indexes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.indexes.read().await.is_empty()
    }

    /// Builds an unregistered index configured like the ones this set creates.
    pub fn new_index(&self, column: IndexedColumn) -> SecondaryIndex {
        let index = SecondaryIndex::new(column);
        match self.rebuild_log_interval {
            Some(interval) => index.with_rebuild_log_interval(interval),
            None => index,
        }
    }
}
