use std::collections::HashMap;
use std::sync::Arc;

use config::shared::IndexConfig;
use tokio::sync::RwLock;

use crate::index::PartitionIndexSet;
use crate::types::PartitionId;

/// Process-wide map from partition to its [`PartitionIndexSet`].
///
/// One registry is built at startup and handed to whoever serves index requests; clones share
/// the same map. Sets are created on the first index creation of a partition and dropped when
/// the partition closes or splits.
#[derive(Debug, Clone)]
pub struct IndexRegistry {
    partitions: Arc<RwLock<HashMap<PartitionId, Arc<PartitionIndexSet>>>>,
    rebuild_log_interval: u64,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::with_rebuild_log_interval(IndexConfig::DEFAULT_REBUILD_LOG_INTERVAL)
    }

    /// Creates a registry whose indexes log rebuild progress every `interval` pairs.
    pub fn with_rebuild_log_interval(interval: u64) -> Self {
        Self {
            partitions: Arc::new(RwLock::new(HashMap::new())),
            rebuild_log_interval: interval,
        }
    }

    pub async fn get(&self, partition: &PartitionId) -> Option<Arc<PartitionIndexSet>> {
        self.partitions.read().await.get(partition).cloned()
    }

    /// Returns the set of `partition`, registering an empty one if needed.
    pub async fn get_or_create(&self, partition: &PartitionId) -> Arc<PartitionIndexSet> {
        if let Some(set) = self.partitions.read().await.get(partition) {
            return set.clone();
        }

        self.partitions
            .write()
            .await
            .entry(partition.clone())
            .or_insert_with(|| Arc::new(self.new_set()))
            .clone()
    }

    /// Builds an unregistered set configured like the ones this registry creates.
    pub fn new_set(&self) -> PartitionIndexSet {
        PartitionIndexSet::with_rebuild_log_interval(self.rebuild_log_interval)
    }

    /// Registers `set` for `partition`, returning the set it replaced.
    pub async fn insert(
        &self,
        partition: PartitionId,
        set: Arc<PartitionIndexSet>,
    ) -> Option<Arc<PartitionIndexSet>> {
        self.partitions.write().await.insert(partition, set)
    }

    pub async fn remove(&self, partition: &PartitionId) -> Option<Arc<PartitionIndexSet>> {
        self.partitions.write().await.remove(partition)
    }

    pub async fn contains(&self, partition: &PartitionId) -> bool {
        self.partitions.read().await.contains_key(partition)
    }

    /// Returns the registered partitions in ascending order.
    pub async fn partitions(&self) -> Vec<PartitionId> {
        let mut partitions: Vec<PartitionId> =
            self.partitions.read().await.keys().cloned().collect();
        partitions.sort();
        partitions
    }

    pub async fn len(&self) -> usize {
        self.partitions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.partitions.read().await.is_empty()
    }
}

impl Default for IndexRegistry {
    fn default() -> Self {
        Self::new()
    }
}
