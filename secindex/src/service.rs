use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use config::ConfigLoader;
use config::shared::{IndexConfig, ServiceConfig};
use tracing::{debug, info, warn};

use crate::bail;
use crate::index_error;
use crate::error::{ErrorKind, IndexResult};
use crate::index::{PartitionIndexSet, SecondaryIndex};
use crate::registry::IndexRegistry;
use crate::store::PartitionStore;
use crate::types::{ByteKey, Criterion, IndexedColumn, IndexedQuery, PartitionId, Predicate};

/// Index operations exposed to request handlers and partition lifecycle events.
///
/// The service owns the [`IndexRegistry`] of the process and the store the indexes are built
/// from. Partitions of excluded tables are never indexed: requests against them fail with
/// [`ErrorKind::PartitionExcluded`] and lifecycle events for them are ignored.
#[derive(Debug)]
pub struct IndexService<S> {
    registry: IndexRegistry,
    store: S,
    config: IndexConfig,
}

impl<S> IndexService<S>
where
    S: PartitionStore,
{
    /// Creates a service with a fresh registry, rejecting an invalid `config`.
    pub fn new(store: S, config: IndexConfig) -> IndexResult<Self> {
        let registry = IndexRegistry::with_rebuild_log_interval(config.rebuild_log_interval);
        Self::with_registry(store, config, registry)
    }

    /// Creates a service from the `index` section of a loaded [`ServiceConfig`].
    pub fn from_config(store: S, config: ServiceConfig) -> IndexResult<Self> {
        Self::new(store, config.index)
    }

    /// Loads the [`ServiceConfig`] found under `root` and creates a service from it.
    ///
    /// Files are read from `root/configuration`, see [`ConfigLoader`].
    pub fn from_config_dir(store: S, root: impl Into<PathBuf>) -> IndexResult<Self> {
        let config = ConfigLoader::new(root)
            .load::<ServiceConfig>()
            .map_err(|err| {
                index_error!(
                    ErrorKind::ConfigurationError,
                    "Failed to load the service configuration",
                    source: err
                )
            })?;

        Self::from_config(store, config)
    }

    /// Creates a service operating on an existing `registry`, rejecting an invalid `config`.
    pub fn with_registry(
        store: S,
        config: IndexConfig,
        registry: IndexRegistry,
    ) -> IndexResult<Self> {
        if let Err(err) = config.validate() {
            bail!(
                ErrorKind::ConfigurationError,
                "Invalid index configuration",
                err.to_string(),
                source: err
            );
        }

        Ok(Self {
            registry,
            store,
            config,
        })
    }

    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Creates the index of `column` in `partition`.
    ///
    /// Creating an index that already exists succeeds without touching it, once any build of
    /// that index in flight has completed. When [`IndexConfig::build_on_create`] is set, the new
    /// index is published under its rebuild guard and built from the store before the guard is
    /// released, so queries and mutations reaching it meanwhile wait for the build. If the build
    /// fails the index is dropped and the scan error is returned.
    #[tracing::instrument(skip_all, fields(partition = %partition, column = %column))]
    pub async fn create_index(
        &self,
        partition: &PartitionId,
        column: &IndexedColumn,
    ) -> IndexResult<()> {
        self.check_not_excluded(partition)?;

        let set = self.registry.get_or_create(partition).await;
        loop {
            if let Some(existing) = set.get(column).await {
                // A failed initial build unregisters the index before releasing its guard.
                existing.wait_for_pending_writes().await;
                if set.is_current(column, &existing).await {
                    warn!("secondary index already exists, ignoring creation request");
                    return Ok(());
                }
                continue;
            }

            let index = Arc::new(set.new_index(column.clone()));
            let mut guard = index.lock_for_rebuild().await;
            if !set.insert_if_absent(column, index.clone()).await {
                continue;
            }

            info!("secondary index created");

            if !self.config.build_on_create {
                return Ok(());
            }

            let built = guard
                .rebuild_with(|| self.store.scan_column(partition, column))
                .await;
            if let Err(err) = built {
                set.remove_if_same(column, &index).await;
                drop(guard);
                warn!(error = %err, "dropping secondary index after failed initial build");
                return Err(err);
            }

            return Ok(());
        }
    }

    /// Drops the index of `column` in `partition`, doing nothing when it does not exist.
    pub async fn delete_index(
        &self,
        partition: &PartitionId,
        column: &IndexedColumn,
    ) -> IndexResult<()> {
        self.check_not_excluded(partition)?;

        let Some(set) = self.registry.get(partition).await else {
            debug!(%partition, %column, "no index set for partition, nothing to delete");
            return Ok(());
        };

        if set.remove(column).await.is_some() {
            info!(%partition, %column, "secondary index deleted");
        }

        Ok(())
    }

    /// Evaluates one predicate against the index of `column`.
    ///
    /// Returns [`None`] when an equality predicate matches no value.
    pub async fn query(
        &self,
        partition: &PartitionId,
        column: &IndexedColumn,
        predicate: &Predicate,
    ) -> IndexResult<Option<BTreeSet<ByteKey>>> {
        self.check_not_excluded(partition)?;

        let index = self.index(partition, column).await?;
        debug!(%partition, %column, %predicate, "querying secondary index");

        Ok(index.query(predicate).await)
    }

    /// Evaluates a conjunction of criteria and returns the primary keys matching all of them.
    ///
    /// Criteria on indexed columns are answered by their indexes and intersected. The remaining
    /// criteria are checked against the store for every candidate row; a row without a value in
    /// such a column does not match. At least one criterion must target an indexed column.
    #[tracing::instrument(skip_all, fields(partition = %partition))]
    pub async fn exec_indexed_query(
        &self,
        partition: &PartitionId,
        query: &IndexedQuery,
    ) -> IndexResult<BTreeSet<ByteKey>> {
        self.check_not_excluded(partition)?;

        if query.is_empty() {
            bail!(ErrorKind::BadQuery, "The query has no criteria");
        }

        let set = self.index_set(partition).await?;

        let mut indexed: Vec<(Arc<SecondaryIndex>, &Criterion)> = Vec::new();
        let mut residual: Vec<&Criterion> = Vec::new();
        for criterion in query.criteria() {
            match set.get(&criterion.column).await {
                Some(index) => indexed.push((index, criterion)),
                None => residual.push(criterion),
            }
        }

        if indexed.is_empty() {
            bail!(
                ErrorKind::BadQuery,
                "The query has no criterion on an indexed column",
                format!("{} criteria on non-indexed columns", residual.len())
            );
        }

        debug!(
            indexed = indexed.len(),
            residual = residual.len(),
            "routing indexed query"
        );

        let mut candidates: Option<BTreeSet<ByteKey>> = None;
        for (index, criterion) in indexed {
            let matched = index.query(&criterion.predicate).await.unwrap_or_default();
            let narrowed = match candidates {
                None => matched,
                Some(mut keys) => {
                    keys.retain(|key| matched.contains(key));
                    keys
                }
            };

            let exhausted = narrowed.is_empty();
            candidates = Some(narrowed);
            if exhausted {
                debug!(criterion = %criterion, "no primary key left after criterion");
                break;
            }
        }

        let mut keys = candidates.unwrap_or_default();
        if residual.is_empty() || keys.is_empty() {
            return Ok(keys);
        }

        let mut rejected = Vec::new();
        for key in &keys {
            for criterion in &residual {
                let value = self
                    .store
                    .read_cell(partition, key, &criterion.column)
                    .await?;

                let accepted = value.is_some_and(|value| criterion.predicate.matches(&value));
                if !accepted {
                    rejected.push(key.clone());
                    break;
                }
            }
        }

        for key in &rejected {
            keys.remove(key);
        }

        Ok(keys)
    }

    /// Rebuilds every index of `partition` from the store and returns the number of pairs
    /// indexed.
    ///
    /// All indexes are attempted; the failures of individual indexes are returned together.
    #[tracing::instrument(skip_all, fields(partition = %partition))]
    pub async fn rebuild_partition(&self, partition: &PartitionId) -> IndexResult<u64> {
        self.check_not_excluded(partition)?;

        let set = self.index_set(partition).await?;

        let mut indexed = 0;
        let mut errors = Vec::new();
        for index in set.indexes().await {
            match self.build(partition, &index).await {
                Ok(count) => indexed += count,
                Err(err) => errors.push(err),
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        info!(indexed, "partition indexes rebuilt");

        Ok(indexed)
    }

    /// Returns the indexed columns of `partition` in ascending order.
    pub async fn indexed_columns(&self, partition: &PartitionId) -> Vec<IndexedColumn> {
        match self.registry.get(partition).await {
            Some(set) => set.columns().await,
            None => Vec::new(),
        }
    }

    /// Records that `value` was written to `column` of row `primary_key`.
    pub async fn on_put(
        &self,
        partition: &PartitionId,
        primary_key: ByteKey,
        column: &IndexedColumn,
        value: ByteKey,
    ) {
        if let Some(index) = self.hooked_index(partition, column).await {
            index.add(value, primary_key).await;
        }
    }

    /// Records that `old_value` was deleted from `column` of row `primary_key`.
    pub async fn on_delete(
        &self,
        partition: &PartitionId,
        primary_key: &[u8],
        column: &IndexedColumn,
        old_value: &[u8],
    ) {
        if let Some(index) = self.hooked_index(partition, column).await {
            index.remove(old_value, primary_key).await;
        }
    }

    /// Moves the indexes of `parent` to its daughters `left` and `right`.
    ///
    /// Primary keys ordered before `split_key` are indexed in `left`, the others in `right`.
    /// The daughters are registered only once every index was split, then `parent` is dropped.
    #[tracing::instrument(skip_all, fields(parent = %parent, left = %left, right = %right))]
    pub async fn on_partition_split(
        &self,
        parent: &PartitionId,
        left: &PartitionId,
        right: &PartitionId,
        split_key: &[u8],
    ) -> IndexResult<()> {
        if self.config.is_excluded(parent.table()) {
            return Ok(());
        }

        if left == parent || right == parent || left == right {
            bail!(
                ErrorKind::InvalidState,
                "Split daughters must be two distinct partitions other than the parent",
                format!("parent {parent}, left {left}, right {right}")
            );
        }

        let Some(set) = self.registry.get(parent).await else {
            debug!("split partition has no indexes");
            return Ok(());
        };

        let left_set = self.registry.new_set();
        let right_set = self.registry.new_set();
        for index in set.indexes().await {
            let left_index = Arc::new(left_set.new_index(index.column().clone()));
            let right_index = Arc::new(right_set.new_index(index.column().clone()));
            index.split(&left_index, &right_index, split_key).await?;
            left_set.insert_if_absent(index.column(), left_index).await;
            right_set.insert_if_absent(index.column(), right_index).await;
        }

        let columns = left_set.len().await;
        self.registry.insert(left.clone(), Arc::new(left_set)).await;
        self.registry.insert(right.clone(), Arc::new(right_set)).await;
        self.registry.remove(parent).await;

        info!(columns, "partition indexes split");

        Ok(())
    }

    /// Drops every index of `partition`.
    pub async fn on_partition_close(&self, partition: &PartitionId) {
        if self.config.is_excluded(partition.table()) {
            return;
        }

        if self.registry.remove(partition).await.is_some() {
            info!(%partition, "partition indexes dropped on close");
        }
    }

    fn check_not_excluded(&self, partition: &PartitionId) -> IndexResult<()> {
        if self.config.is_excluded(partition.table()) {
            warn!(%partition, "rejecting index request on excluded partition");
            bail!(
                ErrorKind::PartitionExcluded,
                "The partition belongs to a table that is never indexed",
                partition
            );
        }

        Ok(())
    }

    async fn index_set(&self, partition: &PartitionId) -> IndexResult<Arc<PartitionIndexSet>> {
        let Some(set) = self.registry.get(partition).await else {
            bail!(
                ErrorKind::NoIndex,
                "The partition has no secondary index",
                partition
            );
        };

        Ok(set)
    }

    async fn index(
        &self,
        partition: &PartitionId,
        column: &IndexedColumn,
    ) -> IndexResult<Arc<SecondaryIndex>> {
        let set = self.index_set(partition).await?;
        let Some(index) = set.get(column).await else {
            bail!(
                ErrorKind::NoIndex,
                "The column has no secondary index",
                format!("{column} in {partition}")
            );
        };

        Ok(index)
    }

    async fn hooked_index(
        &self,
        partition: &PartitionId,
        column: &IndexedColumn,
    ) -> Option<Arc<SecondaryIndex>> {
        if self.config.is_excluded(partition.table()) {
            return None;
        }

        self.registry.get(partition).await?.get(column).await
    }

    /// Rebuilds `index`, opening the scan only once the index is locked.
    async fn build(&self, partition: &PartitionId, index: &SecondaryIndex) -> IndexResult<u64> {
        index
            .rebuild_with(|| self.store.scan_column(partition, index.column()))
            .await
    }
}
