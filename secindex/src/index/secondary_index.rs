//! Per-column secondary index mapping stored values to the primary keys holding them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use config::shared::IndexConfig;
use futures::{Stream, StreamExt};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, error, info};

use crate::bail;
use crate::error::{ErrorKind, IndexError, IndexResult};
use crate::failpoints::{REBUILD_AFTER_CLEAR, index_fail_point};
use crate::index::IndexEntry;
use crate::store::ScannedCell;
use crate::types::{ByteKey, IndexedColumn, Predicate};

/// Counters describing the operations applied to an index since it was created.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexStats {
    /// Number of `(value, primary key)` pairs submitted for insertion.
    pub add_count: u64,
    /// Number of `(value, primary key)` pairs submitted for removal.
    pub remove_count: u64,
    /// Number of evaluated predicates.
    pub query_count: u64,
    /// Number of equality predicates whose value was not indexed.
    pub query_miss_count: u64,
    /// Number of rebuilds that ran to completion.
    pub rebuild_count: u64,
    /// Number of times this index was split into two targets.
    pub split_count: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    add_count: AtomicU64,
    remove_count: AtomicU64,
    query_count: AtomicU64,
    query_miss_count: AtomicU64,
    rebuild_count: AtomicU64,
    split_count: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> IndexStats {
        IndexStats {
            add_count: self.add_count.load(Ordering::Relaxed),
            remove_count: self.remove_count.load(Ordering::Relaxed),
            query_count: self.query_count.load(Ordering::Relaxed),
            query_miss_count: self.query_miss_count.load(Ordering::Relaxed),
            rebuild_count: self.rebuild_count.load(Ordering::Relaxed),
            split_count: self.split_count.load(Ordering::Relaxed),
        }
    }
}

/// Number of pairs each target received from [`SecondaryIndex::split`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SplitOutcome {
    pub left: usize,
    pub right: usize,
}

/// The two halves of the index, always mutated together.
///
/// `ordered` holds exactly the keys of `by_value`. Entries are ordered by value only, so the
/// ordered set of values doubles as the ordered collection of entries.
#[derive(Debug, Default)]
struct Inner {
    by_value: HashMap<ByteKey, IndexEntry>,
    ordered: BTreeSet<ByteKey>,
}

impl Inner {
    fn insert(&mut self, value: ByteKey, primary_key: ByteKey) {
        match self.by_value.get_mut(value.as_bytes()) {
            Some(entry) => {
                entry.insert(primary_key);
            }
            None => {
                let mut entry = IndexEntry::new(value.clone());
                entry.insert(primary_key);
                self.ordered.insert(value.clone());
                self.by_value.insert(value, entry);
            }
        }
    }

    fn remove(&mut self, value: &[u8], primary_key: &[u8]) {
        let Some(entry) = self.by_value.get_mut(value) else {
            return;
        };

        if entry.remove(primary_key) && entry.is_empty() {
            self.by_value.remove(value);
            self.ordered.remove(value);
        }
    }

    fn clear(&mut self) {
        self.by_value.clear();
        self.ordered.clear();
    }

    /// Unions the primary keys of every entry whose value falls within `bounds`.
    fn collect_range(&self, bounds: (Bound<&[u8]>, Bound<&[u8]>)) -> BTreeSet<ByteKey> {
        let mut primary_keys = BTreeSet::new();
        for value in self.ordered.range::<[u8], _>(bounds) {
            if let Some(entry) = self.by_value.get(value.as_bytes()) {
                primary_keys.extend(entry.primary_keys().iter().cloned());
            }
        }
        primary_keys
    }

    fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.ordered
            .iter()
            .filter_map(|value| self.by_value.get(value.as_bytes()))
    }

    fn primary_key_count(&self) -> usize {
        self.by_value.values().map(IndexEntry::len).sum()
    }
}

/// Exclusive hold on a [`SecondaryIndex`] for the duration of a rebuild.
#[derive(Debug)]
pub struct RebuildGuard<'a> {
    index: &'a SecondaryIndex,
    inner: RwLockWriteGuard<'a, Inner>,
}

impl RebuildGuard<'_> {
    /// Opens the source scan with `open_scan`, clears the index and inserts every scanned pair.
    ///
    /// The scan is opened under the guard, so mutations that reach the store after the scan's
    /// snapshot are queued behind the rebuild and applied on top of it. When the scan cannot be
    /// opened the previous content is kept. The rebuild is not transactional: when the scan fails
    /// midway the error is returned and the index keeps only the pairs applied before the
    /// failure. Callers must rebuild again before trusting it.
    ///
    /// Returns the number of pairs indexed. The guard stays held until it is dropped.
    pub async fn rebuild_with<F, Fut, S>(&mut self, open_scan: F) -> IndexResult<u64>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = IndexResult<S>>,
        S: Stream<Item = IndexResult<ScannedCell>> + Unpin,
    {
        let index = self.index;
        info!(column = %index.column, "rebuilding secondary index");

        let mut indexed = 0u64;
        if let Err(err) = index.refill(&mut self.inner, open_scan, &mut indexed).await {
            error!(
                column = %index.column,
                indexed,
                error = %err,
                "secondary index rebuild failed"
            );
            return Err(err);
        }

        StatsCounters::bump(&index.stats.rebuild_count, 1);
        info!(
            column = %index.column,
            indexed,
            values = self.inner.by_value.len(),
            "secondary index rebuilt"
        );

        Ok(indexed)
    }
}

/// In-memory reverse index of one column of one partition.
///
/// Exact matches are answered by a hash map from value to [`IndexEntry`]; ordered predicates walk
/// an ordered set of the same values. Both structures sit behind one [`RwLock`]: mutations,
/// rebuilds and splits hold the write guard, queries hold a read guard. Tokio's lock queues
/// waiters in FIFO order, so a pending rebuild or split is not starved by a stream of queries.
///
/// Query results are always owned copies; nothing returned aliases the index internals.
#[derive(Debug)]
pub struct SecondaryIndex {
    column: IndexedColumn,
    inner: RwLock<Inner>,
    stats: StatsCounters,
    rebuild_log_interval: u64,
}

impl SecondaryIndex {
    /// Creates an empty index for `column`.
    pub fn new(column: IndexedColumn) -> Self {
        Self {
            column,
            inner: RwLock::new(Inner::default()),
            stats: StatsCounters::default(),
            rebuild_log_interval: IndexConfig::DEFAULT_REBUILD_LOG_INTERVAL,
        }
    }

    /// Sets how many indexed pairs separate two progress logs during a rebuild; zero disables them.
    pub fn with_rebuild_log_interval(mut self, interval: u64) -> Self {
        self.rebuild_log_interval = interval;
        self
    }

    pub fn column(&self) -> &IndexedColumn {
        &self.column
    }

    /// Records that the row `primary_key` holds `value`.
    ///
    /// Adding a pair that is already indexed has no effect.
    pub async fn add(&self, value: impl Into<ByteKey>, primary_key: impl Into<ByteKey>) {
        let mut inner = self.inner.write().await;
        inner.insert(value.into(), primary_key.into());
        StatsCounters::bump(&self.stats.add_count, 1);
    }

    /// Applies many insertions under a single write guard.
    pub async fn add_batch<I>(&self, pairs: I)
    where
        I: IntoIterator<Item = (ByteKey, ByteKey)>,
    {
        let mut inner = self.inner.write().await;
        let mut added = 0;
        for (value, primary_key) in pairs {
            inner.insert(value, primary_key);
            added += 1;
        }
        StatsCounters::bump(&self.stats.add_count, added);
    }

    /// Forgets that the row `primary_key` holds `value`.
    ///
    /// Removing a pair that is not indexed is a no-op. When the last primary key of a value is
    /// removed the value disappears from the index.
    pub async fn remove(&self, value: impl AsRef<[u8]>, primary_key: impl AsRef<[u8]>) {
        let mut inner = self.inner.write().await;
        inner.remove(value.as_ref(), primary_key.as_ref());
        StatsCounters::bump(&self.stats.remove_count, 1);
    }

    /// Applies many removals under a single write guard.
    pub async fn remove_batch<I>(&self, pairs: I)
    where
        I: IntoIterator<Item = (ByteKey, ByteKey)>,
    {
        let mut inner = self.inner.write().await;
        let mut removed = 0;
        for (value, primary_key) in pairs {
            inner.remove(&value, &primary_key);
            removed += 1;
        }
        StatsCounters::bump(&self.stats.remove_count, removed);
    }

    /// Evaluates `predicate` and returns the matching primary keys.
    ///
    /// Returns [`None`] only for [`Predicate::Equal`] on a value that is not indexed. Ordered
    /// predicates return a possibly empty set; a [`Predicate::Range`] whose lower bound is
    /// greater than its upper bound matches nothing.
    pub async fn query(&self, predicate: &Predicate) -> Option<BTreeSet<ByteKey>> {
        let inner = self.inner.read().await;
        StatsCounters::bump(&self.stats.query_count, 1);

        match predicate {
            Predicate::Equal(value) => {
                let matched = inner
                    .by_value
                    .get(value.as_bytes())
                    .map(|entry| entry.primary_keys().clone());
                if matched.is_none() {
                    StatsCounters::bump(&self.stats.query_miss_count, 1);
                }
                matched
            }
            Predicate::Greater(value) => Some(
                inner.collect_range((Bound::Excluded(value.as_bytes()), Bound::Unbounded)),
            ),
            Predicate::Less(value) => Some(
                inner.collect_range((Bound::Unbounded, Bound::Excluded(value.as_bytes()))),
            ),
            Predicate::Range { lower, upper } => {
                if lower > upper {
                    return Some(BTreeSet::new());
                }

                Some(inner.collect_range((
                    Bound::Included(lower.as_bytes()),
                    Bound::Included(upper.as_bytes()),
                )))
            }
        }
    }

    /// Takes the write guard a rebuild runs under.
    ///
    /// Holding the guard before the index is published, or before the source scan is opened,
    /// makes every query and mutation issued meanwhile wait for the rebuild to finish.
    pub async fn lock_for_rebuild(&self) -> RebuildGuard<'_> {
        RebuildGuard {
            index: self,
            inner: self.inner.write().await,
        }
    }

    /// Replaces the whole content of the index with the pairs of the scan opened by `open_scan`.
    ///
    /// See [`RebuildGuard::rebuild_with`].
    pub async fn rebuild_with<F, Fut, S>(&self, open_scan: F) -> IndexResult<u64>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = IndexResult<S>>,
        S: Stream<Item = IndexResult<ScannedCell>> + Unpin,
    {
        self.lock_for_rebuild().await.rebuild_with(open_scan).await
    }

    /// Replaces the whole content of the index with the pairs produced by an already opened
    /// `scan`.
    pub async fn rebuild<S>(&self, scan: S) -> IndexResult<u64>
    where
        S: Stream<Item = IndexResult<ScannedCell>> + Unpin,
    {
        self.rebuild_with(move || async move { Ok::<_, IndexError>(scan) })
            .await
    }

    /// Waits until every write queued before this call, a rebuild included, has completed.
    pub async fn wait_for_pending_writes(&self) {
        drop(self.inner.read().await);
    }

    async fn refill<F, Fut, S>(
        &self,
        inner: &mut Inner,
        open_scan: F,
        indexed: &mut u64,
    ) -> IndexResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = IndexResult<S>>,
        S: Stream<Item = IndexResult<ScannedCell>> + Unpin,
    {
        let mut scan = open_scan().await?;

        inner.clear();
        index_fail_point(REBUILD_AFTER_CLEAR)?;

        while let Some(cell) = scan.next().await {
            let cell = cell?;
            inner.insert(cell.value, cell.primary_key);
            *indexed += 1;

            if self.rebuild_log_interval > 0 && *indexed % self.rebuild_log_interval == 0 {
                debug!(column = %self.column, indexed = *indexed, "secondary index rebuild in progress");
            }
        }

        Ok(())
    }

    /// Distributes the content of this index between two fresh indexes around `split_key`.
    ///
    /// For every value, primary keys ordered strictly before `split_key` are added to `left`
    /// and all others to `right`, so every indexed pair lands in exactly one target. This index
    /// is held under its write guard for the whole operation but is not modified.
    pub async fn split(
        &self,
        left: &SecondaryIndex,
        right: &SecondaryIndex,
        split_key: &[u8],
    ) -> IndexResult<SplitOutcome> {
        if std::ptr::eq(self, left) || std::ptr::eq(self, right) || std::ptr::eq(left, right) {
            bail!(
                ErrorKind::InvalidState,
                "Split targets must be two distinct indexes other than the source",
                format!("column {}", self.column)
            );
        }

        let inner = self.inner.write().await;

        let mut left_pairs = Vec::new();
        let mut right_pairs = Vec::new();
        for entry in inner.entries() {
            let (before, from) = entry.split_at(split_key);
            left_pairs.extend(before.map(|key| (entry.value().clone(), key.clone())));
            right_pairs.extend(from.map(|key| (entry.value().clone(), key.clone())));
        }

        let outcome = SplitOutcome {
            left: left_pairs.len(),
            right: right_pairs.len(),
        };

        left.add_batch(left_pairs).await;
        right.add_batch(right_pairs).await;

        StatsCounters::bump(&self.stats.split_count, 1);
        debug!(
            column = %self.column,
            left = outcome.left,
            right = outcome.right,
            "secondary index split"
        );

        Ok(outcome)
    }

    /// Returns the number of distinct indexed values.
    pub async fn len(&self) -> usize {
        self.inner.read().await.by_value.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.by_value.is_empty()
    }

    /// Returns the number of `(value, primary key)` pairs held by the index.
    pub async fn primary_key_count(&self) -> usize {
        self.inner.read().await.primary_key_count()
    }

    /// Returns a copy of the whole index content, ordered by value.
    pub async fn snapshot(&self) -> BTreeMap<ByteKey, BTreeSet<ByteKey>> {
        let inner = self.inner.read().await;
        inner
            .entries()
            .map(|entry| (entry.value().clone(), entry.primary_keys().clone()))
            .collect()
    }

    pub fn stats(&self) -> IndexStats {
        self.stats.snapshot()
    }

    #[cfg(test)]
    async fn assert_consistent(&self) {
        let inner = self.inner.read().await;
        assert_eq!(inner.by_value.len(), inner.ordered.len());
        for value in &inner.ordered {
            let entry = inner.by_value.get(value.as_bytes()).unwrap();
            assert_eq!(entry.value(), value);
            assert!(!entry.is_empty());
        }
    }
}
