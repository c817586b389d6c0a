use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream;
use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, IndexResult};
use crate::index_error;
use crate::store::{PartitionStore, ScannedCell};
use crate::types::{ByteKey, IndexedColumn, PartitionId};

/// Serving state of a partition in the [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionState {
    #[default]
    Serving,
    /// The partition rejects operations until it is set back to serving.
    Busy,
    /// The partition is closing or has moved away.
    NotServing,
}

type Row = BTreeMap<IndexedColumn, Option<Bytes>>;

#[derive(Debug, Default)]
struct Partition {
    rows: BTreeMap<ByteKey, Row>,
    state: PartitionState,
    /// When set, scans yield an I/O error after this many cells.
    fail_scan_after: Option<usize>,
}

impl Partition {
    fn check_serving(&self, partition: &PartitionId) -> IndexResult<()> {
        match self.state {
            PartitionState::Serving => Ok(()),
            PartitionState::Busy => bail!(
                ErrorKind::SourcePartitionBusy,
                "Partition is too busy",
                partition
            ),
            PartitionState::NotServing => bail!(
                ErrorKind::SourceNotServing,
                "Partition is not serving",
                partition
            ),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    partitions: HashMap<PartitionId, Partition>,
}

impl Inner {
    fn partition(&self, partition: &PartitionId) -> IndexResult<&Partition> {
        let Some(data) = self.partitions.get(partition) else {
            bail!(
                ErrorKind::SourceNotServing,
                "Partition is not hosted by this store",
                partition
            );
        };
        data.check_serving(partition)?;

        Ok(data)
    }
}

/// In-memory partitioned key-value store.
///
/// Rows are keyed by primary key and hold nullable column values. Scans copy the matching cells
/// when they are opened, which gives them a consistent point-in-time view. Partition states and
/// scan faults can be injected to exercise failure handling.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` in `column` of row `primary_key`; [`None`] stores an explicit null.
    pub async fn put(
        &self,
        partition: &PartitionId,
        primary_key: impl Into<ByteKey>,
        column: &IndexedColumn,
        value: Option<Bytes>,
    ) {
        let mut inner = self.inner.lock().await;
        inner
            .partitions
            .entry(partition.clone())
            .or_default()
            .rows
            .entry(primary_key.into())
            .or_default()
            .insert(column.clone(), value);
    }

    /// Removes `column` from row `primary_key`, returning the previous value.
    pub async fn delete_cell(
        &self,
        partition: &PartitionId,
        primary_key: &[u8],
        column: &IndexedColumn,
    ) -> Option<Bytes> {
        let mut inner = self.inner.lock().await;
        let rows = &mut inner.partitions.get_mut(partition)?.rows;
        let row = rows.get_mut(primary_key)?;
        let previous = row.remove(column).flatten();
        if row.is_empty() {
            rows.remove(primary_key);
        }
        previous
    }

    pub async fn set_partition_state(&self, partition: &PartitionId, state: PartitionState) {
        let mut inner = self.inner.lock().await;
        inner.partitions.entry(partition.clone()).or_default().state = state;
    }

    /// Makes every subsequent scan of `partition` fail after `cells` cells, or never with [`None`].
    pub async fn fail_scan_after(&self, partition: &PartitionId, cells: Option<usize>) {
        let mut inner = self.inner.lock().await;
        inner
            .partitions
            .entry(partition.clone())
            .or_default()
            .fail_scan_after = cells;
    }

    /// Moves the rows of `parent` into two new partitions around `split_key`.
    ///
    /// Rows whose primary key sorts before `split_key` go to `left`, the others to `right`.
    pub async fn split_partition(
        &self,
        parent: &PartitionId,
        left: &PartitionId,
        right: &PartitionId,
        split_key: &[u8],
    ) -> IndexResult<()> {
        let mut inner = self.inner.lock().await;
        let Some(mut data) = inner.partitions.remove(parent) else {
            bail!(
                ErrorKind::SourceNotServing,
                "Partition is not hosted by this store",
                parent
            );
        };

        let right_rows = data.rows.split_off(split_key);
        inner.partitions.insert(
            left.clone(),
            Partition {
                rows: data.rows,
                ..Default::default()
            },
        );
        inner.partitions.insert(
            right.clone(),
            Partition {
                rows: right_rows,
                ..Default::default()
            },
        );

        Ok(())
    }

    /// Returns the primary keys of `partition` within `bounds`, in ascending order.
    pub async fn row_keys(
        &self,
        partition: &PartitionId,
        bounds: (Bound<&[u8]>, Bound<&[u8]>),
    ) -> Vec<ByteKey> {
        let inner = self.inner.lock().await;
        inner
            .partitions
            .get(partition)
            .map(|data| data.rows.range::<[u8], _>(bounds).map(|(key, _)| key.clone()).collect())
            .unwrap_or_default()
    }
}

impl PartitionStore for MemoryStore {
    type Scan = stream::Iter<std::vec::IntoIter<IndexResult<ScannedCell>>>;

    async fn scan_column(
        &self,
        partition: &PartitionId,
        column: &IndexedColumn,
    ) -> IndexResult<Self::Scan> {
        let inner = self.inner.lock().await;
        let data = inner.partition(partition)?;

        let mut cells: Vec<IndexResult<ScannedCell>> = data
            .rows
            .iter()
            .filter_map(|(primary_key, row)| {
                let value = row.get(column)?.as_ref()?;
                Some(Ok(ScannedCell {
                    primary_key: primary_key.clone(),
                    value: ByteKey::from(value.clone()),
                }))
            })
            .collect();

        if let Some(limit) = data.fail_scan_after {
            cells.truncate(limit);
            cells.push(Err(index_error!(
                ErrorKind::SourceIoError,
                "Partition scan failed",
                format!("injected failure after {limit} cells of {partition}")
            )));
        }

        Ok(stream::iter(cells))
    }

    async fn read_cell(
        &self,
        partition: &PartitionId,
        primary_key: &ByteKey,
        column: &IndexedColumn,
    ) -> IndexResult<Option<Bytes>> {
        let inner = self.inner.lock().await;
        let data = inner.partition(partition)?;

        Ok(data
            .rows
            .get(primary_key.as_bytes())
            .and_then(|row| row.get(column))
            .cloned()
            .flatten())
    }
}
