use std::future::Future;

use bytes::Bytes;
use futures::Stream;

use crate::error::IndexResult;
use crate::types::{ByteKey, IndexedColumn, PartitionId};

/// One non-null column value read by a partition scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedCell {
    /// Primary key of the row holding the value.
    pub primary_key: ByteKey,
    /// Stored value of the scanned column.
    pub value: ByteKey,
}

impl ScannedCell {
    pub fn new(primary_key: impl Into<ByteKey>, value: impl Into<ByteKey>) -> Self {
        Self {
            primary_key: primary_key.into(),
            value: value.into(),
        }
    }
}

/// Read path of the partitioned key-value store the indexes sit beside.
///
/// Implementations surface store failures with the source error kinds
/// ([`crate::error::ErrorKind::SourcePartitionBusy`],
/// [`crate::error::ErrorKind::SourceNotServing`], [`crate::error::ErrorKind::SourceIoError`]),
/// either when the scan is opened or as an item of the scan stream.
pub trait PartitionStore {
    /// Stream returned by [`PartitionStore::scan_column`].
    type Scan: Stream<Item = IndexResult<ScannedCell>> + Send + Unpin;

    /// Opens a consistent scan of one column over a whole partition.
    ///
    /// The scan sees a single point-in-time view of the partition, does not populate the
    /// store's block cache, skips rows where the column is absent or null, and can be
    /// consumed only once.
    fn scan_column(
        &self,
        partition: &PartitionId,
        column: &IndexedColumn,
    ) -> impl Future<Output = IndexResult<Self::Scan>> + Send;

    /// Reads the current value of one column of one row, [`None`] when absent.
    fn read_cell(
        &self,
        partition: &PartitionId,
        primary_key: &ByteKey,
        column: &IndexedColumn,
    ) -> impl Future<Output = IndexResult<Option<Bytes>>> + Send;
}
