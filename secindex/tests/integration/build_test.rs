use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use config::shared::IndexConfig;
use secindex::error::{ErrorKind, IndexResult};
use secindex::index_error;
use secindex::service::IndexService;
use secindex::store::{MemoryStore, PartitionStore};
use secindex::types::{ByteKey, IndexedColumn, PartitionId, Predicate};
use telemetry::init_test_tracing;
use tokio::sync::{Notify, Semaphore};

fn age() -> IndexedColumn {
    IndexedColumn::new("c", "age").unwrap()
}

fn keys(keys: &[&'static str]) -> BTreeSet<ByteKey> {
    keys.iter().map(|key| ByteKey::from(*key)).collect()
}

/// Store whose scans take their snapshot, signal it, then wait to be released.
#[derive(Debug, Clone)]
struct GatedStore {
    inner: MemoryStore,
    opened: Arc<Notify>,
    gate: Arc<Semaphore>,
    fail_next: Arc<AtomicBool>,
}

impl GatedStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            opened: Arc::new(Notify::new()),
            gate: Arc::new(Semaphore::new(0)),
            fail_next: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Waits until a scan has taken its snapshot and is blocked on the gate.
    async fn scan_opened(&self) {
        self.opened.notified().await;
    }

    /// Lets `scans` blocked or future scans through the gate.
    fn release(&self, scans: usize) {
        self.gate.add_permits(scans);
    }

    /// Makes the next released scan fail as if its partition were busy.
    fn fail_next_scan(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl PartitionStore for GatedStore {
    type Scan = <MemoryStore as PartitionStore>::Scan;

    async fn scan_column(
        &self,
        partition: &PartitionId,
        column: &IndexedColumn,
    ) -> IndexResult<Self::Scan> {
        let scan = self.inner.scan_column(partition, column).await;
        self.opened.notify_one();

        let permit = self.gate.acquire().await.map_err(|err| {
            index_error!(ErrorKind::Unknown, "Scan gate closed", source: err)
        })?;
        permit.forget();

        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(index_error!(
                ErrorKind::SourcePartitionBusy,
                "Partition is busy"
            ));
        }

        scan
    }

    async fn read_cell(
        &self,
        partition: &PartitionId,
        primary_key: &ByteKey,
        column: &IndexedColumn,
    ) -> IndexResult<Option<Bytes>> {
        self.inner.read_cell(partition, primary_key, column).await
    }
}

async fn gated_service() -> (IndexService<GatedStore>, PartitionId) {
    init_test_tracing();

    let partition = PartitionId::new("users", "p1");
    let store = MemoryStore::new();
    for (row, value) in [("row1", "30"), ("row3", "25")] {
        store
            .put(&partition, row, &age(), Some(Bytes::from(value)))
            .await;
    }

    let service = IndexService::new(GatedStore::new(store), IndexConfig::default()).unwrap();
    (service, partition)
}

#[tokio::test]
async fn query_during_initial_build_waits_for_it() {
    let (service, partition) = gated_service().await;
    let store = service.store().clone();

    let column = age();
    let predicate = Predicate::equal("30");
    let (created, queried) = tokio::join!(service.create_index(&partition, &column), async {
        store.scan_opened().await;
        let (queried, _) = tokio::join!(
            service.query(&partition, &column, &predicate),
            async {
                tokio::task::yield_now().await;
                store.release(1);
            }
        );
        queried
    });

    created.unwrap();
    assert_eq!(queried.unwrap(), Some(keys(&["row1"])));
}

#[tokio::test]
async fn write_during_initial_build_survives_it() {
    let (service, partition) = gated_service().await;
    let store = service.store().clone();

    let column = age();
    let (created, _) = tokio::join!(service.create_index(&partition, &column), async {
        store.scan_opened().await;
        // The scan snapshot is taken, the row lands in the store and then in the hook.
        store
            .inner
            .put(&partition, "row2", &age(), Some(Bytes::from_static(b"30")))
            .await;
        tokio::join!(
            service.on_put(&partition, "row2".into(), &column, "30".into()),
            async {
                tokio::task::yield_now().await;
                store.release(1);
            }
        );
    });

    created.unwrap();
    assert_eq!(
        service
            .query(&partition, &age(), &Predicate::equal("30"))
            .await
            .unwrap(),
        Some(keys(&["row1", "row2"]))
    );
}

#[tokio::test]
async fn write_during_rebuild_survives_it() {
    let (service, partition) = gated_service().await;
    let store = service.store().clone();
    store.release(1);
    service.create_index(&partition, &age()).await.unwrap();
    // Consume the signal left by the initial build.
    store.scan_opened().await;

    let column = age();
    let (rebuilt, _) = tokio::join!(service.rebuild_partition(&partition), async {
        store.scan_opened().await;
        store.inner.delete_cell(&partition, b"row1", &age()).await;
        tokio::join!(service.on_delete(&partition, b"row1", &column, b"30"), async {
            tokio::task::yield_now().await;
            store.release(1);
        });
    });

    assert_eq!(rebuilt.unwrap(), 2);
    assert_eq!(
        service
            .query(&partition, &age(), &Predicate::equal("30"))
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn duplicate_create_outlives_failed_first_build() {
    let (service, partition) = gated_service().await;
    let store = service.store().clone();
    store.fail_next_scan();

    let column = age();
    let (first, second) = tokio::join!(service.create_index(&partition, &column), async {
        store.scan_opened().await;
        let (second, _) = tokio::join!(service.create_index(&partition, &column), async {
            tokio::task::yield_now().await;
            store.release(2);
        });
        second
    });

    assert_eq!(first.unwrap_err().kind(), ErrorKind::SourcePartitionBusy);
    second.unwrap();
    assert_eq!(service.indexed_columns(&partition).await, vec![age()]);
    assert_eq!(
        service
            .query(&partition, &age(), &Predicate::equal("30"))
            .await
            .unwrap(),
        Some(keys(&["row1"]))
    );
}
