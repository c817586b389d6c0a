use std::collections::BTreeSet;
use std::fs;

use bytes::Bytes;
use config::shared::IndexConfig;
use secindex::error::ErrorKind;
use secindex::service::IndexService;
use secindex::store::{MemoryStore, PartitionState};
use secindex::types::{ByteKey, IndexedColumn, IndexedQuery, PartitionId, Predicate};
use telemetry::init_test_tracing;
use tempfile::TempDir;

fn age() -> IndexedColumn {
    IndexedColumn::new("c", "age").unwrap()
}

fn city() -> IndexedColumn {
    IndexedColumn::new("c", "city").unwrap()
}

fn name() -> IndexedColumn {
    IndexedColumn::new("c", "name").unwrap()
}

fn keys(keys: &[&'static str]) -> BTreeSet<ByteKey> {
    keys.iter().map(|key| ByteKey::from(*key)).collect()
}

/// Seeds a `users` partition with five rows holding an age, a city and a name.
async fn seeded_service() -> (IndexService<MemoryStore>, PartitionId) {
    init_test_tracing();

    let partition = PartitionId::new("users", "p1");
    let store = MemoryStore::new();
    let rows = [
        ("row1", "30", "paris", "ann"),
        ("row2", "25", "lyon", "bob"),
        ("row3", "30", "lyon", "cid"),
        ("row4", "41", "paris", "dan"),
        ("row5", "30", "paris", "eve"),
    ];
    for (row, age_value, city_value, name_value) in rows {
        for (column, value) in [(age(), age_value), (city(), city_value), (name(), name_value)] {
            store
                .put(&partition, row, &column, Some(Bytes::from(value)))
                .await;
        }
    }

    (IndexService::new(store, IndexConfig::default()).unwrap(), partition)
}

#[tokio::test]
async fn single_column_predicates_after_create() {
    let (service, partition) = seeded_service().await;
    service.create_index(&partition, &age()).await.unwrap();

    let query = |predicate: Predicate| {
        let service = &service;
        let partition = &partition;
        async move { service.query(partition, &age(), &predicate).await.unwrap() }
    };

    assert_eq!(
        query(Predicate::equal("30")).await,
        Some(keys(&["row1", "row3", "row5"]))
    );
    assert_eq!(
        query(Predicate::greater("25")).await,
        Some(keys(&["row1", "row3", "row4", "row5"]))
    );
    assert_eq!(query(Predicate::less("30")).await, Some(keys(&["row2"])));
    assert_eq!(
        query(Predicate::range("25", "30")).await,
        Some(keys(&["row1", "row2", "row3", "row5"]))
    );
    assert_eq!(query(Predicate::range("40", "20")).await, Some(keys(&[])));
    assert_eq!(query(Predicate::equal("99")).await, None);
}

#[tokio::test]
async fn compound_query_intersects_indexed_criteria() {
    let (service, partition) = seeded_service().await;
    service.create_index(&partition, &age()).await.unwrap();
    service.create_index(&partition, &city()).await.unwrap();

    let query = IndexedQuery::default()
        .with(age(), Predicate::equal("30"))
        .with(city(), Predicate::equal("paris"));

    let result = service.exec_indexed_query(&partition, &query).await.unwrap();
    assert_eq!(result, keys(&["row1", "row5"]));
}

#[tokio::test]
async fn compound_query_filters_non_indexed_criteria() {
    let (service, partition) = seeded_service().await;
    service.create_index(&partition, &age()).await.unwrap();

    let query = IndexedQuery::default()
        .with(age(), Predicate::greater("25"))
        .with(name(), Predicate::range("bob", "dan"));

    let result = service.exec_indexed_query(&partition, &query).await.unwrap();
    assert_eq!(result, keys(&["row3", "row4"]));
}

#[tokio::test]
async fn compound_query_rejects_rows_without_filtered_column() {
    let (service, partition) = seeded_service().await;
    service.create_index(&partition, &age()).await.unwrap();
    let email = IndexedColumn::new("c", "email").unwrap();
    service
        .store()
        .put(&partition, "row1", &email, Some(Bytes::from_static(b"ann@example.com")))
        .await;

    let query = IndexedQuery::default()
        .with(age(), Predicate::equal("30"))
        .with(email, Predicate::greater(""));

    let result = service.exec_indexed_query(&partition, &query).await.unwrap();
    assert_eq!(result, keys(&["row1"]));
}

#[tokio::test]
async fn compound_query_without_equal_match_is_empty() {
    let (service, partition) = seeded_service().await;
    service.create_index(&partition, &age()).await.unwrap();
    service.create_index(&partition, &city()).await.unwrap();

    let query = IndexedQuery::default()
        .with(age(), Predicate::equal("99"))
        .with(city(), Predicate::equal("paris"));

    let result = service.exec_indexed_query(&partition, &query).await.unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn compound_query_needs_an_indexed_criterion() {
    let (service, partition) = seeded_service().await;

    let err = service
        .exec_indexed_query(&partition, &IndexedQuery::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadQuery);

    let query = IndexedQuery::default().with(name(), Predicate::equal("ann"));
    let err = service
        .exec_indexed_query(&partition, &query)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoIndex);

    service.create_index(&partition, &age()).await.unwrap();
    let err = service
        .exec_indexed_query(&partition, &query)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadQuery);
}

#[tokio::test]
async fn excluded_partitions_are_never_indexed() {
    let (service, _) = seeded_service().await;
    let meta = PartitionId::new("hbase:meta", "1");

    let err = service.create_index(&meta, &age()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PartitionExcluded);

    let err = service
        .query(&meta, &age(), &Predicate::equal("30"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PartitionExcluded);

    let err = service
        .exec_indexed_query(&meta, &IndexedQuery::default().with(age(), Predicate::equal("30")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PartitionExcluded);

    service
        .on_partition_split(
            &meta,
            &PartitionId::new("hbase:meta", "2"),
            &PartitionId::new("hbase:meta", "3"),
            b"m",
        )
        .await
        .unwrap();
    assert!(!service.registry().contains(&meta).await);
}

#[tokio::test]
async fn custom_exclusions_replace_defaults() {
    let meta = PartitionId::new("hbase:meta", "p1");
    let store = MemoryStore::new();
    store
        .put(&meta, "users,p1", &age(), Some(Bytes::from_static(b"30")))
        .await;
    let config = IndexConfig {
        excluded_tables: vec!["audit".to_string()],
        ..IndexConfig::default()
    };
    let service = IndexService::new(store, config).unwrap();

    let err = service
        .create_index(&PartitionId::new("audit", "p1"), &age())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PartitionExcluded);

    service.create_index(&meta, &age()).await.unwrap();
    assert_eq!(
        service
            .query(&meta, &age(), &Predicate::equal("30"))
            .await
            .unwrap(),
        Some(keys(&["users,p1"]))
    );
}

#[tokio::test]
async fn invalid_configuration_is_rejected() {
    let config = IndexConfig {
        rebuild_log_interval: 0,
        ..IndexConfig::default()
    };
    let err = IndexService::new(MemoryStore::new(), config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationError);

    let config = IndexConfig {
        excluded_tables: vec![String::new()],
        ..IndexConfig::default()
    };
    let err = IndexService::new(MemoryStore::new(), config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationError);
}

#[tokio::test]
async fn service_reads_configuration_directory() {
    let root = TempDir::new().unwrap();
    let configuration = root.path().join("configuration");
    fs::create_dir(&configuration).unwrap();
    fs::write(
        configuration.join("base.yaml"),
        "index:\n  excluded_tables: [\"audit\"]\n  build_on_create: false\n",
    )
    .unwrap();

    let service = IndexService::from_config_dir(MemoryStore::new(), root.path()).unwrap();
    assert_eq!(service.config().excluded_tables, vec!["audit".to_string()]);
    assert!(!service.config().build_on_create);

    let err = service
        .create_index(&PartitionId::new("audit", "p1"), &age())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PartitionExcluded);
}

#[tokio::test]
async fn invalid_configuration_directory_is_rejected() {
    let root = TempDir::new().unwrap();
    let err = IndexService::from_config_dir(MemoryStore::new(), root.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationError);

    let configuration = root.path().join("configuration");
    fs::create_dir(&configuration).unwrap();
    fs::write(
        configuration.join("base.yaml"),
        "index:\n  rebuild_log_interval: 0\n",
    )
    .unwrap();
    let err = IndexService::from_config_dir(MemoryStore::new(), root.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationError);
}

#[tokio::test]
async fn busy_partition_fails_creation_without_registering_index() {
    let (service, partition) = seeded_service().await;
    service
        .store()
        .set_partition_state(&partition, PartitionState::Busy)
        .await;

    let err = service.create_index(&partition, &age()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourcePartitionBusy);
    assert!(err.is_source_scan_error());
    assert!(service.indexed_columns(&partition).await.is_empty());

    service
        .store()
        .set_partition_state(&partition, PartitionState::Serving)
        .await;
    service.create_index(&partition, &age()).await.unwrap();
    assert_eq!(service.indexed_columns(&partition).await, vec![age()]);
}

#[tokio::test]
async fn failing_scan_drops_new_index() {
    let (service, partition) = seeded_service().await;
    service.store().fail_scan_after(&partition, Some(2)).await;

    let err = service.create_index(&partition, &age()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceIoError);
    assert!(service.indexed_columns(&partition).await.is_empty());
}

#[tokio::test]
async fn rebuild_partition_aggregates_failures() {
    let (service, partition) = seeded_service().await;
    service.create_index(&partition, &age()).await.unwrap();
    service.create_index(&partition, &city()).await.unwrap();

    assert_eq!(service.rebuild_partition(&partition).await.unwrap(), 10);

    service
        .store()
        .set_partition_state(&partition, PartitionState::NotServing)
        .await;
    let err = service.rebuild_partition(&partition).await.unwrap_err();
    assert_eq!(err.len(), 2);
    assert_eq!(
        err.kinds(),
        vec![ErrorKind::SourceNotServing, ErrorKind::SourceNotServing]
    );

    let err = service
        .rebuild_partition(&PartitionId::new("users", "unknown"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoIndex);
}

#[tokio::test]
async fn split_follows_the_store() {
    let (service, parent) = seeded_service().await;
    let left = PartitionId::new("users", "p1-left");
    let right = PartitionId::new("users", "p1-right");
    service.create_index(&parent, &age()).await.unwrap();
    service.create_index(&parent, &city()).await.unwrap();

    service
        .store()
        .split_partition(&parent, &left, &right, b"row3")
        .await
        .unwrap();
    service
        .on_partition_split(&parent, &left, &right, b"row3")
        .await
        .unwrap();

    assert!(!service.registry().contains(&parent).await);
    assert_eq!(service.indexed_columns(&left).await, vec![age(), city()]);
    assert_eq!(service.indexed_columns(&right).await, vec![age(), city()]);

    let equal_30 = Predicate::equal("30");
    assert_eq!(
        service.query(&left, &age(), &equal_30).await.unwrap(),
        Some(keys(&["row1"]))
    );
    assert_eq!(
        service.query(&right, &age(), &equal_30).await.unwrap(),
        Some(keys(&["row3", "row5"]))
    );

    // Daughters built from the split store agree with the split indexes.
    let split_right = service.query(&right, &city(), &Predicate::equal("paris")).await.unwrap();
    assert_eq!(service.rebuild_partition(&right).await.unwrap(), 6);
    assert_eq!(
        service.query(&right, &city(), &Predicate::equal("paris")).await.unwrap(),
        split_right
    );
}

#[tokio::test]
async fn mutations_reach_only_indexed_columns() {
    let (service, partition) = seeded_service().await;
    service.create_index(&partition, &age()).await.unwrap();

    service
        .on_put(&partition, "row6".into(), &age(), "30".into())
        .await;
    service
        .on_put(&partition, "row6".into(), &name(), "fay".into())
        .await;
    service.on_delete(&partition, b"row1", &age(), b"30").await;

    assert_eq!(
        service
            .query(&partition, &age(), &Predicate::equal("30"))
            .await
            .unwrap(),
        Some(keys(&["row3", "row5", "row6"]))
    );
    assert_eq!(service.indexed_columns(&partition).await, vec![age()]);
}

#[tokio::test]
async fn close_forgets_partition() {
    let (service, partition) = seeded_service().await;
    service.create_index(&partition, &age()).await.unwrap();

    service.on_partition_close(&partition).await;
    service.on_partition_close(&partition).await;

    assert!(service.registry().is_empty().await);
    let err = service
        .exec_indexed_query(
            &partition,
            &IndexedQuery::default().with(age(), Predicate::equal("30")),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoIndex);
}
