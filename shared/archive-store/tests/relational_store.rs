use archive_common::{ArchiveError, ArchiveRecord, CellValue, ReadQuery, WriteMode};
use archive_store::{ArchiveStore, DuckDbStore, PresetAnswer};
use num_bigint::BigInt;

fn pk() -> Vec<String> {
    vec!["blockNumber".to_string(), "logIndex".to_string()]
}

fn transfer(block: &str, log_index: &str, value: &str) -> ArchiveRecord {
    ArchiveRecord::from([
        ("blockNumber", block),
        ("logIndex", log_index),
        ("args_value", value),
        ("removed", "False"),
    ])
}

#[tokio::test]
async fn test_create_table_rejects_existing_and_bad_key() {
    let store = DuckDbStore::open_in_memory().unwrap();
    let columns = vec!["blockNumber".to_string(), "logIndex".to_string(), "x".to_string()];

    store.create_table("t", &columns, &pk()).await.unwrap();
    assert!(store.table_exists("t").await.unwrap());

    let err = store.create_table("t", &columns, &pk()).await.unwrap_err();
    assert!(matches!(err, ArchiveError::TableExists(_)));

    let err = store
        .create_table("u", &columns, &["missing".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::MissingPrimaryKey { .. }));
    assert!(!store.table_exists("u").await.unwrap());
}

#[tokio::test]
async fn test_first_write_creates_table_with_key() {
    let store = DuckDbStore::open_in_memory().unwrap();
    let report = store
        .write(&[transfer("1", "0", "10")], "weth_transfer", &pk(), WriteMode::InsertOrUpdate)
        .await
        .unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.updated, 0);
    let mut declared = store.primary_key("weth_transfer").await.unwrap();
    declared.sort();
    assert_eq!(declared, pk());
}

#[tokio::test]
async fn test_upsert_updates_only_non_key_columns() {
    let store = DuckDbStore::open_in_memory().unwrap();
    store
        .write(&[transfer("5", "2", "100")], "t", &pk(), WriteMode::InsertOrUpdate)
        .await
        .unwrap();

    let report = store
        .write(&[transfer("5", "2", "250")], "t", &pk(), WriteMode::InsertOrUpdate)
        .await
        .unwrap();
    assert_eq!(report.inserted, 0);
    assert_eq!(report.updated, 1);

    let batch = store.read(&ReadQuery::table("t")).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.value(0, "blockNumber"), Some(&CellValue::Integer(BigInt::from(5))));
    assert_eq!(batch.value(0, "logIndex"), Some(&CellValue::Integer(BigInt::from(2))));
    assert_eq!(batch.value(0, "args_value"), Some(&CellValue::Integer(BigInt::from(250))));
}

#[tokio::test]
async fn test_ignore_duplicates_keeps_stored_row() {
    let store = DuckDbStore::open_in_memory().unwrap();
    store
        .write(&[transfer("5", "2", "100")], "t", &pk(), WriteMode::InsertOrUpdate)
        .await
        .unwrap();

    let report = store
        .write(
            &[transfer("5", "2", "999"), transfer("6", "0", "1"), transfer("6", "0", "2")],
            "t",
            &pk(),
            WriteMode::InsertIgnoreDuplicates,
        )
        .await
        .unwrap();
    assert_eq!(report.attempted, 3);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.ignored, 2);

    let batch = store.read(&ReadQuery::filter("t", "blockNumber", "5")).await.unwrap();
    assert_eq!(batch.value(0, "args_value"), Some(&CellValue::Integer(BigInt::from(100))));
    assert_eq!(store.read(&ReadQuery::table("t")).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_write_rejects_missing_key_and_other_key() {
    let store = DuckDbStore::open_in_memory().unwrap();
    let bad = ArchiveRecord::from([("blockNumber", "1")]);
    let err = store
        .write(&[bad], "t", &pk(), WriteMode::InsertOrUpdate)
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::MissingPrimaryKey { .. }));
    assert!(!store.table_exists("t").await.unwrap());

    store
        .write(&[transfer("1", "0", "1")], "t", &pk(), WriteMode::InsertOrUpdate)
        .await
        .unwrap();
    let err = store
        .write(&[transfer("2", "0", "1")], "t", &["blockNumber".to_string()], WriteMode::InsertOrUpdate)
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::PrimaryKeyMismatch { .. }));
}

#[tokio::test]
async fn test_read_retypes_columns() {
    let store = DuckDbStore::open_in_memory().unwrap();
    let mut record = transfer("12", "0", "340282366920938463463374607431768211456");
    record.insert("args_from", "0x00000000000000000000000000000000000000aa");
    store
        .write(&[record], "t", &pk(), WriteMode::InsertOrUpdate)
        .await
        .unwrap();

    let batch = store.read(&ReadQuery::table("t")).await.unwrap();
    assert_eq!(batch.value(0, "removed"), Some(&CellValue::Bool(false)));
    assert_eq!(
        batch.value(0, "args_value"),
        Some(&CellValue::Integer(
            "340282366920938463463374607431768211456".parse::<BigInt>().unwrap()
        ))
    );
    assert!(matches!(batch.value(0, "args_from"), Some(CellValue::Text(_))));

    let raw = DuckDbStore::open_in_memory().unwrap().without_retyping();
    raw.write(&[transfer("12", "0", "1")], "t", &pk(), WriteMode::InsertOrUpdate)
        .await
        .unwrap();
    let batch = raw.read(&ReadQuery::table("t")).await.unwrap();
    assert_eq!(batch.value(0, "blockNumber"), Some(&CellValue::Text("12".into())));
}

#[tokio::test]
async fn test_sql_read() {
    let store = DuckDbStore::open_in_memory().unwrap();
    store
        .write(
            &[transfer("1", "0", "5"), transfer("1", "1", "7")],
            "t",
            &pk(),
            WriteMode::InsertOrUpdate,
        )
        .await
        .unwrap();

    let batch = store
        .read(&ReadQuery::Sql("SELECT COUNT(*) AS n FROM t".to_string()))
        .await
        .unwrap();
    assert_eq!(batch.columns, vec!["n"]);
    assert_eq!(batch.rows[0][0], CellValue::Integer(BigInt::from(2)));
}

#[tokio::test]
async fn test_watermark_is_numeric_max() {
    let store = DuckDbStore::open_in_memory().unwrap();
    assert!(store.watermark("t", "blockNumber").await.unwrap().is_none());

    store
        .write(
            &[transfer("999", "0", "1"), transfer("1000", "0", "1")],
            "t",
            &pk(),
            WriteMode::InsertOrUpdate,
        )
        .await
        .unwrap();
    let wm = store.watermark("t", "blockNumber").await.unwrap().unwrap();
    assert_eq!(wm.value, 1000);
}

#[tokio::test]
async fn test_count_and_delete_where() {
    let store = DuckDbStore::open_in_memory().unwrap();
    store
        .write(
            &[transfer("1", "0", "5"), transfer("1", "1", "7"), transfer("2", "0", "7")],
            "t",
            &pk(),
            WriteMode::InsertOrUpdate,
        )
        .await
        .unwrap();

    assert_eq!(store.count_where("t", "blockNumber", "1").await.unwrap(), 2);
    assert_eq!(store.delete_where("t", "blockNumber", "1").await.unwrap(), 2);
    assert_eq!(store.count_where("t", "blockNumber", "1").await.unwrap(), 0);
    assert!(matches!(
        store.count_where("missing", "a", "b").await,
        Err(ArchiveError::TableNotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_table_requires_confirmation() {
    let store = DuckDbStore::open_in_memory().unwrap();
    store
        .write(&[transfer("1", "0", "5")], "t", &pk(), WriteMode::InsertOrUpdate)
        .await
        .unwrap();

    assert!(!store.delete_table("t", &PresetAnswer(false)).await.unwrap());
    assert!(store.table_exists("t").await.unwrap());

    assert!(store.delete_table("t", &PresetAnswer(true)).await.unwrap());
    assert!(!store.table_exists("t").await.unwrap());
}

#[tokio::test]
async fn test_file_backed_store_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.duckdb");
    let mut config = archive_common::ArchiveConfig::default();
    config.duckdb_path = path.to_string_lossy().to_string();

    {
        let store = DuckDbStore::open(&config).unwrap();
        store
            .write(&[transfer("1", "0", "5")], "t", &pk(), WriteMode::InsertOrUpdate)
            .await
            .unwrap();
    }

    let reopened = DuckDbStore::open(&config).unwrap();
    assert_eq!(reopened.read(&ReadQuery::table("t")).await.unwrap().len(), 1);
}
