mod common;

use archive_common::{ArchiveError, ArchiveRecord, ReadQuery, WriteMode};
use archive_store::{ArchiveStore, DuckDbStore};
use chain_rpc::ChainClient;
use chrono::{Duration, TimeZone, Utc};
use common::*;
use event_archive::{IngestPhase, StreamKind};
use serde_json::Value;
use std::sync::Arc;

const TABLE: &str = "weth_deposit";

/// Five deposits plus one log of another event and one undecodable deposit
fn fixture() -> Vec<chain_rpc::RawLogRecord> {
    let mut bad = deposit(30, 0, 1);
    bad.data = vec![0x01, 0x02].into();
    vec![
        deposit(5, 0, 100),
        deposit(15, 0, 200),
        deposit(15, 1, 300),
        log(20, 0, vec![selector(WITHDRAWAL), alloy_primitives::B256::ZERO], word(7)),
        bad,
        deposit(42, 3, 400),
        deposit(99, 0, 500),
    ]
}

async fn stored(store: &DuckDbStore) -> Vec<ArchiveRecord> {
    let mut rows = store
        .read(&ReadQuery::table(TABLE))
        .await
        .unwrap()
        .to_records();
    rows.sort_by_key(|r| {
        (
            r.get("blockNumber").unwrap().parse::<u64>().unwrap(),
            r.get("logIndex").unwrap().parse::<u64>().unwrap(),
        )
    });
    rows
}

#[tokio::test]
async fn test_rerun_over_same_range_is_idempotent() {
    let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
    let chain = Arc::new(MockChain::new(fixture()));
    let archive = StreamKind::WethDeposit.build(chain, store.clone(), None).unwrap();

    let first = archive
        .fetch_range(genesis(), at_block(100), Duration::seconds(100), true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.len(), 5);
    assert_eq!(archive.last_report().inserted, 5);
    let before = stored(&store).await;

    archive
        .fetch_range(genesis(), at_block(100), Duration::seconds(100), true)
        .await
        .unwrap();
    assert_eq!(archive.last_report().inserted, 0);
    assert_eq!(archive.last_report().updated, 5);
    assert_eq!(stored(&store).await, before);
    assert_eq!(archive.phase(), IngestPhase::Completed);
}

#[tokio::test]
async fn test_records_are_flattened_and_post_processed() {
    let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
    let chain = Arc::new(MockChain::new(fixture()));
    let archive = StreamKind::WethDeposit.build(chain, store.clone(), None).unwrap();
    archive
        .fetch_range(genesis(), at_block(100), Duration::seconds(100), true)
        .await
        .unwrap();

    let rows = stored(&store).await;
    let first = &rows[0];
    assert_eq!(first.get("blockNumber"), Some("5"));
    assert_eq!(first.get("args_wad"), Some("100"));
    assert_eq!(first.get("event"), Some("Deposit"));
    assert_eq!(
        first.get("args_dst"),
        Some(alloy_primitives::Address::repeat_byte(0xd5).to_checksum(None).as_str())
    );
    assert!(!first.contains("blockHash"));
    assert!(!first.contains("address"));

    // the withdrawal is skipped and the undecodable deposit dropped
    assert!(rows.iter().all(|r| r.get("blockNumber") != Some("20")));
    assert!(rows.iter().all(|r| r.get("blockNumber") != Some("30")));
}

#[tokio::test]
async fn test_stream_filter_reaches_chain() {
    let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
    let chain = Arc::new(MockChain::new(Vec::new()));
    let archive = StreamKind::WethDeposit
        .build(chain.clone(), store, None)
        .unwrap();
    archive
        .fetch_range(genesis(), at_block(10), Duration::seconds(100), true)
        .await
        .unwrap();

    let filters = chain.filters.lock();
    assert_eq!(
        filters[0].get("address"),
        Some(&Value::String("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2".to_string()))
    );
    let expected_topic = format!("0x{}", hex::encode(selector(DEPOSIT)));
    assert_eq!(filters[0].get("topics"), Some(&serde_json::json!([expected_topic])));
}

#[tokio::test]
async fn test_oversized_windows_are_halved() {
    let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
    let chain = Arc::new(MockChain::new(fixture()).with_max_blocks(5));
    let archive = StreamKind::WethDeposit
        .build(chain.clone(), store.clone(), None)
        .unwrap();

    archive
        .fetch_range(genesis(), at_block(100), Duration::seconds(100), true)
        .await
        .unwrap();

    assert_eq!(stored(&store).await.len(), 5);
    let requests = chain.requests.lock();
    assert_eq!(requests[..3], [(0, 9), (0, 4), (5, 9)]);
}

#[tokio::test]
async fn test_persistent_failure_exhausts_and_keeps_earlier_windows() {
    let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
    let chain = Arc::new(MockChain::new(fixture()).with_poisoned_block(42));
    let archive = StreamKind::WethDeposit.build(chain, store.clone(), None).unwrap();

    let err = archive
        .fetch_range(genesis(), at_block(100), Duration::seconds(100), true)
        .await
        .unwrap_err();

    assert!(matches!(err, ArchiveError::RangeExhausted { .. }));
    assert_eq!(archive.phase(), IngestPhase::Failed);
    // blocks 5 and 15 were committed before the failing window
    assert_eq!(stored(&store).await.len(), 3);
}

#[tokio::test]
async fn test_empty_range_is_not_an_error() {
    let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
    let chain = Arc::new(MockChain::new(fixture()));
    let archive = StreamKind::WethDeposit.build(chain, store.clone(), None).unwrap();

    let result = archive
        .fetch_range(at_block(200), at_block(300), Duration::seconds(100), true)
        .await
        .unwrap();
    assert!(result.is_none());
    assert!(!store.table_exists(TABLE).await.unwrap());
}

#[tokio::test]
async fn test_dry_run_does_not_write() {
    let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
    let chain = Arc::new(MockChain::new(fixture()));
    let archive = StreamKind::WethDeposit.build(chain, store.clone(), None).unwrap();

    let records = archive
        .fetch_range(genesis(), at_block(100), Duration::seconds(100), false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(records.len(), 5);
    assert!(!store.table_exists(TABLE).await.unwrap());
}

#[tokio::test]
async fn test_end_time_is_clamped_to_now() {
    let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
    let chain = Arc::new(MockChain::new(fixture()));
    let archive = StreamKind::WethDeposit
        .build(chain.clone(), store, None)
        .unwrap();

    let far_future = Utc.with_ymd_and_hms(2099, 12, 31, 0, 0, 0).unwrap();
    let records = archive
        .fetch_range(genesis(), far_future, Duration::days(365), true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(records.len(), 5);

    let now_block = chain.resolve_block_number(Utc::now()).await.unwrap();
    assert!(chain.requests.lock().iter().all(|(_, to)| *to < now_block));
}

#[tokio::test]
async fn test_fetch_new_resumes_before_watermark() {
    let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
    let chain = Arc::new(MockChain::new(fixture()));
    let archive = StreamKind::WethDeposit
        .build(chain.clone(), store.clone(), None)
        .unwrap();

    archive
        .fetch_range(genesis(), at_block(50), Duration::seconds(100), true)
        .await
        .unwrap();
    assert_eq!(stored(&store).await.len(), 4);
    chain.requests.lock().clear();

    archive.fetch_new(Duration::days(400)).await.unwrap();

    assert_eq!(stored(&store).await.len(), 5);
    assert_eq!(chain.requests.lock()[0].0, 41);
    // block 42 was written again, as an update
    assert_eq!(archive.last_report().updated, 1);
}

#[tokio::test]
async fn test_fetch_new_without_watermark_fails() {
    let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
    let chain = Arc::new(MockChain::new(fixture()));
    let archive = StreamKind::WethDeposit.build(chain, store, None).unwrap();

    let err = archive.fetch_new(Duration::hours(1)).await.unwrap_err();
    assert!(matches!(err, ArchiveError::NoWatermark(table) if table == TABLE));
}

#[tokio::test]
async fn test_ignore_mode_keeps_stored_rows() {
    let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
    let chain = Arc::new(MockChain::new(fixture()));
    let archive = StreamKind::WethDeposit
        .build(chain, store.clone(), None)
        .unwrap()
        .with_write_mode(WriteMode::InsertIgnoreDuplicates);

    for _ in 0..2 {
        archive
            .fetch_range(genesis(), at_block(100), Duration::seconds(100), true)
            .await
            .unwrap();
    }
    assert_eq!(archive.last_report().ignored, 5);
    assert_eq!(stored(&store).await.len(), 5);
}

#[tokio::test]
async fn test_block_timestamps_are_interpolated() {
    let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
    let chain = Arc::new(MockChain::new(fixture()));
    let archive = StreamKind::WethDeposit
        .build(chain, store.clone(), None)
        .unwrap()
        .with_block_timestamps("timestamp");

    let records = archive
        .fetch_range(genesis(), at_block(100), Duration::seconds(1000), true)
        .await
        .unwrap()
        .unwrap();

    let at_15 = records
        .iter()
        .find(|r| r.get("blockNumber") == Some("15"))
        .unwrap();
    assert_eq!(at_15.get("timestamp"), Some("2024-01-01T00:02:30Z"));
    assert!(stored(&store).await.iter().all(|r| r.contains("timestamp")));
}

#[tokio::test]
async fn test_resume_after_reopening_store_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = archive_common::ArchiveConfig {
        duckdb_path: dir.path().join("archive.duckdb").to_string_lossy().into_owned(),
        ..Default::default()
    };
    let chain = Arc::new(MockChain::new(fixture()));

    {
        let store = Arc::new(DuckDbStore::open(&config).unwrap());
        let archive = StreamKind::WethDeposit
            .build(chain.clone(), store, None)
            .unwrap();
        archive
            .fetch_range(genesis(), at_block(20), Duration::seconds(100), true)
            .await
            .unwrap();
    }

    let store = Arc::new(DuckDbStore::open(&config).unwrap());
    let archive = StreamKind::WethDeposit
        .build(chain.clone(), store.clone(), None)
        .unwrap();
    chain.requests.lock().clear();
    archive.fetch_new(Duration::days(400)).await.unwrap();

    // watermark 15 resumes at block 14
    assert_eq!(chain.requests.lock()[0].0, 14);
    assert_eq!(stored(&store).await.len(), 5);
}
