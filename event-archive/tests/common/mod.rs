//! Test doubles shared by the integration tests

#![allow(dead_code)]

use alloy_primitives::{Address, Bytes, B256, U256};
use archive_common::{ArchiveError, Result, TokenEntity};
use async_trait::async_trait;
use chain_rpc::{ChainClient, LogFilter, RawLogRecord};
use chrono::{DateTime, TimeZone, Utc};
use event_archive::{AbiEventProcessor, TokenMetadataSource};
use parking_lot::Mutex;

pub const DEPOSIT: &str = "event Deposit(address indexed dst, uint256 wad)";
pub const WITHDRAWAL: &str = "event Withdrawal(address indexed src, uint256 wad)";
pub const PAIR_CREATED: &str =
    "event PairCreated(address indexed token0, address indexed token1, address pair, uint256)";

/// Seconds between consecutive mock blocks
pub const BLOCK_TIME: i64 = 10;

pub fn genesis() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Start of `block` on the mock chain
pub fn at_block(block: u64) -> DateTime<Utc> {
    genesis() + chrono::Duration::seconds(block as i64 * BLOCK_TIME)
}

pub fn selector(signature: &str) -> B256 {
    AbiEventProcessor::from_signature(signature)
        .unwrap()
        .event()
        .selector()
}

pub fn word(value: u64) -> Vec<u8> {
    U256::from(value).to_be_bytes::<32>().to_vec()
}

pub fn log(block: u64, log_index: u64, topics: Vec<B256>, data: Vec<u8>) -> RawLogRecord {
    RawLogRecord {
        address: Address::repeat_byte(0xc0),
        topics,
        data: Bytes::from(data),
        block_number: block,
        block_hash: B256::with_last_byte(block as u8),
        transaction_hash: B256::repeat_byte(0x22),
        transaction_index: 0,
        log_index,
        removed: false,
    }
}

pub fn deposit(block: u64, log_index: u64, wad: u64) -> RawLogRecord {
    log(
        block,
        log_index,
        vec![selector(DEPOSIT), Address::repeat_byte(0xd5).into_word()],
        word(wad),
    )
}

pub fn pair_created(block: u64, token0: Address, token1: Address, pair: Address) -> RawLogRecord {
    let mut data = pair.into_word().to_vec();
    data.extend(word(1));
    log(
        block,
        0,
        vec![selector(PAIR_CREATED), token0.into_word(), token1.into_word()],
        data,
    )
}

/// Chain with one block every [`BLOCK_TIME`] seconds from [`genesis`], serving
/// a fixed set of logs regardless of the filter.
#[derive(Default)]
pub struct MockChain {
    logs: Vec<RawLogRecord>,
    /// `get_logs` fails for windows wider than this many blocks
    max_blocks: Option<u64>,
    /// `get_logs` always fails for windows containing this block
    poisoned_block: Option<u64>,
    pub requests: Mutex<Vec<(u64, u64)>>,
    pub filters: Mutex<Vec<LogFilter>>,
}

impl MockChain {
    pub fn new(logs: Vec<RawLogRecord>) -> Self {
        Self {
            logs,
            ..Default::default()
        }
    }

    pub fn with_max_blocks(mut self, max_blocks: u64) -> Self {
        self.max_blocks = Some(max_blocks);
        self
    }

    pub fn with_poisoned_block(mut self, block: u64) -> Self {
        self.poisoned_block = Some(block);
        self
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn resolve_block_number(&self, timestamp: DateTime<Utc>) -> Result<u64> {
        let elapsed = (timestamp - genesis()).num_seconds().max(0);
        Ok((elapsed / BLOCK_TIME) as u64)
    }

    async fn get_logs(&self, from_block: u64, to_block: u64, filter: &LogFilter) -> Result<Vec<RawLogRecord>> {
        self.requests.lock().push((from_block, to_block));
        self.filters.lock().push(filter.clone());

        if let Some(max) = self.max_blocks {
            if to_block - from_block + 1 > max {
                return Err(ArchiveError::Rpc("query returned more than 10000 results".to_string()));
            }
        }
        if let Some(block) = self.poisoned_block {
            if from_block <= block && block <= to_block {
                return Err(ArchiveError::Rpc("upstream timeout".to_string()));
            }
        }

        Ok(self
            .logs
            .iter()
            .filter(|l| from_block <= l.block_number && l.block_number <= to_block)
            .cloned()
            .collect())
    }

    async fn get_block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>> {
        Ok(at_block(block_number))
    }

    async fn call(&self, to: Address, _data: Bytes) -> Result<Bytes> {
        Err(ArchiveError::Rpc(format!("no contract at {}", to)))
    }
}

/// Metadata source that counts how often it was asked
#[derive(Default)]
pub struct CountingSource {
    pub fetched: Mutex<Vec<String>>,
    /// Token whose getters revert
    reverting: Option<String>,
}

impl CountingSource {
    pub fn reverting_on(token: Address) -> Self {
        Self {
            reverting: Some(token.to_checksum(None)),
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.fetched.lock().len()
    }
}

#[async_trait]
impl TokenMetadataSource for CountingSource {
    async fn fetch(&self, address: &str) -> Result<TokenEntity> {
        if self.reverting.as_deref() == Some(address) {
            return Err(ArchiveError::Rpc("execution reverted".to_string()));
        }
        let mut fetched = self.fetched.lock();
        fetched.push(address.to_string());
        let mut token = TokenEntity::new(address, "Token", format!("TK{}", fetched.len()), "18", "1000000");
        token.deployer = "0x4f26FfBe5F04ED43630fdC30A87638d53D0b0876".to_string();
        Ok(token)
    }
}
