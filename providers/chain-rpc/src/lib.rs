//! Chain access for the Ekko event archive
//!
//! [`ChainClient`] is what the ingestion pipeline consumes: block resolution,
//! log fetches, block timestamps and read-only calls. Transient failures are
//! raised to the caller and never retried here; the caller's range batching
//! decides whether to shrink and retry. [`ExplorerClient`] covers the
//! explorer-only lookups (block by time, ABI, contract creation).

pub mod cache;
pub mod client;
pub mod explorer;
pub mod interpolation;
pub mod rpc;
pub mod types;

use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, Bytes};
use archive_common::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use cache::{BoundedCache, ChecksumCache};
pub use client::EvmChainClient;
pub use explorer::{EtherscanClient, RetryPolicy};
pub use interpolation::{block_timestamps, interpolate};
pub use rpc::RpcTransport;
pub use types::{ContractCreation, LogFilter, RawLogRecord};

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Closest block at or before `timestamp`
    async fn resolve_block_number(&self, timestamp: DateTime<Utc>) -> Result<u64>;

    /// Every log matching `filter` in `[from_block, to_block]` (inclusive)
    async fn get_logs(&self, from_block: u64, to_block: u64, filter: &LogFilter) -> Result<Vec<RawLogRecord>>;

    async fn get_block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>>;

    /// Read-only contract call against the latest block
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;
}

#[async_trait]
pub trait ExplorerClient: Send + Sync {
    /// Closest block at or before a unix timestamp
    async fn get_block_number_by_time(&self, timestamp: i64) -> Result<u64>;

    async fn get_abi(&self, address: &Address) -> Result<JsonAbi>;

    async fn get_contract_creation(&self, address: &Address) -> Result<ContractCreation>;
}
