//! EVM chain client over JSON-RPC, with block resolution through the explorer

use alloy_primitives::{hex, Address, Bytes};
use archive_common::{ArchiveConfig, ArchiveError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::cache::BoundedCache;
use crate::rpc::RpcTransport;
use crate::types::{quantity, LogFilter, RawLogRecord};
use crate::{ChainClient, ExplorerClient};

pub struct EvmChainClient {
    rpc: RpcTransport,
    explorer: Arc<dyn ExplorerClient>,
    block_times: BoundedCache<u64, DateTime<Utc>>,
}

impl EvmChainClient {
    pub fn new(rpc: RpcTransport, explorer: Arc<dyn ExplorerClient>, block_cache_size: usize) -> Result<Self> {
        Ok(Self {
            rpc,
            explorer,
            block_times: BoundedCache::new(block_cache_size)?,
        })
    }

    pub fn from_config(config: &ArchiveConfig, explorer: Arc<dyn ExplorerClient>) -> Result<Self> {
        let rpc = RpcTransport::new(config.rpc_url.clone(), Duration::from_secs(config.rpc_timeout_secs))?;
        Self::new(rpc, explorer, config.block_cache_size)
    }

    pub fn explorer(&self) -> &Arc<dyn ExplorerClient> {
        &self.explorer
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    #[instrument(skip(self), fields(ts = %timestamp))]
    async fn resolve_block_number(&self, timestamp: DateTime<Utc>) -> Result<u64> {
        self.explorer.get_block_number_by_time(timestamp.timestamp()).await
    }

    #[instrument(skip(self, filter))]
    async fn get_logs(&self, from_block: u64, to_block: u64, filter: &LogFilter) -> Result<Vec<RawLogRecord>> {
        let result = self
            .rpc
            .call("eth_getLogs", vec![filter.to_params(from_block, to_block)])
            .await?;
        let logs: Vec<RawLogRecord> = serde_json::from_value(result)
            .map_err(|e| ArchiveError::Rpc(format!("malformed eth_getLogs result: {}", e)))?;
        debug!("Fetched {} logs for blocks {}..={}", logs.len(), from_block, to_block);
        Ok(logs)
    }

    async fn get_block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>> {
        if let Some(ts) = self.block_times.get(&block_number) {
            return Ok(ts);
        }

        let block = self
            .rpc
            .call(
                "eth_getBlockByNumber",
                vec![Value::String(quantity::encode(block_number)), Value::Bool(false)],
            )
            .await?;
        if block.is_null() {
            return Err(ArchiveError::Rpc(format!("block {} not found", block_number)));
        }

        let seconds = block
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(quantity::parse)
            .ok_or_else(|| ArchiveError::Rpc(format!("block {} has no timestamp", block_number)))?;
        let ts = DateTime::from_timestamp(seconds as i64, 0)
            .ok_or_else(|| ArchiveError::Rpc(format!("block {} timestamp out of range", block_number)))?;

        self.block_times.put(block_number, ts);
        Ok(ts)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let result = self
            .rpc
            .call(
                "eth_call",
                vec![
                    json!({ "to": to.to_checksum(None), "data": hex::encode_prefixed(&data) }),
                    Value::String("latest".to_string()),
                ],
            )
            .await?;
        let text = result
            .as_str()
            .ok_or_else(|| ArchiveError::Rpc("eth_call result is not a string".to_string()))?;
        let bytes = hex::decode(text).map_err(|e| ArchiveError::Rpc(format!("eth_call result not hex: {}", e)))?;
        Ok(Bytes::from(bytes))
    }
}
