//! Etherscan-compatible block explorer client
//!
//! Explorer APIs answer HTTP 200 with `status: "0"` when rate limited. Those
//! answers, and transport failures, are retried on a fixed wait up to a
//! bounded number of attempts; any other `status: "0"` answer is returned as
//! an error straight away.

use alloy_json_abi::JsonAbi;
use alloy_primitives::Address;
use archive_common::{ArchiveConfig, ArchiveError, Result};
use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::cache::BoundedCache;
use crate::types::ContractCreation;
use crate::ExplorerClient;

/// Fixed-wait retry for explorer calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            wait: Duration::from_millis(1001),
        }
    }
}

impl RetryPolicy {
    fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.wait,
            current_interval: self.wait,
            max_interval: self.wait,
            multiplier: 1.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    message: String,
    result: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreationEntry {
    contract_creator: String,
    tx_hash: String,
    #[serde(default)]
    block_number: Option<String>,
}

enum Attempt {
    Retry(ArchiveError),
    Fail(ArchiveError),
}

pub struct EtherscanClient {
    client: HttpClient,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
    abi_cache: BoundedCache<Address, JsonAbi>,
}

impl EtherscanClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        retry: RetryPolicy,
        abi_cache_size: usize,
    ) -> Result<Self> {
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Ekko-Event-Archive/1.0")
            .build()
            .map_err(|e| ArchiveError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry,
            abi_cache: BoundedCache::new(abi_cache_size)?,
        })
    }

    pub fn from_config(config: &ArchiveConfig) -> Result<Self> {
        Self::new(
            config.explorer_url.clone(),
            config.explorer_api_key.clone(),
            RetryPolicy {
                max_attempts: config.explorer_max_retries,
                wait: Duration::from_millis(config.explorer_retry_wait_ms),
            },
            config.abi_cache_size,
        )
    }

    /// Forget a cached ABI, e.g. after a proxy upgrade
    pub fn invalidate_abi(&self, address: &Address) {
        self.abi_cache.invalidate(address);
    }

    async fn request(&self, params: &[(&str, String)]) -> Result<Value> {
        let mut backoff = self.retry.to_backoff();
        let mut attempt = 1;
        loop {
            match self.request_once(params).await {
                Ok(result) => return Ok(result),
                Err(Attempt::Fail(e)) => return Err(e),
                Err(Attempt::Retry(e)) if attempt >= self.retry.max_attempts => {
                    warn!("Explorer call failed after {} attempts: {}", attempt, e);
                    return Err(e);
                }
                Err(Attempt::Retry(e)) => {
                    let wait = backoff.next_backoff().unwrap_or(self.retry.wait);
                    debug!("Explorer attempt {} failed ({}), retrying in {:?}", attempt, e, wait);
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn request_once(&self, params: &[(&str, String)]) -> std::result::Result<Value, Attempt> {
        let mut query: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        query.push(("apikey", self.api_key.as_str()));

        let response = self
            .client
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| Attempt::Retry(ArchiveError::Explorer(format!("request failed: {}", e))))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Attempt::Retry(ArchiveError::Explorer(format!("HTTP {}", status))));
        }

        let body: ExplorerResponse = response
            .json()
            .await
            .map_err(|e| Attempt::Fail(ArchiveError::Explorer(format!("unreadable response: {}", e))))?;

        if body.status == "1" {
            return Ok(body.result);
        }

        let detail = match &body.result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let err = ArchiveError::Explorer(format!("{}: {}", body.message, detail));
        if is_rate_limited(&body.message, &detail) {
            Err(Attempt::Retry(err))
        } else {
            Err(Attempt::Fail(err))
        }
    }
}

fn is_rate_limited(message: &str, detail: &str) -> bool {
    let text = format!("{} {}", message, detail).to_ascii_lowercase();
    text.contains("rate limit")
}

#[async_trait]
impl ExplorerClient for EtherscanClient {
    #[instrument(skip(self))]
    async fn get_block_number_by_time(&self, timestamp: i64) -> Result<u64> {
        let result = self
            .request(&[
                ("module", "block".to_string()),
                ("action", "getblocknobytime".to_string()),
                ("timestamp", timestamp.to_string()),
                ("closest", "before".to_string()),
            ])
            .await?;

        let text = match &result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        text.parse::<u64>()
            .map_err(|_| ArchiveError::Explorer(format!("block number not numeric: {}", text)))
    }

    #[instrument(skip(self), fields(address = %address))]
    async fn get_abi(&self, address: &Address) -> Result<JsonAbi> {
        if let Some(abi) = self.abi_cache.get(address) {
            debug!("ABI cache hit");
            return Ok(abi);
        }

        let result = self
            .request(&[
                ("module", "contract".to_string()),
                ("action", "getabi".to_string()),
                ("address", address.to_checksum(None)),
            ])
            .await?;

        let Value::String(json) = result else {
            return Err(ArchiveError::Explorer("ABI result is not a string".to_string()));
        };
        let abi: JsonAbi = serde_json::from_str(&json)?;
        self.abi_cache.put(*address, abi.clone());
        Ok(abi)
    }

    #[instrument(skip(self), fields(address = %address))]
    async fn get_contract_creation(&self, address: &Address) -> Result<ContractCreation> {
        let result = self
            .request(&[
                ("module", "contract".to_string()),
                ("action", "getcontractcreation".to_string()),
                ("contractaddresses", address.to_checksum(None)),
            ])
            .await?;

        let entries: Vec<CreationEntry> = serde_json::from_value(result)?;
        let entry = entries
            .into_iter()
            .next()
            .ok_or_else(|| ArchiveError::Explorer(format!("no creation record for {}", address)))?;

        Ok(ContractCreation {
            deployer: entry.contract_creator,
            tx_hash: entry.tx_hash,
            block_number: entry.block_number.and_then(|b| b.parse().ok()),
        })
    }
}
