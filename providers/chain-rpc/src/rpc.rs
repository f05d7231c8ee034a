//! JSON-RPC 2.0 transport over HTTP
//!
//! One endpoint, one attempt per call. Failures are surfaced as
//! [`ArchiveError::Rpc`] so the caller's batching policy decides what to do.

use archive_common::{ArchiveError, Result};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// RPC request structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl RpcRequest {
    pub fn new(method: &str, params: Vec<Value>, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id,
        }
    }
}

/// RPC response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
    pub id: u64,
}

/// RPC error structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

pub struct RpcTransport {
    client: HttpClient,
    url: String,
    next_id: AtomicU64,
}

impl RpcTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = HttpClient::builder()
            .timeout(timeout)
            .user_agent("Ekko-Event-Archive/1.0")
            .build()
            .map_err(|e| ArchiveError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one request and return its `result` (null when absent)
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let request = RpcRequest::new(method, params, self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!("RPC {} (id={})", method, request.id);

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ArchiveError::Rpc(format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArchiveError::Rpc(format!("{} returned HTTP {}", method, status)));
        }

        let rpc_response: RpcResponse = response
            .json()
            .await
            .map_err(|e| ArchiveError::Rpc(format!("{} response unreadable: {}", method, e)))?;

        if let Some(error) = rpc_response.error {
            return Err(ArchiveError::Rpc(format!(
                "{} failed with code {}: {}",
                method, error.code, error.message
            )));
        }

        Ok(rpc_response.result.unwrap_or(Value::Null))
    }
}
