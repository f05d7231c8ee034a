//! Wire types for logs, filters and contract creation

use alloy_primitives::{hex, Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A log as returned by `eth_getLogs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLogRecord {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(with = "quantity")]
    pub block_number: u64,
    pub block_hash: B256,
    pub transaction_hash: B256,
    #[serde(with = "quantity")]
    pub transaction_index: u64,
    #[serde(with = "quantity")]
    pub log_index: u64,
    #[serde(default)]
    pub removed: bool,
}

/// Log selection criteria, passed to the node verbatim.
///
/// Block bounds are not part of the filter; they are added per request by
/// [`LogFilter::to_params`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogFilter(Map<String, Value>);

impl LogFilter {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn address(mut self, address: Address) -> Self {
        self.0
            .insert("address".to_string(), Value::String(address.to_checksum(None)));
        self
    }

    /// Topic positions; `None` matches anything at that position.
    pub fn topics(mut self, topics: &[Option<B256>]) -> Self {
        let topics = topics
            .iter()
            .map(|t| match t {
                Some(topic) => Value::String(hex::encode_prefixed(topic)),
                None => Value::Null,
            })
            .collect();
        self.0.insert("topics".to_string(), Value::Array(topics));
        self
    }

    /// Any other criterion the node understands.
    pub fn criterion(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The filter object for `eth_getLogs` over `[from_block, to_block]`
    pub fn to_params(&self, from_block: u64, to_block: u64) -> Value {
        let mut params = self.0.clone();
        params.insert("fromBlock".to_string(), Value::String(quantity::encode(from_block)));
        params.insert("toBlock".to_string(), Value::String(quantity::encode(to_block)));
        Value::Object(params)
    }
}

/// Deployment facts reported by the explorer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCreation {
    pub deployer: String,
    pub tx_hash: String,
    pub block_number: Option<u64>,
}

/// `0x`-prefixed hex quantities as used by JSON-RPC
pub mod quantity {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn encode(value: u64) -> String {
        format!("0x{:x}", value)
    }

    pub fn parse(s: &str) -> Option<u64> {
        let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
        if digits.is_empty() {
            return None;
        }
        u64::from_str_radix(digits, 16).ok()
    }

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).ok_or_else(|| de::Error::custom(format!("invalid hex quantity: {}", s)))
    }
}
