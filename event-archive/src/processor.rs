//! Turning raw logs into [`LogValue`] trees
//!
//! A processor either parses a log, asks for it to be skipped (it belongs to
//! another event sharing the filter), or fails. Failures drop that single log
//! upstream; they never abort a batch.

use alloy_dyn_abi::{DynSolValue, EventExt};
use alloy_json_abi::{Event, JsonAbi};
use archive_common::{ArchiveError, Result};
use chain_rpc::RawLogRecord;
use std::collections::BTreeMap;

use crate::normalizer::LogValue;

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessedLog {
    Parsed(LogValue),
    Skip,
}

pub trait LogProcessor: Send + Sync {
    fn process(&self, log: &RawLogRecord) -> Result<ProcessedLog>;
}

impl<F> LogProcessor for F
where
    F: Fn(&RawLogRecord) -> Result<ProcessedLog> + Send + Sync,
{
    fn process(&self, log: &RawLogRecord) -> Result<ProcessedLog> {
        self(log)
    }
}

/// Keeps the provider's fields as they are
#[derive(Debug, Clone, Copy, Default)]
pub struct RawLogProcessor;

impl LogProcessor for RawLogProcessor {
    fn process(&self, log: &RawLogRecord) -> Result<ProcessedLog> {
        let mut fields = location_fields(log);
        fields.insert(
            "topics".to_string(),
            LogValue::List(log.topics.iter().map(|t| LogValue::Bytes(t.to_vec())).collect()),
        );
        fields.insert("data".to_string(), LogValue::Bytes(log.data.to_vec()));
        fields.insert("removed".to_string(), LogValue::Bool(log.removed));
        Ok(ProcessedLog::Parsed(LogValue::Map(fields)))
    }
}

/// Decodes logs of one event into `{args: {...}, event, address, ...}`
#[derive(Debug, Clone)]
pub struct AbiEventProcessor {
    event: Event,
}

impl AbiEventProcessor {
    pub fn new(event: Event) -> Self {
        Self { event }
    }

    /// From a human-readable signature such as
    /// `event Transfer(address indexed from, address indexed to, uint256 value)`
    pub fn from_signature(signature: &str) -> Result<Self> {
        let event = Event::parse(signature)
            .map_err(|e| ArchiveError::SchemaError(format!("bad event signature '{}': {}", signature, e)))?;
        Ok(Self::new(event))
    }

    pub fn from_abi(abi: &JsonAbi, name: &str) -> Result<Self> {
        let event = abi
            .event(name)
            .and_then(|overloads| overloads.first())
            .ok_or_else(|| ArchiveError::SchemaError(format!("event {} not in ABI", name)))?;
        Ok(Self::new(event.clone()))
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn name(&self) -> &str {
        &self.event.name
    }
}

impl LogProcessor for AbiEventProcessor {
    fn process(&self, log: &RawLogRecord) -> Result<ProcessedLog> {
        if !self.event.anonymous && log.topics.first() != Some(&self.event.selector()) {
            return Ok(ProcessedLog::Skip);
        }

        let decoded = self
            .event
            .decode_log_parts(log.topics.iter().copied(), &log.data, true)
            .map_err(|e| {
                ArchiveError::Decode(format!(
                    "{} at block {} log {}: {}",
                    self.event.name, log.block_number, log.log_index, e
                ))
            })?;

        let mut indexed = decoded.indexed.iter();
        let mut body = decoded.body.iter();
        let mut args = BTreeMap::new();
        for (position, input) in self.event.inputs.iter().enumerate() {
            let value = if input.indexed { indexed.next() } else { body.next() };
            let value = value.ok_or_else(|| {
                ArchiveError::Decode(format!("{} is missing argument {}", self.event.name, position))
            })?;
            let name = if input.name.is_empty() {
                format!("arg{}", position)
            } else {
                input.name.clone()
            };
            args.insert(name, from_sol_value(value));
        }

        let mut fields = location_fields(log);
        fields.insert("args".to_string(), LogValue::Map(args));
        fields.insert("event".to_string(), LogValue::text(self.event.name.clone()));
        Ok(ProcessedLog::Parsed(LogValue::Map(fields)))
    }
}

/// Turns decode errors of the inner processor into skips, for filters that
/// also match logs of a different shape (an ERC-721 `Transfer` has the same
/// selector as an ERC-20 one).
#[derive(Debug, Clone)]
pub struct LenientProcessor<P>(pub P);

impl<P: LogProcessor> LogProcessor for LenientProcessor<P> {
    fn process(&self, log: &RawLogRecord) -> Result<ProcessedLog> {
        Ok(self.0.process(log).unwrap_or(ProcessedLog::Skip))
    }
}

fn location_fields(log: &RawLogRecord) -> BTreeMap<String, LogValue> {
    BTreeMap::from([
        ("address".to_string(), LogValue::text(log.address.to_checksum(None))),
        ("blockHash".to_string(), LogValue::Bytes(log.block_hash.to_vec())),
        ("blockNumber".to_string(), LogValue::uint(log.block_number)),
        ("logIndex".to_string(), LogValue::uint(log.log_index)),
        ("transactionHash".to_string(), LogValue::Bytes(log.transaction_hash.to_vec())),
        ("transactionIndex".to_string(), LogValue::uint(log.transaction_index)),
    ])
}

fn from_sol_value(value: &DynSolValue) -> LogValue {
    match value {
        DynSolValue::Address(addr) => LogValue::text(addr.to_checksum(None)),
        DynSolValue::Uint(uint, _) => LogValue::Uint(*uint),
        DynSolValue::Int(int, _) => LogValue::Int(*int),
        DynSolValue::Bool(b) => LogValue::Bool(*b),
        DynSolValue::Bytes(bytes) => LogValue::Bytes(bytes.clone()),
        DynSolValue::FixedBytes(word, size) => LogValue::Bytes(word[..*size].to_vec()),
        DynSolValue::String(s) => LogValue::text(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            LogValue::List(items.iter().map(from_sol_value).collect())
        }
        DynSolValue::Function(f) => LogValue::Bytes(f.as_slice().to_vec()),
    }
}
