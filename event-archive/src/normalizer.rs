//! Flattening of decoded logs into archive records

use alloy_primitives::{I256, U256};
use archive_common::{union_columns, ArchiveError, ArchiveRecord, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// A decoded log payload before flattening
#[derive(Debug, Clone, PartialEq)]
pub enum LogValue {
    Null,
    Bool(bool),
    Uint(U256),
    Int(I256),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<LogValue>),
    Map(BTreeMap<String, LogValue>),
}

impl LogValue {
    pub fn text(value: impl Into<String>) -> Self {
        LogValue::Text(value.into())
    }

    pub fn uint(value: u64) -> Self {
        LogValue::Uint(U256::from(value))
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, LogValue)>) -> Self {
        LogValue::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// JSON form used when a value is too deep to become its own column.
    /// Integers stay decimal strings so no precision is lost.
    pub fn to_json(&self) -> Value {
        match self {
            LogValue::Null => Value::Null,
            LogValue::Bool(b) => Value::Bool(*b),
            LogValue::Uint(u) => Value::String(u.to_string()),
            LogValue::Int(i) => Value::String(i.to_string()),
            LogValue::Text(s) => Value::String(s.clone()),
            LogValue::Bytes(b) => Value::String(format!("0x{}", hex::encode(b))),
            LogValue::List(items) => Value::Array(items.iter().map(LogValue::to_json).collect()),
            LogValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    fn cell_text(&self) -> String {
        match self {
            LogValue::Null => String::new(),
            LogValue::Bool(true) => "True".to_string(),
            LogValue::Bool(false) => "False".to_string(),
            LogValue::Uint(u) => u.to_string(),
            LogValue::Int(i) => i.to_string(),
            LogValue::Text(s) => s.clone(),
            LogValue::Bytes(b) => format!("0x{}", hex::encode(b)),
            LogValue::List(_) | LogValue::Map(_) => self.to_json().to_string(),
        }
    }
}

/// Flattens one decoded log. A mapping field is merged into the record as
/// `{field}_{child}` columns; anything nested deeper is kept as JSON text.
pub fn flatten(value: &LogValue) -> Result<ArchiveRecord> {
    let LogValue::Map(fields) = value else {
        return Err(ArchiveError::Decode(format!(
            "expected a mapping at the top of a log, got {}",
            value.to_json()
        )));
    };

    let mut record = ArchiveRecord::new();
    for (name, field) in fields {
        match field {
            LogValue::Map(children) => {
                for (child, leaf) in children {
                    record.insert(format!("{}_{}", name, child), leaf.cell_text());
                }
            }
            leaf => {
                record.insert(name.clone(), leaf.cell_text());
            }
        }
    }
    Ok(record)
}

/// Gives every record of a batch the same columns, filling gaps with empty text.
pub fn normalize_batch(mut records: Vec<ArchiveRecord>) -> Vec<ArchiveRecord> {
    let columns = union_columns(&records);
    for record in &mut records {
        for column in &columns {
            if !record.contains(column) {
                record.insert(column.clone(), "");
            }
        }
    }
    records
}

/// Flattens a batch of decoded logs; a log that cannot be flattened is dropped
/// on its own.
pub fn flatten_batch(values: &[LogValue]) -> Vec<ArchiveRecord> {
    let records = values
        .iter()
        .filter_map(|value| match flatten(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Dropping log that could not be flattened: {}", e);
                None
            }
        })
        .collect();
    normalize_batch(records)
}
