//! Archive table, write, and range types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ArchiveError;
use crate::Result;

/// Default primary key of a log stream table
pub const DEFAULT_LOG_PRIMARY_KEY: [&str; 2] = ["blockNumber", "logIndex"];

/// Default ordering column used to compute the resume watermark
pub const DEFAULT_WATERMARK_COLUMN: &str = "blockNumber";

/// Half-open time interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(ArchiveError::InvalidRange(format!(
                "start {} must be before end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Conflict policy when a record's key already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Replace the non-key columns of an existing row
    #[default]
    InsertOrUpdate,
    /// Keep the stored row and drop the incoming one
    InsertIgnoreDuplicates,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::InsertOrUpdate => f.write_str("insert_or_update"),
            WriteMode::InsertIgnoreDuplicates => f.write_str("insert_ignore_duplicates"),
        }
    }
}

impl FromStr for WriteMode {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "insert_or_update" | "upsert" => Ok(WriteMode::InsertOrUpdate),
            "insert_ignore_duplicates" | "ignore" => Ok(WriteMode::InsertIgnoreDuplicates),
            other => Err(ArchiveError::ConfigError(format!("unknown write mode: {}", other))),
        }
    }
}

/// Outcome of a write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReport {
    pub attempted: usize,
    pub inserted: usize,
    pub updated: usize,
    pub ignored: usize,
    /// False when the backend was asked not to acknowledge individual writes
    pub acknowledged: bool,
}

impl WriteReport {
    pub fn merge(&mut self, other: &WriteReport) {
        self.attempted += other.attempted;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.ignored += other.ignored;
        self.acknowledged = self.acknowledged && other.acknowledged;
    }
}

/// Which persistence backend an archive store talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Relational,
    Document,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Relational => f.write_str("relational"),
            StoreBackend::Document => f.write_str("document"),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "relational" | "duckdb" | "sql" => Ok(StoreBackend::Relational),
            "document" | "redis" => Ok(StoreBackend::Document),
            other => Err(ArchiveError::ConfigError(format!("unknown store backend: {}", other))),
        }
    }
}

/// What to read back from a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadQuery {
    /// Every record of a table
    Table(String),
    /// Records whose column equals a value
    Filter {
        table: String,
        column: String,
        value: String,
    },
    /// Raw SQL (relational backend only)
    Sql(String),
}

impl ReadQuery {
    pub fn table(name: impl Into<String>) -> Self {
        ReadQuery::Table(name.into())
    }

    pub fn filter(table: impl Into<String>, column: impl Into<String>, value: impl Into<String>) -> Self {
        ReadQuery::Filter {
            table: table.into(),
            column: column.into(),
            value: value.into(),
        }
    }
}

/// Highest persisted value of the ordering column of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub table: String,
    pub column: String,
    pub value: u64,
}

impl Watermark {
    /// Where a resumed ingestion restarts: one block before the watermark so
    /// that a partially persisted last block is fetched again.
    pub fn resume_block(&self) -> u64 {
        self.value.saturating_sub(1)
    }
}
