//! Flat archive records and the read-side record batch

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ArchiveError;
use crate::Result;

/// One flat row: column name to text value.
///
/// Every value is text so that both backends accept unbounded-precision
/// integers (token amounts, supplies) without a schema per stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchiveRecord(BTreeMap<String, String>);

impl ArchiveRecord {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(column.into(), value.into())
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    pub fn remove(&mut self, column: &str) -> Option<String> {
        self.0.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Values of the primary key columns, in key order.
    pub fn key_tuple(&self, table: &str, primary_key: &[String]) -> Result<Vec<String>> {
        primary_key
            .iter()
            .map(|column| {
                self.0
                    .get(column)
                    .cloned()
                    .ok_or_else(|| ArchiveError::MissingPrimaryKey {
                        table: table.to_string(),
                        column: column.clone(),
                    })
            })
            .collect()
    }
}

impl FromIterator<(String, String)> for ArchiveRecord {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[(&str, &str); N]> for ArchiveRecord {
    fn from(pairs: [(&str, &str); N]) -> Self {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl IntoIterator for ArchiveRecord {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Union of the columns of a batch of records, sorted.
pub fn union_columns(records: &[ArchiveRecord]) -> Vec<String> {
    let mut columns: Vec<String> = records
        .iter()
        .flat_map(|r| r.columns().map(str::to_string))
        .collect();
    columns.sort();
    columns.dedup();
    columns
}

/// A typed cell returned by reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Integer(BigInt),
    Text(String),
}

impl CellValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(true) => f.write_str("True"),
            CellValue::Bool(false) => f.write_str("False"),
            CellValue::Integer(i) => write!(f, "{}", i),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

/// Tabular result of a read: ordered columns and rows of cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl RecordBatch {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at `row` for the named column.
    pub fn value(&self, row: usize, column: &str) -> Option<&CellValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Rows rendered back into text records (null cells are left out).
    pub fn to_records(&self) -> Vec<ArchiveRecord> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .filter(|(_, cell)| !matches!(cell, CellValue::Null))
                    .map(|(col, cell)| (col.clone(), cell.to_string()))
                    .collect()
            })
            .collect()
    }
}
