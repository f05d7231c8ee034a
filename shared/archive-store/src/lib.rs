//! Table-shaped persistence for the Ekko event archive
//!
//! [`ArchiveStore`] is the backend-independent contract. Two implementations
//! exist: [`DuckDbStore`] (relational, composite primary key constraint) and
//! [`RedisDocumentStore`] (document collections with a key-derived unique id).
//! Both create tables on first write and never duplicate a key tuple.

pub mod confirm;
pub mod document;
pub mod relational;
pub mod retype;

use archive_common::{
    ArchiveConfig, ArchiveRecord, ReadQuery, RecordBatch, Result, StoreBackend, Watermark,
    WriteMode, WriteReport,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub use confirm::{ConfirmPrompt, PresetAnswer, TerminalPrompt};
pub use document::RedisDocumentStore;
pub use relational::DuckDbStore;

#[async_trait]
pub trait ArchiveStore: Send + Sync {
    fn backend(&self) -> StoreBackend;

    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Creates an empty table. Fails if it exists or if a key column is not
    /// among `columns`.
    async fn create_table(&self, table: &str, columns: &[String], primary_key: &[String]) -> Result<()>;

    /// Declared primary key of an existing table.
    async fn primary_key(&self, table: &str) -> Result<Vec<String>>;

    /// Persists records, creating the table from the union of their columns
    /// when it does not exist yet.
    async fn write(
        &self,
        records: &[ArchiveRecord],
        table: &str,
        primary_key: &[String],
        mode: WriteMode,
    ) -> Result<WriteReport>;

    async fn read(&self, query: &ReadQuery) -> Result<RecordBatch>;

    /// Number of records whose `column` equals `value`.
    async fn count_where(&self, table: &str, column: &str, value: &str) -> Result<u64>;

    /// Deletes records whose `column` equals `value`, returning how many went.
    async fn delete_where(&self, table: &str, column: &str, value: &str) -> Result<u64>;

    /// Highest numeric value stored in `column`, if any.
    async fn watermark(&self, table: &str, column: &str) -> Result<Option<Watermark>>;

    /// Drops a table after the prompt confirms. Returns false, and changes
    /// nothing, when the operator declines.
    async fn delete_table(&self, table: &str, prompt: &dyn ConfirmPrompt) -> Result<bool>;
}

/// Opens the backend selected by the configuration.
pub async fn open_store(config: &ArchiveConfig) -> Result<Arc<dyn ArchiveStore>> {
    info!("Opening {} archive store", config.backend);
    match config.backend {
        StoreBackend::Relational => Ok(Arc::new(DuckDbStore::open(config)?)),
        StoreBackend::Document => Ok(Arc::new(RedisDocumentStore::connect(config).await?)),
    }
}

pub(crate) fn check_key_subset(table: &str, columns: &[String], primary_key: &[String]) -> Result<()> {
    if primary_key.is_empty() {
        return Err(archive_common::ArchiveError::SchemaError(format!(
            "table {} needs at least one primary key column",
            table
        )));
    }
    match primary_key.iter().find(|k| !columns.contains(k)) {
        Some(missing) => Err(archive_common::ArchiveError::MissingPrimaryKey {
            table: table.to_string(),
            column: missing.clone(),
        }),
        None => Ok(()),
    }
}

pub(crate) fn check_same_key(table: &str, declared: &[String], requested: &[String]) -> Result<()> {
    let mut a = declared.to_vec();
    let mut b = requested.to_vec();
    a.sort();
    b.sort();
    if a == b {
        Ok(())
    } else {
        Err(archive_common::ArchiveError::PrimaryKeyMismatch {
            table: table.to_string(),
            declared: declared.to_vec(),
            requested: requested.to_vec(),
        })
    }
}
