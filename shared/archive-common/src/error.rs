//! Error types for the event archive

use thiserror::Error;

/// Archive operation errors
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Range arguments rejected before any fetch was attempted
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Batch size halved below the floor while retrying the same cursor
    #[error("Range exhausted at {cursor}: batch size fell below minimum {min_batch_size} (last error: {last_error})")]
    RangeExhausted {
        cursor: String,
        min_batch_size: String,
        last_error: String,
    },

    /// JSON-RPC transport or node error
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Block explorer API error
    #[error("Explorer error: {0}")]
    Explorer(String),

    /// Log could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Table not found
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Table already exists
    #[error("Table already exists: {0}")]
    TableExists(String),

    /// Primary key column missing from the declared columns or from a record
    #[error("Primary key column '{column}' missing for table {table}")]
    MissingPrimaryKey { table: String, column: String },

    /// Write used a key that differs from the one the table was created with
    #[error("Primary key mismatch for table {table}: declared {declared:?}, requested {requested:?}")]
    PrimaryKeyMismatch {
        table: String,
        declared: Vec<String>,
        requested: Vec<String>,
    },

    /// More than one stored record for an entity id
    #[error("Duplicate entity in {table}: {count} records for {id}")]
    DuplicateEntity {
        table: String,
        id: String,
        count: u64,
    },

    /// Resume requested on a table with nothing persisted
    #[error("No watermark for table {0}: a start time is required")]
    NoWatermark(String),

    /// Schema mismatch
    #[error("Schema mismatch: {0}")]
    SchemaError(String),

    /// Operation not offered by this backend
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Storage backend error (DuckDB, Redis)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Classifies whether an error is worth retrying with a smaller request
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ArchiveError {
    fn is_retryable(&self) -> bool {
        matches!(self, ArchiveError::Rpc(_) | ArchiveError::Explorer(_))
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(err: serde_json::Error) -> Self {
        ArchiveError::SerializationError(err.to_string())
    }
}

impl From<anyhow::Error> for ArchiveError {
    fn from(err: anyhow::Error) -> Self {
        ArchiveError::InternalError(err.to_string())
    }
}

impl From<std::env::VarError> for ArchiveError {
    fn from(err: std::env::VarError) -> Self {
        ArchiveError::ConfigError(err.to_string())
    }
}
