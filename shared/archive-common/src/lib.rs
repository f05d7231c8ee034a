//! Shared types for the Ekko event archive
//!
//! Holds what every archive crate agrees on: the error type, flat archive
//! records, table and write descriptions, token entities, and configuration.

pub mod config;
pub mod entity;
pub mod error;
pub mod record;
pub mod types;

pub use config::ArchiveConfig;
pub use entity::{TokenEntity, TOKEN_INFO_TABLE, TOKEN_KEY_COLUMN, UNKNOWN};
pub use error::{ArchiveError, IsRetryable};
pub use record::{union_columns, ArchiveRecord, CellValue, RecordBatch};
pub use types::{
    ReadQuery, StoreBackend, TimeRange, Watermark, WriteMode, WriteReport,
    DEFAULT_LOG_PRIMARY_KEY, DEFAULT_WATERMARK_COLUMN,
};

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, ArchiveError>;
