//! Ekko event archive
//!
//! Ingests EVM event logs for a time range into archive tables. A run is
//! split into windows by [`RangeBatcher`], each window's logs are decoded by a
//! [`LogProcessor`], flattened into [`archive_common::ArchiveRecord`]s and
//! written idempotently through an [`archive_store::ArchiveStore`].

pub mod archive;
pub mod batcher;
pub mod config;
pub mod normalizer;
pub mod post;
pub mod processor;
pub mod streams;
pub mod toucher;

pub use archive::{EventArchive, IngestPhase};
pub use batcher::{apply_range, RangeBatcher, RangePoint};
pub use config::{RunConfig, RunWindow};
pub use normalizer::{flatten, flatten_batch, normalize_batch, LogValue};
pub use post::{DropColumns, Identity, Pipeline, PostProcessor, SwapNetAmounts};
pub use processor::{AbiEventProcessor, LenientProcessor, LogProcessor, ProcessedLog, RawLogProcessor};
pub use streams::StreamKind;
pub use toucher::{Erc20MetadataSource, TokenMetadataSource, TokenToucher};
