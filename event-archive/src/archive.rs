//! One logical event stream archived into one table
//!
//! Each window of a run goes through the same steps: resolve block bounds,
//! fetch logs, process and flatten them, post-process, then persist. Windows
//! run one after another in time order; a failing window is retried smaller
//! by the batcher, and windows already persisted stay persisted when a later
//! one fails for good.

use archive_common::{
    ArchiveError, ArchiveRecord, Result, WriteMode, WriteReport, DEFAULT_LOG_PRIMARY_KEY,
    DEFAULT_WATERMARK_COLUMN,
};
use archive_store::{ArchiveStore, ConfirmPrompt};
use chain_rpc::{block_timestamps, ChainClient, LogFilter};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::batcher::RangeBatcher;
use crate::normalizer::{flatten_batch, normalize_batch, LogValue};
use crate::post::{Identity, PostProcessor};
use crate::processor::{LogProcessor, ProcessedLog};
use crate::toucher::TokenToucher;

/// Where an ingestion run currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestPhase {
    Idle,
    Fetching { from_block: u64, to_block: u64 },
    Normalizing,
    Persisting,
    Completed,
    Failed,
}

impl fmt::Display for IngestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestPhase::Idle => write!(f, "idle"),
            IngestPhase::Fetching { from_block, to_block } => {
                write!(f, "fetching {}..={}", from_block, to_block)
            }
            IngestPhase::Normalizing => write!(f, "normalizing"),
            IngestPhase::Persisting => write!(f, "persisting"),
            IngestPhase::Completed => write!(f, "completed"),
            IngestPhase::Failed => write!(f, "failed"),
        }
    }
}

pub struct EventArchive {
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn ArchiveStore>,
    table: String,
    filter: LogFilter,
    processor: Arc<dyn LogProcessor>,
    post: Arc<dyn PostProcessor>,
    primary_key: Vec<String>,
    mode: WriteMode,
    watermark_column: String,
    timestamp_column: Option<String>,
    touch: Option<(Arc<TokenToucher>, Vec<String>)>,
    phase: Mutex<IngestPhase>,
    written: Mutex<WriteReport>,
}

impl EventArchive {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn ArchiveStore>,
        table: impl Into<String>,
        filter: LogFilter,
        processor: Arc<dyn LogProcessor>,
    ) -> Self {
        Self {
            chain,
            store,
            table: table.into(),
            filter,
            processor,
            post: Arc::new(Identity),
            primary_key: DEFAULT_LOG_PRIMARY_KEY.iter().map(|c| c.to_string()).collect(),
            mode: WriteMode::default(),
            watermark_column: DEFAULT_WATERMARK_COLUMN.to_string(),
            timestamp_column: None,
            touch: None,
            phase: Mutex::new(IngestPhase::Idle),
            written: Mutex::new(WriteReport::default()),
        }
    }

    pub fn with_post_processor(mut self, post: impl PostProcessor + 'static) -> Self {
        self.post = Arc::new(post);
        self
    }

    pub fn with_primary_key<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_watermark_column(mut self, column: impl Into<String>) -> Self {
        self.watermark_column = column.into();
        self
    }

    /// Adds an interpolated block timestamp to every record under `column`.
    pub fn with_block_timestamps(mut self, column: impl Into<String>) -> Self {
        self.timestamp_column = Some(column.into());
        self
    }

    /// Touches every address found in `columns` after a window is persisted.
    pub fn with_token_touch<S: Into<String>>(
        mut self,
        toucher: Arc<TokenToucher>,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.touch = Some((toucher, columns.into_iter().map(Into::into).collect()));
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn phase(&self) -> IngestPhase {
        self.phase.lock().clone()
    }

    /// Write totals of the latest run
    pub fn last_report(&self) -> WriteReport {
        self.written.lock().clone()
    }

    fn set_phase(&self, phase: IngestPhase) {
        debug!(table = %self.table, "Phase: {}", phase);
        *self.phase.lock() = phase;
    }

    /// Ingests `[stime, etime)` in windows of at most `batch_freq`. `etime`
    /// is clamped to now. Returns every record produced, or `None` when the
    /// range held no logs.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn fetch_range(
        &self,
        stime: DateTime<Utc>,
        etime: DateTime<Utc>,
        batch_freq: chrono::Duration,
        write: bool,
    ) -> Result<Option<Vec<ArchiveRecord>>> {
        let etime = etime.min(Utc::now());
        info!("📥 Archiving {} from {} to {}", self.table, stime, etime);
        *self.written.lock() = WriteReport {
            acknowledged: true,
            ..Default::default()
        };

        let outcome = match RangeBatcher::<DateTime<Utc>>::new(batch_freq, None) {
            Ok(batcher) => {
                batcher
                    .apply(stime, etime, |start, end| self.fetch_window(start, end, write))
                    .await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(windows) => {
                self.set_phase(IngestPhase::Completed);
                let records: Vec<ArchiveRecord> = windows.into_iter().flatten().collect();
                let written = self.last_report();
                info!(
                    inserted = written.inserted,
                    updated = written.updated,
                    ignored = written.ignored,
                    "✅ {} records for {} over {} to {}",
                    records.len(),
                    self.table,
                    stime,
                    etime
                );
                Ok((!records.is_empty()).then_some(records))
            }
            Err(e) => {
                self.set_phase(IngestPhase::Failed);
                error!("Archiving {} failed: {}", self.table, e);
                Err(e)
            }
        }
    }

    /// Resumes from one block before the highest persisted block through now.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn fetch_new(&self, batch_freq: chrono::Duration) -> Result<Option<Vec<ArchiveRecord>>> {
        let watermark = self
            .store
            .watermark(&self.table, &self.watermark_column)
            .await?
            .ok_or_else(|| ArchiveError::NoWatermark(self.table.clone()))?;

        let resume = watermark.resume_block();
        let stime = self.chain.get_block_timestamp(resume).await?;
        let now = Utc::now();
        info!("🔄 Resuming {} from block {} ({})", self.table, resume, stime);
        if stime >= now {
            info!("{} is up to date", self.table);
            return Ok(None);
        }
        self.fetch_range(stime, now, batch_freq, true).await
    }

    /// Drops the stream's table once the prompt confirms.
    pub async fn reset(&self, prompt: &dyn ConfirmPrompt) -> Result<bool> {
        self.store.delete_table(&self.table, prompt).await
    }

    async fn fetch_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        write: bool,
    ) -> Result<Vec<ArchiveRecord>> {
        let from_block = self.chain.resolve_block_number(start).await?;
        let end_block = self.chain.resolve_block_number(end).await?;
        let Some(to_block) = end_block.checked_sub(1).filter(|to| *to >= from_block) else {
            debug!(start = %start, end = %end, "No blocks in window");
            return Ok(Vec::new());
        };

        self.set_phase(IngestPhase::Fetching { from_block, to_block });
        let logs = self.chain.get_logs(from_block, to_block, &self.filter).await?;
        if logs.is_empty() {
            debug!(from_block, to_block, "No logs in window");
            return Ok(Vec::new());
        }

        self.set_phase(IngestPhase::Normalizing);
        let mut values: Vec<LogValue> = Vec::with_capacity(logs.len());
        for log in &logs {
            match self.processor.process(log) {
                Ok(ProcessedLog::Parsed(value)) => values.push(value),
                Ok(ProcessedLog::Skip) => {}
                Err(e) => warn!(block = log.block_number, log_index = log.log_index, "Dropping log: {}", e),
            }
        }

        let mut records = flatten_batch(&values);
        if let Some(column) = &self.timestamp_column {
            self.add_block_timestamps(&mut records, column).await?;
        }
        let records = normalize_batch(self.post.apply(records)?);
        if records.is_empty() {
            return Ok(records);
        }

        if write {
            self.set_phase(IngestPhase::Persisting);
            let report = self
                .store
                .write(&records, &self.table, &self.primary_key, self.mode)
                .await?;
            info!(
                from_block,
                to_block,
                inserted = report.inserted,
                updated = report.updated,
                ignored = report.ignored,
                "💾 Wrote {} records to {}",
                report.attempted,
                self.table
            );
            self.written.lock().merge(&report);
            self.touch_tokens(&records).await?;
        }

        self.set_phase(IngestPhase::Idle);
        Ok(records)
    }

    async fn add_block_timestamps(&self, records: &mut [ArchiveRecord], column: &str) -> Result<()> {
        let blocks: Vec<u64> = records
            .iter()
            .filter_map(|r| r.get(DEFAULT_WATERMARK_COLUMN))
            .filter_map(|b| b.parse().ok())
            .collect();
        let times = block_timestamps(self.chain.as_ref(), &blocks).await?;

        for record in records.iter_mut() {
            let ts = record
                .get(DEFAULT_WATERMARK_COLUMN)
                .and_then(|b| b.parse::<u64>().ok())
                .and_then(|b| times.get(&b))
                .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default();
            record.insert(column, ts);
        }
        Ok(())
    }

    /// A token whose metadata cannot be fetched is skipped with a warning so
    /// it never fails the already persisted window. Store faults and
    /// duplicate token rows still stop the run.
    async fn touch_tokens(&self, records: &[ArchiveRecord]) -> Result<()> {
        let Some((toucher, columns)) = &self.touch else {
            return Ok(());
        };
        let addresses: BTreeSet<&str> = records
            .iter()
            .flat_map(|r| columns.iter().filter_map(|c| r.get(c)))
            .filter(|a| !a.is_empty())
            .collect();
        for address in addresses {
            match toucher.touch(address).await {
                Ok(_) => {}
                Err(e @ (ArchiveError::DuplicateEntity { .. } | ArchiveError::StorageError(_))) => return Err(e),
                Err(e) => warn!(address, "🪙 Token touch failed, leaving it for a later run: {}", e),
            }
        }
        Ok(())
    }
}
