use anyhow::Result;
use archive_common::ArchiveConfig;
use archive_store::open_store;
use chain_rpc::{ChainClient, EtherscanClient, EvmChainClient, ExplorerClient};
use event_archive::{Erc20MetadataSource, RunConfig, RunWindow, TokenToucher};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("🚀 Starting Ekko Event Writer");

    // Load configuration
    let config = ArchiveConfig::from_env()?;
    let run = RunConfig::from_env()?;
    info!("📋 Stream {} into the {} store", run.stream, config.backend);

    let store = open_store(&config).await?;
    let explorer: Arc<dyn ExplorerClient> = Arc::new(EtherscanClient::from_config(&config)?);
    let chain: Arc<dyn ChainClient> = Arc::new(EvmChainClient::from_config(&config, explorer.clone())?);
    info!("📡 Chain client ready on {}", config.rpc_url);

    let toucher = if run.touch_tokens {
        let source = Arc::new(Erc20MetadataSource::new(chain.clone(), explorer.clone()));
        Some(Arc::new(TokenToucher::new(store.clone(), source, config.address_cache_size)?))
    } else {
        None
    };

    let mut archive = run
        .stream
        .build(chain, store, toucher)?
        .with_write_mode(run.write_mode);
    if let Some(column) = &run.timestamp_column {
        archive = archive.with_block_timestamps(column.clone());
    }
    let batch_freq = run.batch_freq.unwrap_or_else(|| config.default_batch_freq());

    let records = match run.window {
        RunWindow::Range(range) => archive.fetch_range(range.start, range.end, batch_freq, true).await?,
        RunWindow::FetchNew => archive.fetch_new(batch_freq).await?,
    };

    let report = archive.last_report();
    info!(
        "📊 {} records: {} inserted, {} updated, {} ignored",
        records.map_or(0, |r| r.len()),
        report.inserted,
        report.updated,
        report.ignored
    );
    info!("👋 Event writer finished");
    Ok(())
}
