//! chunkcast - Replays captured live MP4 stream chunks as a fragmented MP4
//!
//! Reads chunk envelopes from a capture directory, remuxes each embedded MP4
//! into fMP4 media segments and appends them, in order, to an output file.

use anyhow::Result;
use chunkcast_core::{Error, RemuxStrategy, StreamConfig};
use chunkcast_stream::{DirectoryFetcher, FileSink, Orchestrator};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// chunkcast - Remux live stream chunks into fragmented MP4
#[derive(Parser, Debug)]
#[command(name = "chunkcast")]
#[command(version, about, long_about = None)]
struct Args {
    /// Capture directory holding `<timestamp>.bin` chunk envelopes
    input: PathBuf,

    /// Output fragmented MP4 file
    #[arg(short, long, default_value = "stream.mp4")]
    output: PathBuf,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Remux strategy (delegate, manual)
    #[arg(short, long)]
    strategy: Option<String>,

    /// Call identifier sent with every request
    #[arg(long, default_value = "replay")]
    call: String,

    /// Give up after this many consecutive misses (default: retry forever)
    #[arg(long)]
    max_retries: Option<u32>,

    /// Delay between chunk requests in milliseconds
    #[arg(long)]
    poll_delay_ms: Option<u64>,

    /// Delay before retrying a missing chunk in milliseconds
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn build_config(args: &Args) -> Result<StreamConfig> {
    let mut config = match &args.config {
        Some(path) => StreamConfig::load(path)?,
        None => StreamConfig::new(),
    };

    if let Some(strategy) = &args.strategy {
        let strategy: RemuxStrategy = strategy.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        config = config.with_strategy(strategy);
    }
    if args.max_retries.is_some() {
        config = config.with_max_retries(args.max_retries);
    }
    if let Some(ms) = args.poll_delay_ms {
        config = config.with_poll_delay(Duration::from_millis(ms));
    }
    if let Some(ms) = args.retry_delay_ms {
        config = config.with_retry_delay(Duration::from_millis(ms));
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    info!("chunkcast v{}", env!("CARGO_PKG_VERSION"));

    let config = build_config(&args)?;
    info!(
        "Remuxing {} -> {} ({:?}, poll {:?}, retry {:?})",
        args.input.display(),
        args.output.display(),
        config.strategy,
        config.poll_delay,
        config.retry_delay
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
        shutdown_tx.send(true).ok();
    });

    let fetcher = DirectoryFetcher::new(&args.input);
    let sink = FileSink::new(&args.output);
    let mut orchestrator = Orchestrator::new(args.call.clone(), config, fetcher);

    match orchestrator.run(sink, shutdown_rx).await {
        Ok(()) => {}
        // End of a finite capture
        Err(Error::RetryLimit(retries)) => {
            info!("No more chunks after {} retries", retries);
        }
        Err(e) => {
            warn!("Stream stopped: {}", e);
            return Err(e.into());
        }
    }

    let stats = orchestrator.stats();
    info!(
        "Done: {} chunks ({} empty), {} media segments, {} retries, next timestamp {} ms",
        stats.chunks, stats.empty_chunks, stats.media_segments, stats.retries, stats.next_timestamp_ms
    );
    Ok(())
}
