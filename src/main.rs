//! mediafetch - chunked parallel media downloader
//!
//! Resolves media from JSON manifests, downloads stream parts over parallel
//! ranged requests, muxes them with ffmpeg and keeps a download history.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mediafetch::database::{initialize_database, DatabaseManager};
use mediafetch::downloader::FfmpegMuxer;
use mediafetch::extractor::{HybridExtractor, ManifestExtractor};
use mediafetch::queue::{ChannelNotifier, DataType, DownloadRequest, TaskStatus, WorkQueue};
use mediafetch::utils::{platform, AppSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mediafetch", version, about)]
struct Args {
    /// Settings file (JSON)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Download directory override
    #[arg(long, short, global = true)]
    output: Option<PathBuf>,

    /// Concurrent chunk requests per part
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Chunk size in bytes
    #[arg(long, global = true)]
    chunk_size: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract a manifest and print the cached media entries
    Get { url: String },
    /// Download one stream (and optionally one caption) of a manifest entry
    Download {
        #[arg(long)]
        manifest: String,
        #[arg(long, default_value = "")]
        stream: String,
        #[arg(long, default_value = "")]
        caption: String,
        /// Entry to pick when the manifest lists several
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
    /// List recent downloads
    History,
    /// Print the ffmpeg version in use
    FfmpegVersion,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args))
}

fn load_settings(args: &Args) -> Result<AppSettings> {
    let path = args.settings.clone().unwrap_or_else(platform::settings_path);
    let mut settings = if path.exists() {
        AppSettings::load(&path).with_context(|| format!("Failed to load settings {}", path.display()))?
    } else {
        debug!("No settings at {}, using defaults", path.display());
        AppSettings::default()
    };

    if let Some(output) = &args.output {
        settings.download_location = output.clone();
    }
    if let Some(workers) = args.workers {
        settings.max_chunk_workers = workers;
    }
    if let Some(chunk_size) = args.chunk_size {
        settings.chunk_size = chunk_size;
    }
    Ok(settings.normalized())
}

async fn run(args: Args) -> Result<()> {
    let settings = load_settings(&args)?;

    let pool = initialize_database(&settings.database_path)
        .await
        .context("Failed to open download database")?;
    let client = reqwest::Client::builder()
        .user_agent(settings.user_agent.clone())
        .build()?;
    let extractor = HybridExtractor::new(Vec::new(), Arc::new(ManifestExtractor::new(client)));
    let (notifier, mut updates) = ChannelNotifier::new();

    let queue = WorkQueue::new(
        settings,
        Arc::new(DatabaseManager::new(pool)),
        Arc::new(notifier),
        Arc::new(FfmpegMuxer::new()),
        Arc::new(extractor),
    )?;

    match args.command {
        Command::Get { url } => {
            let media = queue.get(&url).await?;
            println!("{}", serde_json::to_string_pretty(&media)?);
        }
        Command::Download {
            manifest,
            stream,
            caption,
            index,
        } => {
            let media = queue.get(&manifest).await?;
            let Some(entry) = media.get(index) else {
                bail!("manifest has {} entries, index {} out of range", media.len(), index);
            };
            let id = queue.check_task(&entry.id, &stream, &caption).await?;
            info!("Downloading {} ({})", entry.title, id);

            let dispatcher = queue.start().await?;
            let handle = queue
                .download(DownloadRequest {
                    id,
                    stream,
                    caption,
                })
                .await?;

            let mut last = None;
            while let Some(update) = updates.recv().await {
                println!("{}", update.ws_message()?);
                if update.data_type == DataType::All && update.status.is_terminal() {
                    last = Some(update);
                    break;
                }
            }
            handle.await?;
            queue.shutdown();
            dispatcher.await?;

            match last {
                Some(update) if update.status == TaskStatus::AllSuccess => {}
                Some(update) => bail!("download finished as {}: {}", update.status, update.error),
                None => bail!("download ended without a final status"),
            }
        }
        Command::History => {
            for record in queue.list_downloaded().await? {
                println!(
                    "{}  {:<14} {:>6.1}%  {}  {}",
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.status,
                    record.progress,
                    record.title,
                    record.saved_path
                );
            }
        }
        Command::FfmpegVersion => {
            println!("{}", queue.ffmpeg_version().await?);
        }
    }

    Ok(())
}
