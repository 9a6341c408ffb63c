mod display;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use feedsync_core::{
    CategoryConfig, FeedConfig, FeedSnapshot, FeedStore, MediaCategory, StorageRecord, correlate,
    is_recent,
};
use feedsync_sync::{AnalysisClient, AnalysisSource, FeedHub, StorageClient, StorageSource};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "feedsync", version, about = "Synchronize media feeds with their analysis")]
struct Cli {
    /// JSON config file; flags below override its values.
    #[arg(long, env = "FEEDSYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Base URL of the dashboard serving `/api/files`.
    #[arg(long, env = "FEEDSYNC_STORAGE_URL", global = true)]
    storage_url: Option<String>,

    /// Base URL of the analysis backend.
    #[arg(long, env = "FEEDSYNC_ANALYSIS_URL", global = true)]
    analysis_url: Option<String>,

    #[arg(long, env = "FEEDSYNC_STORAGE_INTERVAL_MS", global = true)]
    storage_interval_ms: Option<u64>,

    #[arg(long, env = "FEEDSYNC_ANALYSIS_INTERVAL_MS", global = true)]
    analysis_interval_ms: Option<u64>,

    /// Recency window in seconds.
    #[arg(long, env = "FEEDSYNC_WINDOW_SECS", global = true)]
    window_secs: Option<u64>,

    /// More logging (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch storage and analysis once and print the merged feed.
    Snapshot {
        #[arg(short, long)]
        category: MediaCategory,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Follow feeds until interrupted. Upload keys read from stdin, one per
    /// line, are merged into their feed as they arrive.
    Watch {
        /// Categories to follow; defaults to those in the config.
        #[arg(short, long = "category")]
        categories: Vec<MediaCategory>,
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<FeedConfig> {
        let mut config = match &self.config {
            Some(path) => FeedConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => FeedConfig::default(),
        };
        if let Some(url) = &self.storage_url {
            config.storage_url = url.clone();
        }
        if let Some(url) = &self.analysis_url {
            config.analysis_url = url.clone();
        }
        if let Some(ms) = self.storage_interval_ms {
            config.storage_interval_ms = ms;
        }
        if let Some(ms) = self.analysis_interval_ms {
            config.analysis_interval_ms = ms;
        }
        if let Some(secs) = self.window_secs {
            config.window_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    info!("feedsync v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.load_config()?;
    match cli.command {
        Command::Snapshot { category, json } => {
            let snapshot = snapshot(&config, category).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print!("{}", display::render_snapshot(category, &snapshot));
            }
        }
        Command::Watch { categories, json } => {
            watch(restrict(config, &categories)?, json).await?;
        }
    }
    Ok(())
}

/// One storage listing and one analysis poll, filtered and correlated.
/// A failed analysis poll leaves every record processing.
async fn snapshot(config: &FeedConfig, category: MediaCategory) -> anyhow::Result<FeedSnapshot> {
    let storage = StorageClient::new(config.storage_url.clone());
    let analysis = AnalysisClient::from_config(config);
    let (files, results) = tokio::join!(
        storage.list_files(category),
        analysis.list_results(category)
    );
    let files = files.with_context(|| format!("listing {category} files"))?;
    let results = results.unwrap_or_else(|err| {
        warn!(%category, error = %err, "analysis unavailable");
        Vec::new()
    });

    let now = Utc::now();
    let window = config.window_for(category);
    let recent: Vec<StorageRecord> = files
        .into_iter()
        .filter(|r| category.matches(&r.key) && is_recent(r.last_modified.as_deref(), now, window))
        .collect();
    let mut store = FeedStore::new();
    store.replace_all(correlate(&recent, &results));
    Ok(store.snapshot())
}

/// Keep only `categories` in `config`, adding defaults for any it lacks.
fn restrict(mut config: FeedConfig, categories: &[MediaCategory]) -> anyhow::Result<FeedConfig> {
    if categories.is_empty() {
        return Ok(config);
    }
    let mut selected = Vec::with_capacity(categories.len());
    for &category in categories {
        if selected.iter().any(|c: &CategoryConfig| c.category == category) {
            continue;
        }
        let entry = config
            .category(category)
            .cloned()
            .unwrap_or_else(|| CategoryConfig::new(category));
        selected.push(entry);
    }
    config.categories = selected;
    config.validate()?;
    Ok(config)
}

async fn watch(config: FeedConfig, json: bool) -> anyhow::Result<()> {
    let storage = Arc::new(StorageClient::new(config.storage_url.clone()));
    let analysis = Arc::new(AnalysisClient::from_config(&config));
    let hub = FeedHub::new(&config, storage, analysis);

    let subscriptions: Vec<_> = hub
        .categories()
        .filter_map(|category| {
            hub.subscribe(category, move |view| {
                if json {
                    println!("{}", display::view_json(view));
                } else {
                    print!("{}", display::render_view(view));
                }
            })
        })
        .collect();
    hub.start();

    let notifier = hub.notifier();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal.context("waiting for ctrl-c")?;
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(key)) => match notifier.notify_upload(&key) {
                    Some(category) => info!(%category, key = key.trim(), "upload routed"),
                    None => warn!(key = key.trim(), "upload not routed to any feed"),
                },
                Ok(None) => stdin_open = false,
                Err(err) => {
                    warn!(error = %err, "stdin closed");
                    stdin_open = false;
                }
            },
        }
    }

    hub.stop();
    drop(subscriptions);
    Ok(())
}
