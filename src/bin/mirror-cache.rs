//! Operational CLI: run the synchronizer, inspect the dirty structures.
//!
//! ```bash
//! # Flush dirty records until interrupted (SIGINT/SIGTERM)
//! mirror-cache -c mirror.yaml sync
//!
//! # One-shot: dirty-queue length and dirty-set cardinality
//! mirror-cache --redis redis://localhost:6379 inspect dirty
//! ```
//!
//! Configuration comes from the YAML file given with `-c`; flags override
//! file values.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use mirror_cache::{MirrorCacheConfig, MongoStore, RedisCache, CacheStore, Syncer};

#[derive(Parser)]
#[command(name = "mirror-cache", version, about = "Write-back cache synchronizer")]
struct Cli {
    /// Configuration file path (YAML)
    #[arg(short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Cache store connection url (overrides the file)
    #[arg(long, value_name = "URL")]
    redis: Option<String>,

    /// Document store connection url (overrides the file)
    #[arg(long, value_name = "URL")]
    mongo: Option<String>,

    /// Writeback pace in records per second (overrides the file)
    #[arg(long, value_name = "N")]
    rate: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the synchronizer loop until interrupted
    Sync,
    /// Report internal state
    Inspect {
        #[command(subcommand)]
        target: InspectTarget,
    },
}

#[derive(Subcommand)]
enum InspectTarget {
    /// Dirty-queue length and dirty-set cardinality
    Dirty,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(err) = run(Cli::parse()).await {
        error!(error = %err, "startup failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli)?;

    match cli.command {
        Command::Sync => sync(config).await,
        Command::Inspect { target: InspectTarget::Dirty } => inspect_dirty(config).await,
    }
}

fn load_config(cli: &Cli) -> Result<MirrorCacheConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
            serde_yaml::from_str(&contents)
                .map_err(|e| format!("failed to parse {}: {}", path.display(), e))?
        }
        None => MirrorCacheConfig::default(),
    };

    // Flags win over file values
    if let Some(redis) = &cli.redis {
        config.store_cache = Some(redis.clone());
    }
    if let Some(mongo) = &cli.mongo {
        config.store_doc = Some(mongo.clone());
    }
    if let Some(rate) = cli.rate {
        config.sync.rate = rate;
    }
    Ok(config)
}

async fn sync(config: MirrorCacheConfig) -> Result<(), Box<dyn std::error::Error>> {
    let cache_url = config.store_cache.as_deref().ok_or("no cache store configured")?;
    let doc_url = config.store_doc.as_deref().ok_or("no document store configured")?;

    let cache = Arc::new(RedisCache::connect(cache_url).await?);
    // Take the script uploads off the write path
    cache.load_scripts().await?;
    let docs = Arc::new(MongoStore::connect(doc_url).await?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let syncer = Syncer::new(cache, docs, shutdown_rx)
        .with_rate(config.sync.rate)
        .with_volatile_ttl(config.volatile_ttl());

    let worker = tokio::spawn(syncer.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
        _ = sigterm() => {
            info!("received SIGTERM, shutting down");
        }
    }

    let _ = shutdown_tx.send(true);
    worker.await?;
    Ok(())
}

async fn inspect_dirty(config: MirrorCacheConfig) -> Result<(), Box<dyn std::error::Error>> {
    let cache_url = config.store_cache.as_deref().ok_or("no cache store configured")?;
    let cache = RedisCache::connect(cache_url).await?;
    let stats = cache.dirty_stats().await?;
    info!(queued = stats.queued, tracked = stats.tracked, "dirty structures");
    println!("dirty queue length: {}, dirty set size: {}", stats.queued, stats.tracked);
    Ok(())
}

#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(_) => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending().await
}
