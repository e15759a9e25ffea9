// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic mirror-cache usage example.
//!
//! Demonstrates:
//! 1. Connecting to Redis (cache) and MongoDB (document store)
//! 2. Read-through gets, write-back sets
//! 3. Mailbox push / list / pull
//! 4. Running the synchronizer and watching a record land in MongoDB
//! 5. Client metrics
//!
//! # Prerequisites
//!
//! A Redis and a MongoDB reachable on localhost:
//! ```bash
//! docker run -d -p 6379:6379 redis:7
//! docker run -d -p 27017:27017 mongo:7
//! ```
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use mirror_cache::{
    CacheClient, KeyMap, MailClient, MongoStore, PushOptions, RedisCache, SplitKeyMap, Syncer,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).compact().init();

    println!("\n=== mirror-cache: basic usage ===\n");

    // ── 1. Connect ─────────────────────────────────────────────────────────
    let cache = Arc::new(RedisCache::connect("redis://localhost:6379").await?);
    cache.load_scripts().await?;
    let docs = Arc::new(MongoStore::connect("mongodb://localhost:27017").await?);
    println!("connected to cache and document store");

    let client = CacheClient::new(cache.clone(), docs.clone());

    // ── 2. Scalar records ──────────────────────────────────────────────────
    let key = "demo:records:alice";
    let rev = client.set(key, b"{\"name\":\"Alice\",\"score\":10}").await?;
    println!("set {key} at rev {rev}");

    let (rev, val) = client.get(key).await?;
    println!("get {key} -> rev {rev}, {} bytes", val.len());

    // ── 3. Mailbox ─────────────────────────────────────────────────────────
    let mail = MailClient::new(client.clone());
    let inbox = "demo:inbox:alice";
    for n in 1..=3 {
        let id = mail.push(inbox, format!("message {n}").as_bytes(), PushOptions::default()).await?;
        println!("pushed message {n} as id {id}");
    }
    let items = mail.list(inbox).await?;
    println!("inbox holds {} items", items.len());
    let pulled = mail.pull(inbox, &[items[0].id]).await?;
    println!("pulled ids {pulled:?}");

    // ── 4. Writeback ───────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let syncer = Syncer::new(cache.clone(), docs.clone(), shutdown_rx);
    let worker = tokio::spawn(syncer.run());

    // Give the synchronizer a moment to drain the dirty queue
    tokio::time::sleep(Duration::from_secs(2)).await;
    let stats = client.dirty_stats().await?;
    println!("dirty queue after sync: {} entries", stats.queued);

    use mirror_cache::DocStore;
    let addr = SplitKeyMap::default().map(key);
    if let Some(doc) = docs.find_one(&addr).await? {
        println!("document store holds {key} at rev {}", doc.rev);
    }

    let _ = shutdown_tx.send(true);
    worker.await?;

    // ── 5. Metrics ─────────────────────────────────────────────────────────
    let snap = client.metrics().snapshot();
    println!(
        "\nmetrics: {} hits, {} misses, {} store errors, {} codec errors",
        snap.cache_hit, snap.cache_miss, snap.store_error, snap.codec_error
    );

    println!("\ndone");
    Ok(())
}
