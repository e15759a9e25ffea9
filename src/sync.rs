// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The synchronizer: asynchronous writeback of dirty records.
//!
//! Drives the dirty queue through the peek → save → next state machine.
//! `peek` inspects the queue tail; `save` upserts the record into the
//! document store; `next` atomically advances the queue, but only cleans the
//! key when its cached revision still equals the one just saved. A mismatch
//! means a writer mutated the record mid-save; the entry is rotated back to
//! the queue head and flushed again on a later pass. Writeback is therefore
//! at-least-once, and safe because saves are revision-idempotent.
//!
//! Store errors are transient by definition: the loop backs off (the
//! `on_error` hook picks the pause) and re-peeks, forever. The synchronizer
//! has no caller to return errors to.
//!
//! Shutdown is cooperative through a `watch` channel; every pause and every
//! pacing tick is a cancellation point.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::client::DEFAULT_VOLATILE_TTL;
use crate::keymap::{KeyMap, SplitKeyMap};
use crate::record::Record;
use crate::storage::traits::{CacheStore, DocStore, StorageError};

/// Pacing hooks. Each returns how long the loop should pause after the
/// corresponding event; they are treated as plain values and must not
/// block.
pub struct SyncHooks {
    /// After a successful save, keyed by the flushed record.
    pub on_save: Box<dyn Fn(&str) -> Duration + Send + Sync>,
    /// After draining the queue.
    pub on_idle: Box<dyn Fn() -> Duration + Send + Sync>,
    /// After a store or codec error.
    pub on_error: Box<dyn Fn(&StorageError) -> Duration + Send + Sync>,
}

impl Default for SyncHooks {
    fn default() -> Self {
        Self {
            on_save: Box::new(|_| Duration::ZERO),
            on_idle: Box::new(|| Duration::from_secs(1)),
            on_error: Box::new(|_| Duration::from_secs(1)),
        }
    }
}

/// The writeback loop. One instance owns one dirty queue; running several
/// against the same queue is not coordinated.
pub struct Syncer {
    cache: Arc<dyn CacheStore>,
    docs: Arc<dyn DocStore>,
    keymap: Arc<dyn KeyMap>,
    hooks: SyncHooks,
    rate: u32,
    volatile_ttl: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Syncer {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        docs: Arc<dyn DocStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cache,
            docs,
            keymap: Arc::new(SplitKeyMap::default()),
            hooks: SyncHooks::default(),
            rate: 0,
            volatile_ttl: DEFAULT_VOLATILE_TTL,
            shutdown,
        }
    }

    /// Replace the key mapping. Must match the clients'.
    #[must_use]
    pub fn with_keymap(mut self, keymap: Arc<dyn KeyMap>) -> Self {
        self.keymap = keymap;
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: SyncHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Pace saves to `rate` records per second. 0 = unpaced.
    #[must_use]
    pub fn with_rate(mut self, rate: u32) -> Self {
        self.rate = rate;
        self
    }

    /// Expiry applied to keys after successful writeback.
    #[must_use]
    pub fn with_volatile_ttl(mut self, ttl: Duration) -> Self {
        self.volatile_ttl = ttl;
        self
    }

    /// Run until shut down.
    pub async fn run(mut self) {
        info!(rate = self.rate, "synchronizer running");
        let mut ticker = (self.rate > 0).then(|| {
            // interval() rejects a zero period
            let period = (Duration::from_secs(1) / self.rate).max(Duration::from_nanos(1));
            tokio::time::interval(period)
        });
        let mut codec_failures = 0u32;

        'outer: loop {
            if *self.shutdown.borrow() {
                break;
            }
            let mut cursor = self.cache.peek().await;
            loop {
                match cursor {
                    Ok(Some((key, record))) => {
                        codec_failures = 0;
                        if let Err(err) = self.save(&key, &record).await {
                            warn!(key = %key, rev = record.rev, error = %err, "writeback failed");
                            let backoff = (self.hooks.on_error)(&err);
                            if !self.pause(backoff).await {
                                break 'outer;
                            }
                            break; // re-peek
                        }
                        debug!(key = %key, rev = record.rev, "record flushed");
                        let backoff = (self.hooks.on_save)(&key);
                        if !self.pause(backoff).await {
                            break 'outer;
                        }
                        if let Some(ticker) = ticker.as_mut() {
                            tokio::select! {
                                _ = ticker.tick() => {}
                                _ = shutdown_signal(&mut self.shutdown) => break 'outer,
                            }
                        }
                        cursor = self.cache.next(&key, record.rev, self.volatile_ttl).await;
                    }
                    Ok(None) => {
                        codec_failures = 0;
                        let backoff = (self.hooks.on_idle)();
                        if !self.pause(backoff).await {
                            break 'outer;
                        }
                        break;
                    }
                    Err(err) => {
                        if matches!(err, StorageError::Codec(_)) {
                            // The queue tail can't advance past a record the
                            // codec rejects, so this repeats until the record
                            // is overwritten or evicted. Escalate once it is
                            // clearly not transient.
                            codec_failures += 1;
                            if codec_failures >= 3 {
                                error!(
                                    error = %err,
                                    consecutive = codec_failures,
                                    "malformed record is blocking the dirty queue"
                                );
                            } else {
                                warn!(error = %err, "malformed record at dirty-queue tail");
                            }
                        } else {
                            codec_failures = 0;
                            warn!(error = %err, "dirty queue access failed");
                        }
                        let backoff = (self.hooks.on_error)(&err);
                        if !self.pause(backoff).await {
                            break 'outer;
                        }
                        break;
                    }
                }
            }
        }
        info!("synchronizer stopped");
    }

    async fn save(&self, key: &str, record: &Record) -> Result<(), StorageError> {
        let addr = self.keymap.map(key);
        self.docs.upsert(&addr, record).await
    }

    /// Sleep, cancellable. Returns false when shutdown fired.
    async fn pause(&mut self, duration: Duration) -> bool {
        if *self.shutdown.borrow() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = shutdown_signal(&mut self.shutdown) => false,
        }
    }
}

/// Resolves when shutdown is requested. A dropped sender counts as a
/// request, so an abandoned synchronizer task winds down instead of
/// spinning.
async fn shutdown_signal(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
