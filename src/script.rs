// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Content-addressed server-side script execution.
//!
//! Programs are invoked by the SHA-1 of their text. On the first `NOSCRIPT`
//! reply the script is registered (an idempotent upload guarded by a
//! per-script lock so concurrent callers don't race the registration) and the
//! by-hash call is retried. If registration itself fails the program text is
//! evaluated inline: one round trip, more bandwidth, same semantics.
//!
//! Arguments are passed pre-encoded as byte strings: that is what the wire
//! protocol carries and what the programs see in `ARGV` anyway.

use std::sync::atomic::{AtomicBool, Ordering};

use redis::aio::ConnectionManager;
use redis::{ErrorKind, RedisError, Value};
use sha1::{Digest, Sha1};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A server-side program addressed by the hash of its text.
pub struct Script {
    src: String,
    hash: String,
    registered: AtomicBool,
    register_lock: Mutex<()>,
}

impl Script {
    pub fn new(src: String) -> Self {
        let hash = hex::encode(Sha1::digest(src.as_bytes()));
        Self { src, hash, registered: AtomicBool::new(false), register_lock: Mutex::new(()) }
    }

    /// Hex SHA-1 of the program text.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// The program text.
    pub fn source(&self) -> &str {
        &self.src
    }

    /// Run the program: optimistic by-hash, register on `NOSCRIPT`, inline
    /// as a last resort.
    pub async fn run(
        &self,
        conn: &ConnectionManager,
        keys: &[&str],
        args: &[Vec<u8>],
    ) -> Result<Value, RedisError> {
        let mut conn = conn.clone();
        match self.eval_sha(&mut conn, keys, args).await {
            Err(err) if err.kind() == ErrorKind::NoScriptError => {
                if let Err(err) = self.register(&mut conn).await {
                    warn!(
                        hash = %self.hash,
                        error = %err,
                        "script registration failed, evaluating inline"
                    );
                    return self.eval_inline(&mut conn, keys, args).await;
                }
                self.eval_sha(&mut conn, keys, args).await
            }
            result => result,
        }
    }

    /// Upload the program text so by-hash invocation succeeds.
    ///
    /// Safe to call eagerly at startup; the runtime path calls it lazily on
    /// the first `NOSCRIPT`.
    pub async fn register(&self, conn: &mut ConnectionManager) -> Result<(), RedisError> {
        let _guard = self.register_lock.lock().await;
        if self.registered.load(Ordering::Acquire) {
            return Ok(());
        }
        let uploaded: String =
            redis::cmd("SCRIPT").arg("LOAD").arg(&self.src).query_async(conn).await?;
        debug_assert_eq!(uploaded, self.hash);
        self.registered.store(true, Ordering::Release);
        debug!(hash = %self.hash, "script registered");
        Ok(())
    }

    async fn eval_sha(
        &self,
        conn: &mut ConnectionManager,
        keys: &[&str],
        args: &[Vec<u8>],
    ) -> Result<Value, RedisError> {
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(&self.hash).arg(keys.len());
        for key in keys {
            cmd.arg(*key);
        }
        for arg in args {
            cmd.arg(arg.as_slice());
        }
        cmd.query_async(conn).await
    }

    async fn eval_inline(
        &self,
        conn: &mut ConnectionManager,
        keys: &[&str],
        args: &[Vec<u8>],
    ) -> Result<Value, RedisError> {
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(&self.src).arg(keys.len());
        for key in keys {
            cmd.arg(*key);
        }
        for arg in args {
            cmd.arg(arg.as_slice());
        }
        cmd.query_async(conn).await
    }
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script")
            .field("hash", &self.hash)
            .field("registered", &self.registered.load(Ordering::Relaxed))
            .finish()
    }
}
