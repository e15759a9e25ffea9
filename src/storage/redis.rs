//! Redis cache backend.
//!
//! All mutators execute as server-side programs (see [`crate::scripts`]), so
//! the unpack → mutate → repack → mark-dirty sequence is atomic per key: the
//! command executor is single-threaded, and no other cache operation can
//! interleave.
//!
//! A program that finds no record raises the `CACHE_MISS` token in its error
//! reply; that is mapped to [`StorageError::CacheMiss`] here, on the client
//! side of the wire.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Value};
use tracing::info;

use super::traits::{CacheStore, DirtyStats, EvalValue, StorageError};
use crate::mailbox::OverflowStrategy;
use crate::record::Record;
use crate::resilience::retry::{retry, RetryConfig};
use crate::script::Script;
use crate::scripts;

pub struct RedisCache {
    connection: ConnectionManager,
    /// Sandbox shells already built for ad-hoc programs, keyed by program
    /// text. Shared so repeated evals reuse the registered hash.
    sandboxed: DashMap<String, Arc<Script>>,
}

impl RedisCache {
    /// Connect to the cache store.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let client = Client::open(url).map_err(|e| StorageError::Cache(e.to_string()))?;

        // Startup config: fast-fail on a bad URL instead of hanging
        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: RedisError| StorageError::Cache(e.to_string()))?;

        Ok(Self::from_connection(connection))
    }

    /// Wrap an existing connection.
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection, sandboxed: DashMap::new() }
    }

    /// Get a clone of the connection manager (for sharing with other
    /// components on the same instance).
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    /// Register every bundled program eagerly.
    ///
    /// Optional: the runtime path registers lazily on the first `NOSCRIPT`.
    /// Useful at startup to take the upload off the request path.
    pub async fn load_scripts(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        for script in scripts::all() {
            script
                .register(&mut conn)
                .await
                .map_err(|e| StorageError::Cache(e.to_string()))?;
        }
        info!(count = scripts::all().len(), "mutator programs registered");
        Ok(())
    }

    async fn run(
        &self,
        script: &Script,
        keys: &[&str],
        args: &[Vec<u8>],
    ) -> Result<Value, StorageError> {
        script.run(&self.connection, keys, args).await.map_err(map_redis_err)
    }
}

/// The miss token is raised by the programs with `error("CACHE_MISS")`; the
/// server wraps it in its own error prose, so only the suffix is stable.
fn is_cache_miss(err: &RedisError) -> bool {
    err.to_string().trim_end().ends_with("CACHE_MISS")
}

fn map_redis_err(err: RedisError) -> StorageError {
    if is_cache_miss(&err) {
        StorageError::CacheMiss
    } else {
        StorageError::Cache(err.to_string())
    }
}

fn decode<T: redis::FromRedisValue>(value: &Value) -> Result<T, StorageError> {
    redis::from_redis_value(value)
        .map_err(|e| StorageError::Cache(format!("unexpected script reply: {}", e)))
}

/// Decode the `{key, packed}` pair returned by the dirty-queue programs.
fn decode_cursor(value: Value) -> Result<Option<(String, Record)>, StorageError> {
    if matches!(value, Value::Nil) {
        return Ok(None);
    }
    let (key, buf): (String, Vec<u8>) = decode(&value)?;
    Ok(Some((key, Record::unpack(&buf)?)))
}

fn convert(value: Value) -> Result<EvalValue, StorageError> {
    Ok(match value {
        Value::Nil => EvalValue::Nil,
        Value::Int(i) => EvalValue::Int(i),
        Value::BulkString(b) => EvalValue::Bytes(b),
        Value::SimpleString(s) => EvalValue::Bytes(s.into_bytes()),
        Value::Okay => EvalValue::Bytes(b"OK".to_vec()),
        Value::Array(items) => {
            EvalValue::Array(items.into_iter().map(convert).collect::<Result<Vec<_>, _>>()?)
        }
        other => {
            return Err(StorageError::Cache(format!("unsupported script reply: {:?}", other)))
        }
    })
}

fn ttl_secs(ttl: Duration) -> Vec<u8> {
    // EX 0 is refused by the server; a loaded record always outlives the
    // retry that follows it.
    ttl.as_secs().max(1).to_string().into_bytes()
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str, add_if_absent: Option<&[u8]>) -> Result<Record, StorageError> {
        let mut args = Vec::with_capacity(1);
        if let Some(default) = add_if_absent {
            args.push(default.to_vec());
        }
        let reply = self.run(&scripts::GET, &[key], &args).await?;
        let buf: Vec<u8> = decode(&reply)?;
        Record::unpack(&buf)
    }

    async fn set(&self, key: &str, val: &[u8]) -> Result<i64, StorageError> {
        let reply = self.run(&scripts::SET, &[key], &[val.to_vec()]).await?;
        decode(&reply)
    }

    async fn add(&self, key: &str, val: &[u8]) -> Result<bool, StorageError> {
        let reply = self.run(&scripts::ADD, &[key], &[val.to_vec()]).await?;
        let created: i64 = decode(&reply)?;
        Ok(created == 1)
    }

    async fn load(&self, key: &str, record: &Record, ttl: Duration) -> Result<(), StorageError> {
        let packed = record.pack()?;
        self.run(&scripts::LOAD, &[key], &[packed, ttl_secs(ttl)]).await?;
        Ok(())
    }

    async fn eval(
        &self,
        key: &str,
        src: &str,
        args: &[Vec<u8>],
    ) -> Result<EvalValue, StorageError> {
        let script = self
            .sandboxed
            .entry(src.to_string())
            .or_insert_with(|| Arc::new(Script::new(scripts::sandbox_source(src))))
            .clone();
        let reply = self.run(&script, &[key], args).await?;
        convert(reply)
    }

    async fn push(
        &self,
        key: &str,
        val: &[u8],
        capacity: u32,
        strategy: OverflowStrategy,
    ) -> Result<i64, StorageError> {
        let args = [
            val.to_vec(),
            capacity.to_string().into_bytes(),
            (strategy as i32).to_string().into_bytes(),
        ];
        let reply = self.run(&scripts::MB_PUSH, &[key], &args).await?;
        decode(&reply)
    }

    async fn pull(&self, key: &str, ids: &[i64]) -> Result<Vec<i64>, StorageError> {
        let args: Vec<Vec<u8>> = ids.iter().map(|id| id.to_string().into_bytes()).collect();
        let reply = self.run(&scripts::MB_PULL, &[key], &args).await?;
        decode(&reply)
    }

    async fn clean(&self, key: &str) -> Result<u64, StorageError> {
        let reply = self.run(&scripts::MB_CLEAN, &[key], &[]).await?;
        let purged: i64 = decode(&reply)?;
        Ok(purged.max(0) as u64)
    }

    async fn peek(&self) -> Result<Option<(String, Record)>, StorageError> {
        let reply = self.run(&scripts::PEEK, &[], &[]).await?;
        decode_cursor(reply)
    }

    async fn next(
        &self,
        key: &str,
        rev: i64,
        ttl: Duration,
    ) -> Result<Option<(String, Record)>, StorageError> {
        let args = [rev.to_string().into_bytes(), ttl_secs(ttl)];
        let reply = self.run(&scripts::NEXT, &[key], &args).await?;
        decode_cursor(reply)
    }

    async fn dirty_stats(&self) -> Result<DirtyStats, StorageError> {
        let mut conn = self.connection.clone();
        let mut pipeline = redis::pipe();
        pipeline.cmd("LLEN").arg(scripts::DIRTY_QUE);
        pipeline.cmd("SCARD").arg(scripts::DIRTY_SET);
        let (queued, tracked): (u64, u64) = pipeline
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Cache(e.to_string()))?;
        Ok(DirtyStats { queued, tracked })
    }
}
