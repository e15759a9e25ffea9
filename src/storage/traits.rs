use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::keymap::DocAddress;
use crate::mailbox::OverflowStrategy;
use crate::record::Record;

#[derive(Error, Debug)]
pub enum StorageError {
    /// No record under the key. Internal: drives the load-and-retry path and
    /// is never surfaced by the client.
    #[error("record not in cache")]
    CacheMiss,
    #[error("cache store error: {0}")]
    Cache(String),
    #[error("document store error: {0}")]
    Document(String),
    #[error("malformed packed record: {0}")]
    Codec(String),
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),
}

/// A script return value, backend-neutral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalValue {
    Nil,
    Int(i64),
    Bytes(Vec<u8>),
    Array(Vec<EvalValue>),
}

/// Dirty-structure sizes, for inspection. Coherent backends keep
/// `queued == tracked` at every quiescent point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyStats {
    /// Dirty-queue length.
    pub queued: u64,
    /// Dirty-set cardinality.
    pub tracked: u64,
}

/// The atomic mutator surface of the cache store.
///
/// Every method is a single indivisible step on the store side: record
/// mutation, revision bump and dirty-structure bookkeeping commit together
/// or not at all. Methods that find no record under the key return
/// [`StorageError::CacheMiss`].
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read the record. With `add_if_absent`, atomically turns a tombstone
    /// into `rev=1` with the given payload and marks it dirty.
    async fn get(&self, key: &str, add_if_absent: Option<&[u8]>) -> Result<Record, StorageError>;

    /// Replace the payload, bump the revision, mark dirty. Returns the new
    /// revision.
    async fn set(&self, key: &str, val: &[u8]) -> Result<i64, StorageError>;

    /// Create the payload only over a tombstone. Returns false when the
    /// record already holds a value.
    async fn add(&self, key: &str, val: &[u8]) -> Result<bool, StorageError>;

    /// Install a record fetched from the document store, with expiry. Kept
    /// out when the cache already holds a revision at least as new; never
    /// marks the key dirty.
    async fn load(&self, key: &str, record: &Record, ttl: Duration) -> Result<(), StorageError>;

    /// Run a user program in the sandboxed mutator shell: the payload is
    /// exposed as a mutable `VALUE` binding and any change commits with a
    /// revision bump. Scripted backends only.
    async fn eval(&self, key: &str, src: &str, args: &[Vec<u8>])
        -> Result<EvalValue, StorageError>;

    /// Mailbox append. Returns the assigned id, or -1 when full under the
    /// reject strategy.
    async fn push(
        &self,
        key: &str,
        val: &[u8],
        capacity: u32,
        strategy: OverflowStrategy,
    ) -> Result<i64, StorageError>;

    /// Mailbox removal. `ids` must be ascending; returns the ids actually
    /// removed.
    async fn pull(&self, key: &str, ids: &[i64]) -> Result<Vec<i64>, StorageError>;

    /// Empty the mailbox, preserving its sequence. Returns the purged count.
    async fn clean(&self, key: &str) -> Result<u64, StorageError>;

    /// Inspect the tail of the dirty queue: the oldest dirty `(key, record)`
    /// pair, or `None` when drained. An entry whose record was evicted is
    /// dropped from both structures in passing.
    async fn peek(&self) -> Result<Option<(String, Record)>, StorageError>;

    /// Advance past a flushed record and peek the next. The key is cleaned
    /// and made volatile only when its cached revision still equals `rev`;
    /// otherwise the entry is rotated to the queue head and stays dirty.
    async fn next(
        &self,
        key: &str,
        rev: i64,
        ttl: Duration,
    ) -> Result<Option<(String, Record)>, StorageError>;

    /// Dirty-queue length and dirty-set cardinality.
    async fn dirty_stats(&self) -> Result<DirtyStats, StorageError>;
}

/// The durable document store behind the cache.
#[async_trait]
pub trait DocStore: Send + Sync {
    /// Read one document. `None` when the document does not exist.
    async fn find_one(&self, addr: &DocAddress) -> Result<Option<Record>, StorageError>;

    /// Upsert the full record under the address. Revision-idempotent:
    /// repeating an upsert with the same record yields the same document.
    async fn upsert(&self, addr: &DocAddress, record: &Record) -> Result<(), StorageError>;
}
