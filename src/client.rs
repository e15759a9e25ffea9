//! The cache client.
//!
//! All reads and writes land on the cache store as atomic scripted
//! mutations. When a mutator reports that no record exists under the key,
//! the client fetches the document from the document store, installs it in
//! the cache (a missing document is installed as a `rev=0` tombstone, so
//! repeated lookups don't re-hit the document store), and retries the
//! mutation **once**. A second miss means eviction raced the load; that is
//! surfaced as [`CacheError::Evicted`] and retrying is at the caller's
//! discretion.
//!
//! Writes are acknowledged on cache commit. Durability is asynchronous: the
//! [`crate::sync::Syncer`] flushes dirty records to the document store in
//! the background.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::keymap::{KeyMap, SplitKeyMap};
use crate::metrics::CacheMetrics;
use crate::record::Record;
use crate::storage::traits::{CacheStore, DirtyStats, DocStore, EvalValue, StorageError};

/// Expiry for loaded records and flushed keys when none is configured.
pub(crate) const DEFAULT_VOLATILE_TTL: Duration = Duration::from_secs(86_400);

#[derive(Error, Debug)]
pub enum CacheError {
    /// The record was never written (tombstone), or the document is absent.
    #[error("record not found")]
    NotFound,
    /// `add` on a record that already holds a value.
    #[error("record already exists")]
    AlreadyExists,
    /// Push rejected by a mailbox at capacity.
    #[error("mailbox is full")]
    MailboxFull,
    /// The record vanished between load and retry: eviction raced the
    /// load. The caller may retry.
    #[error("record evicted while loading")]
    Evicted,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Thread-safe handle to the cache + document store pair. Clones share the
/// backends and the metrics counters.
#[derive(Clone)]
pub struct CacheClient {
    cache: Arc<dyn CacheStore>,
    docs: Arc<dyn DocStore>,
    keymap: Arc<dyn KeyMap>,
    metrics: Arc<CacheMetrics>,
    volatile_ttl: Duration,
}

impl CacheClient {
    pub fn new(cache: Arc<dyn CacheStore>, docs: Arc<dyn DocStore>) -> Self {
        Self {
            cache,
            docs,
            keymap: Arc::new(SplitKeyMap::default()),
            metrics: Arc::new(CacheMetrics::default()),
            volatile_ttl: DEFAULT_VOLATILE_TTL,
        }
    }

    /// Replace the key mapping. Must match the synchronizer's.
    #[must_use]
    pub fn with_keymap(mut self, keymap: Arc<dyn KeyMap>) -> Self {
        self.keymap = keymap;
        self
    }

    /// Expiry applied to records installed by a load.
    #[must_use]
    pub fn with_volatile_ttl(mut self, ttl: Duration) -> Self {
        self.volatile_ttl = ttl;
        self
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Read a record. Loads from the document store on a cache miss.
    pub async fn get(&self, key: &str) -> Result<(i64, Vec<u8>), CacheError> {
        self.get_impl(key, None).await
    }

    /// Read a record, atomically creating it with `default` if it was never
    /// written. The creation is a write: it bumps the revision to 1 and
    /// marks the key dirty.
    pub async fn get_or_add(
        &self,
        key: &str,
        default: &[u8],
    ) -> Result<(i64, Vec<u8>), CacheError> {
        self.get_impl(key, Some(default)).await
    }

    async fn get_impl(
        &self,
        key: &str,
        default: Option<&[u8]>,
    ) -> Result<(i64, Vec<u8>), CacheError> {
        let record = match self.rget(key, default).await {
            Err(StorageError::CacheMiss) => {
                self.load(key).await?;
                match self.rget(key, default).await {
                    Err(StorageError::CacheMiss) => return Err(CacheError::Evicted),
                    result => result?,
                }
            }
            result => result?,
        };
        if record.rev == 0 {
            return Err(CacheError::NotFound);
        }
        Ok((record.rev, record.val))
    }

    /// Write a record, creating it if necessary. Returns the new revision.
    ///
    /// The write is acknowledged on cache commit; the synchronizer flushes
    /// it to the document store later.
    pub async fn set(&self, key: &str, val: &[u8]) -> Result<i64, CacheError> {
        match self.rset(key, val).await {
            Err(StorageError::CacheMiss) => {
                self.load(key).await?;
                match self.rset(key, val).await {
                    Err(StorageError::CacheMiss) => Err(CacheError::Evicted),
                    result => Ok(result?),
                }
            }
            result => Ok(result?),
        }
    }

    /// Create a record. Fails with [`CacheError::AlreadyExists`] when the
    /// key already holds a value (in cache or in the document store).
    pub async fn add(&self, key: &str, val: &[u8]) -> Result<(), CacheError> {
        let created = match self.radd(key, val).await {
            Err(StorageError::CacheMiss) => {
                self.load(key).await?;
                match self.radd(key, val).await {
                    Err(StorageError::CacheMiss) => return Err(CacheError::Evicted),
                    result => result?,
                }
            }
            result => result?,
        };
        if !created {
            return Err(CacheError::AlreadyExists);
        }
        Ok(())
    }

    /// Run a custom program against the record in the sandboxed mutator
    /// shell (see [`CacheStore::eval`]). The miss → load → retry protocol
    /// applies like for any other mutator.
    pub async fn eval(
        &self,
        key: &str,
        src: &str,
        args: &[Vec<u8>],
    ) -> Result<EvalValue, CacheError> {
        match self.reval(key, src, args).await {
            Err(StorageError::CacheMiss) => {
                self.load(key).await?;
                match self.reval(key, src, args).await {
                    Err(StorageError::CacheMiss) => Err(CacheError::Evicted),
                    result => Ok(result?),
                }
            }
            result => Ok(result?),
        }
    }

    /// Dirty-queue length and dirty-set cardinality.
    pub async fn dirty_stats(&self) -> Result<DirtyStats, CacheError> {
        Ok(self.cache.dirty_stats().await?)
    }

    async fn rget(&self, key: &str, default: Option<&[u8]>) -> Result<Record, StorageError> {
        self.observe(self.cache.get(key, default).await)
    }

    async fn rset(&self, key: &str, val: &[u8]) -> Result<i64, StorageError> {
        self.observe(self.cache.set(key, val).await)
    }

    async fn radd(&self, key: &str, val: &[u8]) -> Result<bool, StorageError> {
        self.observe(self.cache.add(key, val).await)
    }

    async fn reval(
        &self,
        key: &str,
        src: &str,
        args: &[Vec<u8>],
    ) -> Result<EvalValue, StorageError> {
        self.observe(self.cache.eval(key, src, args).await)
    }

    /// Fetch the document behind `key` and install it in the cache. A
    /// missing document is installed as a tombstone. The cache-side load
    /// keeps the installed record out when it already holds a newer
    /// revision.
    ///
    /// Document store errors are not retried here; they surface to the
    /// caller.
    pub(crate) async fn load(&self, key: &str) -> Result<(), CacheError> {
        let addr = self.keymap.map(key);
        let loaded = match self.docs.find_one(&addr).await {
            Ok(Some(record)) => record,
            Ok(None) => Record::tombstone(),
            Err(err) => {
                self.metrics.record_store_error();
                return Err(err.into());
            }
        };
        debug!(key, rev = loaded.rev, "record loaded from document store");
        self.observe(self.cache.load(key, &loaded, self.volatile_ttl).await)?;
        Ok(())
    }

    pub(crate) fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub(crate) fn observe<T>(&self, result: Result<T, StorageError>) -> Result<T, StorageError> {
        match &result {
            Ok(_) => self.metrics.record_hit(),
            Err(StorageError::CacheMiss) => self.metrics.record_miss(),
            Err(StorageError::Codec(_)) => self.metrics.record_codec_error(),
            Err(_) => self.metrics.record_store_error(),
        }
        result
    }
}
