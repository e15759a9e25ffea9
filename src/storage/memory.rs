//! In-memory backends.
//!
//! [`MemoryCache`] implements the full mutator semantics (revision
//! monotonicity, tombstones, the dirty-set/dirty-queue discipline, volatile
//! expiry, peek/next) behind a single mutex, which models the scripted
//! store's per-key serial execution. [`MemoryDocStore`] is a concurrent map.
//!
//! Both are first-class backends: the test suite runs end-to-end against
//! them, and they are usable as embedded stand-ins where no external store
//! is available. Sandboxed eval is the one scripted-backend capability they
//! cannot honour.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::traits::{CacheStore, DirtyStats, DocStore, EvalValue, StorageError};
use crate::keymap::DocAddress;
use crate::mailbox::OverflowStrategy;
use crate::record::{Mail, Mailbox, Record};

struct Entry {
    record: Record,
    expires_at: Option<Instant>,
}

impl Entry {
    fn persistent(record: Record) -> Self {
        Self { record, expires_at: None }
    }

    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    dirty_que: VecDeque<String>,
    dirty_set: HashSet<String>,
}

impl Inner {
    /// Expired entries read as absent, like any evicted key.
    fn purge_expired(&mut self, key: &str) {
        if self.entries.get(key).is_some_and(Entry::expired) {
            self.entries.remove(key);
        }
    }

    /// Set membership first; the queue push only happens when the key was
    /// not already tracked, so a key appears in the queue at most once.
    fn mark_dirty(&mut self, key: &str) {
        if self.dirty_set.insert(key.to_string()) {
            self.dirty_que.push_front(key.to_string());
        }
    }

    fn drop_dirty(&mut self, key: &str) {
        self.dirty_que.pop_back();
        self.dirty_set.remove(key);
    }

    /// One peek step: inspect the queue tail, dropping an entry whose record
    /// is gone. The caller re-peeks on `None` with a non-empty queue.
    fn peek_step(&mut self) -> Option<(String, Record)> {
        let key = self.dirty_que.back().cloned()?;
        self.purge_expired(&key);
        match self.entries.get(&key) {
            None => {
                self.drop_dirty(&key);
                None
            }
            Some(entry) => Some((key, entry.record.clone())),
        }
    }
}

#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<Inner>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record count, expired entries included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str, add_if_absent: Option<&[u8]>) -> Result<Record, StorageError> {
        let mut inner = self.inner.lock();
        inner.purge_expired(key);
        let Some(entry) = inner.entries.get(key) else {
            return Err(StorageError::CacheMiss);
        };
        let mut record = entry.record.clone();
        if record.rev == 0 {
            if let Some(default) = add_if_absent {
                record = Record { rev: 1, val: default.to_vec() };
                inner.entries.insert(key.to_string(), Entry::persistent(record.clone()));
                inner.mark_dirty(key);
            }
        }
        Ok(record)
    }

    async fn set(&self, key: &str, val: &[u8]) -> Result<i64, StorageError> {
        let mut inner = self.inner.lock();
        inner.purge_expired(key);
        let Some(entry) = inner.entries.get_mut(key) else {
            return Err(StorageError::CacheMiss);
        };
        entry.record.rev += 1;
        entry.record.val = val.to_vec();
        entry.expires_at = None;
        let rev = entry.record.rev;
        inner.mark_dirty(key);
        Ok(rev)
    }

    async fn add(&self, key: &str, val: &[u8]) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock();
        inner.purge_expired(key);
        let Some(entry) = inner.entries.get_mut(key) else {
            return Err(StorageError::CacheMiss);
        };
        if entry.record.rev != 0 {
            return Ok(false);
        }
        entry.record = Record { rev: 1, val: val.to_vec() };
        entry.expires_at = None;
        inner.mark_dirty(key);
        Ok(true)
    }

    async fn load(&self, key: &str, record: &Record, ttl: Duration) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        inner.purge_expired(key);
        let accept = match inner.entries.get(key) {
            None => true,
            Some(existing) => existing.record.rev < record.rev,
        };
        if accept {
            inner.entries.insert(
                key.to_string(),
                Entry { record: record.clone(), expires_at: Some(Instant::now() + ttl) },
            );
        }
        Ok(())
    }

    async fn eval(
        &self,
        _key: &str,
        _src: &str,
        _args: &[Vec<u8>],
    ) -> Result<EvalValue, StorageError> {
        Err(StorageError::Unsupported("sandboxed eval requires a scripted cache store"))
    }

    async fn push(
        &self,
        key: &str,
        val: &[u8],
        capacity: u32,
        strategy: OverflowStrategy,
    ) -> Result<i64, StorageError> {
        let mut inner = self.inner.lock();
        inner.purge_expired(key);
        let Some(entry) = inner.entries.get_mut(key) else {
            return Err(StorageError::CacheMiss);
        };
        let mut mailbox = Mailbox::unpack_or_default(&entry.record.val)?;
        if capacity > 0 && mailbox.que.len() >= capacity as usize {
            match strategy {
                OverflowStrategy::Reject => return Ok(-1),
                OverflowStrategy::Ring => {
                    while mailbox.que.len() >= capacity as usize {
                        mailbox.que.remove(0);
                    }
                }
            }
        }
        mailbox.seq += 1;
        let id = mailbox.seq;
        mailbox.que.push(Mail { id, val: val.to_vec() });
        entry.record.val = mailbox.pack()?;
        entry.record.rev += 1;
        entry.expires_at = None;
        inner.mark_dirty(key);
        Ok(id)
    }

    async fn pull(&self, key: &str, ids: &[i64]) -> Result<Vec<i64>, StorageError> {
        let mut inner = self.inner.lock();
        inner.purge_expired(key);
        let Some(entry) = inner.entries.get_mut(key) else {
            return Err(StorageError::CacheMiss);
        };
        let mut mailbox = Mailbox::unpack_or_default(&entry.record.val)?;
        let before = mailbox.que.len();
        let mut pulled = Vec::new();
        for &id in ids {
            if let Ok(pos) = mailbox.que.binary_search_by_key(&id, |m| m.id) {
                mailbox.que.remove(pos);
                pulled.push(id);
            }
        }
        if mailbox.que.len() != before {
            entry.record.val = mailbox.pack()?;
            entry.record.rev += 1;
            entry.expires_at = None;
            inner.mark_dirty(key);
        }
        Ok(pulled)
    }

    async fn clean(&self, key: &str) -> Result<u64, StorageError> {
        let mut inner = self.inner.lock();
        inner.purge_expired(key);
        let Some(entry) = inner.entries.get_mut(key) else {
            return Err(StorageError::CacheMiss);
        };
        let mut mailbox = Mailbox::unpack_or_default(&entry.record.val)?;
        let purged = mailbox.que.len() as u64;
        if purged > 0 {
            mailbox.que.clear();
            entry.record.val = mailbox.pack()?;
            entry.record.rev += 1;
            entry.expires_at = None;
            inner.mark_dirty(key);
        }
        Ok(purged)
    }

    async fn peek(&self) -> Result<Option<(String, Record)>, StorageError> {
        Ok(self.inner.lock().peek_step())
    }

    async fn next(
        &self,
        key: &str,
        rev: i64,
        ttl: Duration,
    ) -> Result<Option<(String, Record)>, StorageError> {
        enum Advance {
            Drop,
            Commit,
            Defer,
        }

        let mut inner = self.inner.lock();
        if inner.dirty_que.back().map(String::as_str) == Some(key) {
            inner.purge_expired(key);
            let advance = match inner.entries.get(key) {
                None => Advance::Drop,
                Some(entry) if entry.record.rev == rev => Advance::Commit,
                Some(_) => Advance::Defer,
            };
            match advance {
                Advance::Drop => inner.drop_dirty(key),
                Advance::Commit => {
                    inner.drop_dirty(key);
                    if let Some(entry) = inner.entries.get_mut(key) {
                        entry.expires_at = Some(Instant::now() + ttl);
                    }
                }
                Advance::Defer => {
                    if let Some(tail) = inner.dirty_que.pop_back() {
                        inner.dirty_que.push_front(tail);
                    }
                }
            }
        }
        Ok(inner.peek_step())
    }

    async fn dirty_stats(&self) -> Result<DirtyStats, StorageError> {
        let inner = self.inner.lock();
        Ok(DirtyStats {
            queued: inner.dirty_que.len() as u64,
            tracked: inner.dirty_set.len() as u64,
        })
    }
}

#[derive(Default)]
pub struct MemoryDocStore {
    documents: DashMap<String, Record>,
}

impl MemoryDocStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn doc_key(addr: &DocAddress) -> String {
        format!("{}/{}/{}", addr.database, addr.collection, addr.id)
    }
}

#[async_trait]
impl DocStore for MemoryDocStore {
    async fn find_one(&self, addr: &DocAddress) -> Result<Option<Record>, StorageError> {
        Ok(self.documents.get(&Self::doc_key(addr)).map(|r| r.value().clone()))
    }

    async fn upsert(&self, addr: &DocAddress, record: &Record) -> Result<(), StorageError> {
        self.documents.insert(Self::doc_key(addr), record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(86_400);

    async fn seed(cache: &MemoryCache, key: &str, record: Record) {
        // Install via the load path, then leave the entry persistent the way
        // a mutator would.
        cache.load(key, &record, TTL).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_absent_is_cache_miss() {
        let cache = MemoryCache::new();
        let err = cache.get("nope", None).await.unwrap_err();
        assert!(matches!(err, StorageError::CacheMiss));
    }

    #[tokio::test]
    async fn test_get_tombstone_returns_rev_zero() {
        let cache = MemoryCache::new();
        seed(&cache, "k", Record::tombstone()).await;
        let rec = cache.get("k", None).await.unwrap();
        assert_eq!(rec.rev, 0);
    }

    #[tokio::test]
    async fn test_get_add_if_absent_promotes_tombstone() {
        let cache = MemoryCache::new();
        seed(&cache, "k", Record::tombstone()).await;

        let rec = cache.get("k", Some(b"default")).await.unwrap();
        assert_eq!(rec.rev, 1);
        assert_eq!(rec.val, b"default");

        let stats = cache.dirty_stats().await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.tracked, 1);

        // Second get must not re-apply the default
        let rec = cache.get("k", Some(b"other")).await.unwrap();
        assert_eq!(rec.val, b"default");
    }

    #[tokio::test]
    async fn test_set_increments_rev_by_one() {
        let cache = MemoryCache::new();
        seed(&cache, "k", Record::tombstone()).await;
        assert_eq!(cache.set("k", b"a").await.unwrap(), 1);
        assert_eq!(cache.set("k", b"b").await.unwrap(), 2);
        assert_eq!(cache.set("k", b"c").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_repeated_writes_queue_key_once() {
        let cache = MemoryCache::new();
        seed(&cache, "k", Record::tombstone()).await;
        cache.set("k", b"a").await.unwrap();
        cache.set("k", b"b").await.unwrap();
        cache.set("k", b"c").await.unwrap();

        let stats = cache.dirty_stats().await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.tracked, 1);
    }

    #[tokio::test]
    async fn test_add_over_existing_value_is_rejected() {
        let cache = MemoryCache::new();
        seed(&cache, "k", Record::tombstone()).await;
        assert!(cache.add("k", b"first").await.unwrap());
        assert!(!cache.add("k", b"second").await.unwrap());

        let rec = cache.get("k", None).await.unwrap();
        assert_eq!(rec.val, b"first");
    }

    #[tokio::test]
    async fn test_load_keeps_newer_cache_record() {
        let cache = MemoryCache::new();
        seed(&cache, "k", Record { rev: 5, val: b"newer".to_vec() }).await;

        cache.load("k", &Record { rev: 3, val: b"older".to_vec() }, TTL).await.unwrap();
        assert_eq!(cache.get("k", None).await.unwrap().rev, 5);

        cache.load("k", &Record { rev: 9, val: b"newest".to_vec() }, TTL).await.unwrap();
        assert_eq!(cache.get("k", None).await.unwrap().rev, 9);
    }

    #[tokio::test]
    async fn test_loaded_record_expires() {
        let cache = MemoryCache::new();
        cache
            .load("k", &Record { rev: 1, val: b"v".to_vec() }, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(cache.get("k", None).await.is_ok());

        tokio::time::sleep(Duration::from_millis(40)).await;
        let err = cache.get("k", None).await.unwrap_err();
        assert!(matches!(err, StorageError::CacheMiss));
    }

    #[tokio::test]
    async fn test_write_clears_expiry() {
        let cache = MemoryCache::new();
        cache
            .load("k", &Record { rev: 1, val: b"v".to_vec() }, Duration::from_millis(20))
            .await
            .unwrap();
        cache.set("k", b"w").await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("k", None).await.unwrap().rev, 2);
    }

    #[tokio::test]
    async fn test_peek_empty_queue() {
        let cache = MemoryCache::new();
        assert_eq!(cache.peek().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_peek_returns_oldest_write() {
        let cache = MemoryCache::new();
        for key in ["a", "b", "c"] {
            seed(&cache, key, Record::tombstone()).await;
            cache.set(key, key.as_bytes()).await.unwrap();
        }
        let (key, record) = cache.peek().await.unwrap().unwrap();
        assert_eq!(key, "a");
        assert_eq!(record.rev, 1);
    }

    #[tokio::test]
    async fn test_next_commit_cleans_and_expires() {
        let cache = MemoryCache::new();
        seed(&cache, "a", Record::tombstone()).await;
        cache.set("a", b"v").await.unwrap();

        assert_eq!(cache.next("a", 1, TTL).await.unwrap(), None);
        let stats = cache.dirty_stats().await.unwrap();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.tracked, 0);
        // Record still present, now volatile
        assert!(cache.get("a", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_next_rev_mismatch_defers() {
        let cache = MemoryCache::new();
        seed(&cache, "a", Record::tombstone()).await;
        cache.set("a", b"v").await.unwrap();

        // Advance with a stale revision: the key must stay dirty
        let peeked = cache.next("a", 7, TTL).await.unwrap();
        assert_eq!(peeked.map(|(k, _)| k), Some("a".to_string()));
        let stats = cache.dirty_stats().await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.tracked, 1);

        // Advance with the true revision: cleaned
        assert_eq!(cache.next("a", 1, TTL).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_next_ignores_stale_cursor_key() {
        let cache = MemoryCache::new();
        for key in ["a", "b"] {
            seed(&cache, key, Record::tombstone()).await;
            cache.set(key, b"v").await.unwrap();
        }
        // Tail is "a"; advancing past "b" must leave both dirty
        let peeked = cache.next("b", 1, TTL).await.unwrap();
        assert_eq!(peeked.map(|(k, _)| k), Some("a".to_string()));
        assert_eq!(cache.dirty_stats().await.unwrap().queued, 2);
    }

    #[tokio::test]
    async fn test_mailbox_roundtrip() {
        let cache = MemoryCache::new();
        seed(&cache, "mb", Record::tombstone()).await;

        for i in 1..=3 {
            let id = cache
                .push("mb", b"msg", 0, OverflowStrategy::Reject)
                .await
                .unwrap();
            assert_eq!(id, i);
        }
        let pulled = cache.pull("mb", &[1, 3]).await.unwrap();
        assert_eq!(pulled, vec![1, 3]);

        let record = cache.get("mb", None).await.unwrap();
        let mailbox = Mailbox::unpack_or_default(&record.val).unwrap();
        assert_eq!(mailbox.seq, 3);
        assert_eq!(mailbox.que.len(), 1);
        assert_eq!(mailbox.que[0].id, 2);
    }

    #[tokio::test]
    async fn test_clean_preserves_sequence() {
        let cache = MemoryCache::new();
        seed(&cache, "mb", Record::tombstone()).await;
        for _ in 0..4 {
            cache.push("mb", b"m", 0, OverflowStrategy::Reject).await.unwrap();
        }
        assert_eq!(cache.clean("mb").await.unwrap(), 4);
        assert_eq!(cache.clean("mb").await.unwrap(), 0);

        // Sequence survives the purge
        let id = cache.push("mb", b"m", 0, OverflowStrategy::Reject).await.unwrap();
        assert_eq!(id, 5);
    }

    #[tokio::test]
    async fn test_doc_store_roundtrip() {
        let docs = MemoryDocStore::new();
        let addr = DocAddress {
            database: "db".to_string(),
            collection: "coll".to_string(),
            id: "x".to_string(),
        };
        assert!(docs.find_one(&addr).await.unwrap().is_none());

        let rec = Record { rev: 2, val: b"v".to_vec() };
        docs.upsert(&addr, &rec).await.unwrap();
        docs.upsert(&addr, &rec).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs.find_one(&addr).await.unwrap(), Some(rec));
    }
}
