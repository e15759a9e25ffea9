// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mailbox operations: a bounded, ordered list with generated ids, encoded
//! inside a record's payload.
//!
//! Built entirely on the sandboxed mutator shell: the mailbox programs
//! unpack the payload, mutate the `{seq, que}` sub-record and commit through
//! the same revision/dirty discipline as scalar writes. The outer record
//! machinery treats the payload as opaque; only the mailbox programs and
//! this client understand its shape.
//!
//! Ids are assigned from the mailbox sequence, so they are strictly
//! increasing across pushes and the queue stays sorted by id.

use crate::client::{CacheClient, CacheError};
use crate::record::{Mail, Mailbox};
use crate::storage::traits::StorageError;

/// What a push does when the mailbox is at capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(i32)]
pub enum OverflowStrategy {
    /// Refuse the push; the caller gets [`CacheError::MailboxFull`].
    #[default]
    Reject = 0,
    /// Drop the oldest items to make room.
    Ring = 1,
}

/// Push settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct PushOptions {
    /// Maximum queue length after the push. 0 = unbounded.
    pub capacity: u32,
    /// Overflow behavior when `capacity` is reached.
    pub strategy: OverflowStrategy,
}

impl PushOptions {
    #[must_use]
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Drop oldest items instead of rejecting when full.
    #[must_use]
    pub fn ring(mut self) -> Self {
        self.strategy = OverflowStrategy::Ring;
        self
    }
}

/// Mailbox operations over a [`CacheClient`].
///
/// The miss → load → retry protocol applies to every operation, exactly as
/// for scalar reads and writes.
#[derive(Clone)]
pub struct MailClient {
    client: CacheClient,
}

impl MailClient {
    pub fn new(client: CacheClient) -> Self {
        Self { client }
    }

    /// List items in push order. A key that was never written is
    /// [`CacheError::NotFound`]; a written-then-emptied mailbox lists as
    /// empty.
    pub async fn list(&self, key: &str) -> Result<Vec<Mail>, CacheError> {
        let (_rev, val) = self.client.get(key).await?;
        Ok(Mailbox::unpack_or_default(&val)?.que)
    }

    /// Append an item, creating the mailbox if the key was never written.
    /// Returns the assigned id.
    pub async fn push(
        &self,
        key: &str,
        val: &[u8],
        opts: PushOptions,
    ) -> Result<i64, CacheError> {
        let id = match self.rpush(key, val, opts).await {
            Err(StorageError::CacheMiss) => {
                self.client.load(key).await?;
                match self.rpush(key, val, opts).await {
                    Err(StorageError::CacheMiss) => return Err(CacheError::Evicted),
                    result => result?,
                }
            }
            result => result?,
        };
        if id == -1 {
            return Err(CacheError::MailboxFull);
        }
        Ok(id)
    }

    /// Remove items by id. Ids not present are skipped; the removed ids are
    /// returned in ascending order. Pulling an id twice removes it once.
    pub async fn pull(&self, key: &str, ids: &[i64]) -> Result<Vec<i64>, CacheError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut ids = ids.to_vec();
        ids.sort_unstable(); // the removal program expects ascending ids
        match self.rpull(key, &ids).await {
            Err(StorageError::CacheMiss) => {
                self.client.load(key).await?;
                match self.rpull(key, &ids).await {
                    Err(StorageError::CacheMiss) => Err(CacheError::Evicted),
                    result => Ok(result?),
                }
            }
            result => Ok(result?),
        }
    }

    /// Remove every item, keeping the id sequence. Returns the purged
    /// count.
    pub async fn clean(&self, key: &str) -> Result<u64, CacheError> {
        match self.rclean(key).await {
            Err(StorageError::CacheMiss) => {
                self.client.load(key).await?;
                match self.rclean(key).await {
                    Err(StorageError::CacheMiss) => Err(CacheError::Evicted),
                    result => Ok(result?),
                }
            }
            result => Ok(result?),
        }
    }

    async fn rpush(
        &self,
        key: &str,
        val: &[u8],
        opts: PushOptions,
    ) -> Result<i64, StorageError> {
        self.client
            .observe(self.client.cache().push(key, val, opts.capacity, opts.strategy).await)
    }

    async fn rpull(&self, key: &str, ids: &[i64]) -> Result<Vec<i64>, StorageError> {
        self.client.observe(self.client.cache().pull(key, ids).await)
    }

    async fn rclean(&self, key: &str) -> Result<u64, StorageError> {
        self.client.observe(self.client.cache().clean(key).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::storage::{MemoryCache, MemoryDocStore};

    fn mail_client() -> MailClient {
        MailClient::new(CacheClient::new(
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryDocStore::new()),
        ))
    }

    #[tokio::test]
    async fn test_push_assigns_sequential_ids() {
        let mail = mail_client();
        for want in 1..=10 {
            let id = mail.push("box", b"hello", PushOptions::default()).await.unwrap();
            assert_eq!(id, want);
        }
        let items = mail.list("box").await.unwrap();
        assert_eq!(items.len(), 10);
        assert!(items.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn test_pull_removes_from_front() {
        let mail = mail_client();
        for _ in 0..10 {
            mail.push("box", b"hello", PushOptions::default()).await.unwrap();
        }
        let pulled = mail.pull("box", &[1]).await.unwrap();
        assert_eq!(pulled, vec![1]);

        let items = mail.list("box").await.unwrap();
        assert_eq!(items.len(), 9);
        assert_eq!(items[0].id, 2);
    }

    #[tokio::test]
    async fn test_pull_collapses_duplicates_and_skips_missing() {
        let mail = mail_client();
        for _ in 0..10 {
            mail.push("box", b"m", PushOptions::default()).await.unwrap();
        }
        let pulled = mail.pull("box", &[5, 5, 7]).await.unwrap();
        assert_eq!(pulled, vec![5, 7]);

        let ids: Vec<i64> = mail.list("box").await.unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 6, 8, 9, 10]);
    }

    #[tokio::test]
    async fn test_pull_nothing_is_a_no_op() {
        let mail = mail_client();
        assert_eq!(mail.pull("box", &[]).await.unwrap(), Vec::<i64>::new());
        // No load was triggered: the key is still unknown
        let err = mail.list("box").await.unwrap_err();
        assert!(matches!(err, CacheError::NotFound));
    }

    #[tokio::test]
    async fn test_reject_strategy_reports_full() {
        let mail = mail_client();
        let opts = PushOptions::default().capacity(2);
        mail.push("box", b"a", opts).await.unwrap();
        mail.push("box", b"b", opts).await.unwrap();
        let err = mail.push("box", b"c", opts).await.unwrap_err();
        assert!(matches!(err, CacheError::MailboxFull));

        assert_eq!(mail.list("box").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ring_strategy_drops_oldest() {
        let mail = mail_client();
        let opts = PushOptions::default().capacity(3).ring();
        for _ in 0..4 {
            mail.push("box", b"m", opts).await.unwrap();
        }
        let items = mail.list("box").await.unwrap();
        let ids: Vec<i64> = items.iter().map(|m| m.id).collect();
        // The last three pushes survive; the sequence kept counting
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_clean_then_list_is_empty() {
        let mail = mail_client();
        for _ in 0..5 {
            mail.push("box", b"m", PushOptions::default()).await.unwrap();
        }
        assert_eq!(mail.clean("box").await.unwrap(), 5);
        assert_eq!(mail.list("box").await.unwrap().len(), 0);
    }
}
