//! # mirror-cache
//!
//! A write-back caching layer that fronts a durable document store with an
//! in-memory key/value store: reads are answered from the cache and loaded
//! on demand, writes commit atomically in the cache, and a background
//! synchronizer flushes dirty records to the document store in near-FIFO
//! order with a per-record revision guard.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Clients                             │
//! │  • Get / Set / Add on scalar records                        │
//! │  • Push / Pull / List / Clean on mailboxes                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!              (atomic scripted mutation, one round trip)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Cache store (Redis)                       │
//! │  • Packed {rev, val} record per key                         │
//! │  • rev=0 tombstone = cached negative result                 │
//! │  • Dirty set (dedup) + dirty queue (order)                  │
//! └─────────────────────────────────────────────────────────────┘
//!          ▲                                      │
//!   (load on cache miss)              (peek → save → next,
//!          │                           revision-guarded commit)
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Document store (MongoDB)                     │
//! │  • {_id, rev, val} documents, full-record upserts           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mirror_cache::{CacheClient, MailClient, PushOptions, RedisCache, MongoStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = Arc::new(RedisCache::connect("redis://localhost:6379").await?);
//!     let docs = Arc::new(MongoStore::connect("mongodb://localhost:27017").await?);
//!
//!     let client = CacheClient::new(cache, docs);
//!
//!     // Writes are acknowledged on cache commit and flushed to the
//!     // document store by the synchronizer.
//!     let rev = client.set("game:player:1001", b"state").await?;
//!     let (current, state) = client.get("game:player:1001").await?;
//!     assert_eq!(current, rev);
//!     assert_eq!(state, b"state");
//!
//!     // Mailboxes live inside the same records
//!     let mail = MailClient::new(client.clone());
//!     let _id = mail.push("game:inbox:1001", b"welcome!", PushOptions::default()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Guarantees
//!
//! - **Atomic mutators**: every operation is a single server-side program;
//!   revision bump and dirty bookkeeping commit together.
//! - **Read-through**: a cache miss loads the document (or a tombstone for
//!   a missing one) and retries the operation exactly once.
//! - **At-least-once writeback**: a revision mismatch on queue advance
//!   keeps the key dirty, so a concurrent write is never lost on cleanup.
//! - **Write acknowledgement is a cache commit**, not document-store
//!   durability. Cross-key transactions are out of scope.
//!
//! ## Modules
//!
//! - [`client`]: the read/write client and its miss → load → retry loop
//! - [`mailbox`]: bounded ordered mailboxes inside records
//! - [`sync`]: the dirty-queue synchronizer
//! - [`storage`]: backends (Redis, MongoDB, in-memory)
//! - [`record`]: the packed record and mailbox codec
//! - [`keymap`]: cache key → document address mapping
//! - [`config`]: configuration
//! - [`metrics`]: hit/miss/error counters

pub mod client;
pub mod config;
pub mod keymap;
pub mod mailbox;
pub mod metrics;
pub mod record;
pub mod resilience;
pub mod storage;
pub mod sync;

mod script;
mod scripts;

pub use client::{CacheClient, CacheError};
pub use config::{MirrorCacheConfig, SyncConfig};
pub use keymap::{DocAddress, KeyMap, SplitKeyMap};
pub use mailbox::{MailClient, OverflowStrategy, PushOptions};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use record::{Mail, Mailbox, Record};
pub use resilience::retry::RetryConfig;
pub use storage::{
    CacheStore, DirtyStats, DocStore, EvalValue, MemoryCache, MemoryDocStore, MongoStore,
    RedisCache, StorageError,
};
pub use sync::{SyncHooks, Syncer};
