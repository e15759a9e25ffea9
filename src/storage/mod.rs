//! Storage backends.
//!
//! The cache side and the document side each sit behind a trait
//! ([`traits::CacheStore`], [`traits::DocStore`]) so the client and the
//! synchronizer stay backend-agnostic. Production deployments pair the Redis
//! cache with the MongoDB document store; the memory backends carry the same
//! semantics for tests and embedded use.

pub mod memory;
pub mod mongo;
pub mod redis;
pub mod traits;

pub use memory::{MemoryCache, MemoryDocStore};
pub use mongo::MongoStore;
pub use redis::RedisCache;
pub use traits::{CacheStore, DirtyStats, DocStore, EvalValue, StorageError};
