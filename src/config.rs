//! Configuration.
//!
//! # Example
//!
//! ```
//! use mirror_cache::MirrorCacheConfig;
//!
//! // Minimal config (uses defaults)
//! let config = MirrorCacheConfig::default();
//! assert_eq!(config.volatile_ttl_secs, 86_400); // 24 h
//!
//! // Full config
//! let config = MirrorCacheConfig {
//!     store_cache: Some("redis://localhost:6379".into()),
//!     store_doc: Some("mongodb://localhost:27017".into()),
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the cache client and the synchronizer.
///
/// All fields have defaults. For production use configure `store_cache` and
/// `store_doc`.
#[derive(Debug, Clone, Deserialize)]
pub struct MirrorCacheConfig {
    /// Cache store connection string (e.g., "redis://localhost:6379")
    #[serde(default)]
    pub store_cache: Option<String>,

    /// Document store connection string (e.g., "mongodb://localhost:27017")
    #[serde(default)]
    pub store_doc: Option<String>,

    /// Synchronizer settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Expiry applied to loaded records and to keys after successful
    /// writeback, in seconds (default: 24 h). With the store's memory policy
    /// set to evict volatile keys, this is what ages cold data out of the
    /// cache.
    #[serde(default = "default_volatile_ttl_secs")]
    pub volatile_ttl_secs: u64,
}

/// Synchronizer settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    /// Writeback pace in records per second. 0 = as fast as the stores
    /// allow.
    #[serde(default)]
    pub rate: u32,
}

fn default_volatile_ttl_secs() -> u64 {
    86_400 // 24 h
}

impl Default for MirrorCacheConfig {
    fn default() -> Self {
        Self {
            store_cache: None,
            store_doc: None,
            sync: SyncConfig::default(),
            volatile_ttl_secs: default_volatile_ttl_secs(),
        }
    }
}

impl MirrorCacheConfig {
    /// The volatile TTL as a [`Duration`].
    pub fn volatile_ttl(&self) -> Duration {
        Duration::from_secs(self.volatile_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MirrorCacheConfig::default();
        assert!(config.store_cache.is_none());
        assert!(config.store_doc.is_none());
        assert_eq!(config.sync.rate, 0);
        assert_eq!(config.volatile_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
store_cache: "redis://cache.internal:6379"
store_doc: "mongodb://docs.internal:27017"
sync:
  rate: 200
"#;
        let config: MirrorCacheConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.store_cache.as_deref(), Some("redis://cache.internal:6379"));
        assert_eq!(config.store_doc.as_deref(), Some("mongodb://docs.internal:27017"));
        assert_eq!(config.sync.rate, 200);
        // Unspecified fields keep their defaults
        assert_eq!(config.volatile_ttl_secs, 86_400);
    }

    #[test]
    fn test_parse_empty_yaml() {
        let config: MirrorCacheConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.store_cache.is_none());
        assert_eq!(config.sync.rate, 0);
    }
}
