//! AI response caching: canonical serialization, key derivation, TTL store.

pub mod canonical;
pub mod key;
pub mod response_cache;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub use key::{derive_key, CacheKey, KeyPrefix};
pub use response_cache::{CacheEntry, ResponseCache};

/// Storage seam for invocation results.
///
/// Any key-value store with per-entry expiry satisfies it; [`ResponseCache`]
/// is the in-process implementation.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Return the live payload for `key`, or `None` if absent or expired.
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>>;

    /// Store `payload` under `key`, visible for `ttl`.
    async fn put(&self, key: &CacheKey, payload: Value, ttl: Duration) -> Result<()>;
}

/// Response cache section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// JSON file the cache is persisted to. `None` keeps it in memory.
    pub path: Option<PathBuf>,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_entries: 1000,
        }
    }
}

impl CacheConfig {
    /// Build the cache this section describes.
    pub fn open(&self) -> ResponseCache {
        match self.path.clone() {
            Some(path) => ResponseCache::persistent(path, self.max_entries),
            None => ResponseCache::in_memory(self.max_entries),
        }
    }
}
