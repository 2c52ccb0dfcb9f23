//! AI response cache with absolute expiry and optional JSON persistence.
//!
//! Entries are keyed by [`CacheKey`] and hold the validated model payload.
//! Each entry records its creation time and an absolute expiry; expired
//! entries are invisible to `get` and reclaimed on the next `put`. When the
//! store reaches capacity the oldest entry is evicted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::key::CacheKey;
use super::CacheStore;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::utils::fs::write_atomic;

/// A single cached invocation result. Never updated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// The validated structured payload, without the `cached` annotation.
    pub payload: Value,
    /// Unix timestamp when the entry was created.
    pub created_at: i64,
    /// Unix timestamp after which the entry is invisible.
    pub expires_at: i64,
}

impl CacheEntry {
    fn is_live(&self, now: i64) -> bool {
        now < self.expires_at
    }
}

/// Persistent store serialized to JSON.
#[derive(Debug, Serialize, Deserialize, Default)]
struct CacheFile {
    entries: HashMap<String, CacheEntry>,
}

/// In-process response cache.
pub struct ResponseCache {
    store: Mutex<CacheFile>,
    path: Option<PathBuf>,
    /// Held from snapshot to rename so file writes land in insert order.
    persist: tokio::sync::Mutex<()>,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    /// Memory-only cache.
    pub fn in_memory(max_entries: usize) -> Self {
        Self::with_clock(None, max_entries, Arc::new(SystemClock))
    }

    /// Cache persisted to `path`, restoring any entries already on disk.
    ///
    /// `max_entries` is clamped to a minimum of 1.
    pub fn persistent(path: PathBuf, max_entries: usize) -> Self {
        Self::with_clock(Some(path), max_entries, Arc::new(SystemClock))
    }

    pub fn with_clock(path: Option<PathBuf>, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        let store = path
            .as_deref()
            .map(Self::load_from_disk)
            .unwrap_or_default();
        Self {
            store: Mutex::new(store),
            path,
            persist: tokio::sync::Mutex::new(()),
            max_entries: max_entries.max(1),
            clock,
        }
    }

    /// Number of entries held, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheFile> {
        self.store.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn now_secs(&self) -> i64 {
        self.clock.now().timestamp()
    }

    fn lookup(&self, key: &CacheKey) -> Option<Value> {
        let now = self.now_secs();
        let store = self.lock();
        let entry = store.entries.get(&key.storage_key())?;
        if entry.is_live(now) {
            Some(entry.payload.clone())
        } else {
            debug!(key = %key.short(), "Cache entry expired");
            None
        }
    }

    fn insert(&self, key: &CacheKey, payload: Value, ttl: Duration) -> Option<String> {
        let now = self.now_secs();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let mut store = self.lock();
        store.entries.retain(|_, e| e.is_live(now));
        while store.entries.len() >= self.max_entries {
            let Some(oldest) = store
                .entries
                .iter()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            debug!(key = %oldest, "Evicting oldest cache entry");
            store.entries.remove(&oldest);
        }
        store.entries.insert(
            key.storage_key(),
            CacheEntry {
                key: key.clone(),
                payload,
                created_at: now,
                expires_at: now.saturating_add(ttl_secs),
            },
        );
        self.path
            .as_ref()
            .and_then(|_| serde_json::to_string_pretty(&*store).ok())
    }

    fn load_from_disk(path: &Path) -> CacheFile {
        match std::fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(store) => store,
                Err(e) => {
                    warn!("Response cache file is corrupt, starting empty: {}", e);
                    CacheFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheFile::default(),
            Err(e) => {
                warn!("Failed to read response cache, starting empty: {}", e);
                CacheFile::default()
            }
        }
    }
}

#[async_trait]
impl CacheStore for ResponseCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>> {
        Ok(self.lookup(key))
    }

    async fn put(&self, key: &CacheKey, payload: Value, ttl: Duration) -> Result<()> {
        let _persist = self.persist.lock().await;
        let snapshot = self.insert(key, payload, ttl);
        if let (Some(path), Some(data)) = (self.path.as_ref(), snapshot) {
            write_atomic(path, data.as_bytes()).await?;
        }
        Ok(())
    }
}
