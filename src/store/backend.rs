//! Record persistence backends.
//!
//! The store only needs an ordered key-value layout keyed by
//! `(entity_id, version)`. [`LocalBackend`] keeps everything in memory and,
//! when given a path, rewrites a JSON file after every mutation. A mutation
//! whose write fails is rolled back in memory.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Fields, Version, VersionedRecord};
use crate::error::Result;
use crate::utils::fs::write_atomic;

/// Storage seam for versioned records.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// All records of entities whose id sorts strictly after `after`
    /// (or every record when `after` is `None`), ordered by entity then version.
    async fn scan(&self, after: Option<&str>) -> Result<Vec<VersionedRecord>>;

    /// Every stored version of one entity, ascending.
    async fn versions(&self, entity_id: &str) -> Result<Vec<VersionedRecord>>;

    /// Upsert exactly one `(entity_id, version)` record.
    async fn put(&self, record: VersionedRecord) -> Result<()>;

    /// Remove one `(entity_id, version)` record. Returns whether it existed.
    async fn delete(&self, entity_id: &str, version: Version) -> Result<bool>;
}

type RecordMap = BTreeMap<(String, Version), Fields>;

/// In-memory backend with optional JSON-file persistence.
///
/// Clone is cheap; all clones share the same map.
#[derive(Clone)]
pub struct LocalBackend {
    records: Arc<RwLock<RecordMap>>,
    path: Option<PathBuf>,
}

impl LocalBackend {
    /// Backend persisted to `path`. Call [`load`](Self::load) to restore.
    pub fn new(path: PathBuf) -> Self {
        Self {
            records: Arc::new(RwLock::new(BTreeMap::new())),
            path: Some(path),
        }
    }

    pub fn new_in_memory() -> Self {
        Self {
            records: Arc::new(RwLock::new(BTreeMap::new())),
            path: None,
        }
    }

    /// Restore records from the backing file. No-op if the file is missing.
    pub async fn load(&self) -> Result<usize> {
        let Some(ref path) = self.path else {
            return Ok(0);
        };
        if !path.exists() {
            return Ok(0);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let records: Vec<VersionedRecord> = serde_json::from_str(&data)?;
        let count = records.len();
        let mut map = self.records.write().await;
        for r in records {
            map.insert((r.entity_id, r.version), r.fields);
        }
        Ok(count)
    }

    /// Rewrite the backing file from `map`.
    ///
    /// Callers hold the write guard for the whole call, so snapshots reach
    /// disk in mutation order.
    async fn persist(&self, map: &RecordMap) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let records: Vec<VersionedRecord> =
            map.iter().map(|(k, v)| Self::to_record(k, v)).collect();
        let data = serde_json::to_vec_pretty(&records)?;
        write_atomic(path, &data).await
    }

    fn to_record(key: &(String, Version), fields: &Fields) -> VersionedRecord {
        VersionedRecord {
            entity_id: key.0.clone(),
            version: key.1,
            fields: fields.clone(),
        }
    }
}

#[async_trait]
impl RecordBackend for LocalBackend {
    async fn scan(&self, after: Option<&str>) -> Result<Vec<VersionedRecord>> {
        let map = self.records.read().await;
        let records = match after {
            // Every key of `after` itself sorts below (after, Version::MAX).
            Some(after) => map
                .range((
                    Bound::Excluded((after.to_string(), Version::MAX)),
                    Bound::Unbounded,
                ))
                .map(|(k, v)| Self::to_record(k, v))
                .collect(),
            None => map.iter().map(|(k, v)| Self::to_record(k, v)).collect(),
        };
        Ok(records)
    }

    async fn versions(&self, entity_id: &str) -> Result<Vec<VersionedRecord>> {
        let map = self.records.read().await;
        Ok(map
            .range((entity_id.to_string(), Version::MIN)..=(entity_id.to_string(), Version::MAX))
            .map(|(k, v)| Self::to_record(k, v))
            .collect())
    }

    async fn put(&self, record: VersionedRecord) -> Result<()> {
        let mut map = self.records.write().await;
        let key = (record.entity_id, record.version);
        let previous = map.insert(key.clone(), record.fields);
        if let Err(e) = self.persist(&map).await {
            match previous {
                Some(fields) => map.insert(key, fields),
                None => map.remove(&key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, entity_id: &str, version: Version) -> Result<bool> {
        let mut map = self.records.write().await;
        let key = (entity_id.to_string(), version);
        let Some(fields) = map.remove(&key) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&map).await {
            map.insert(key, fields);
            return Err(e);
        }
        Ok(true)
    }
}
