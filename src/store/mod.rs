//! Temporal versioned record store.
//!
//! Records are keyed by `(entity_id, version)`, where the version axis is a
//! yearly epoch. Versions are sparse: an entity may have records for 2020 and
//! 2023 only. Reads resolve "as of version V" by picking, per entity, the
//! latest record at or before V (see [`resolve`]).
//!
//! # Example
//!
//! ```rust
//! # tokio_test::block_on(async {
//! use serde_json::json;
//! use stockdesk::store::{RecordFilter, StoreConfig, VersionedStore};
//!
//! let store = VersionedStore::in_memory(StoreConfig::default());
//! let fields = json!({"name": "Ping An Bank"}).as_object().cloned().unwrap();
//! store.write("000001", 2023, fields).await.unwrap();
//!
//! let page = store.query(2024, None, &RecordFilter::default()).await.unwrap();
//! assert_eq!(page.items.len(), 1);
//! assert!(page.items[0].inherited);
//! # });
//! ```

pub mod backend;
pub mod resolve;
pub mod token;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::cache::{canonical, KeyPrefix};
use crate::error::{Result, StockdeskError};
use crate::normalize::{clean_string_fields, normalize_fields, normalize_value};

pub use backend::{LocalBackend, RecordBackend};
pub use token::ContinuationToken;

/// Position on the version axis.
pub type Version = i32;

/// Open map of named fields.
pub type Fields = Map<String, Value>;

/// Fields searched by a keyword filter.
const KEYWORD_FIELDS: &[&str] = &["name", "code", "industry"];

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file backing the store. `None` keeps records in memory only.
    pub path: Option<PathBuf>,
    /// Maximum items per listing page.
    pub page_size: usize,
    /// Fields normalized to finite numbers on write and read.
    pub numeric_fields: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            page_size: 100,
            numeric_fields: vec![
                "price".to_string(),
                "total_shares".to_string(),
                "circulating_shares".to_string(),
                "market_cap".to_string(),
            ],
        }
    }
}

/// One stored `(entity, version)` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedRecord {
    pub entity_id: String,
    pub version: Version,
    #[serde(default)]
    pub fields: Fields,
}

impl VersionedRecord {
    /// Display key, e.g. `STOCK#000001/META#2023`.
    pub fn key(&self) -> String {
        format!(
            "{}#{}/{}#{}",
            KeyPrefix::Stock,
            self.entity_id,
            KeyPrefix::Meta,
            self.version
        )
    }
}

/// A record as seen from a queried version.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRecord {
    pub entity_id: String,
    /// The stored version that was selected.
    pub resolved_version: Version,
    /// The version the caller asked for.
    pub requested_version: Version,
    /// True when the record was carried forward from an earlier version.
    pub inherited: bool,
    pub fields: Fields,
}

impl ResolvedRecord {
    pub fn from_record(record: &VersionedRecord, requested: Version) -> Self {
        Self {
            entity_id: record.entity_id.clone(),
            resolved_version: record.version,
            requested_version: requested,
            inherited: record.version < requested,
            fields: record.fields.clone(),
        }
    }
}

/// Optional listing filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    /// Case-insensitive substring match across name/code/industry.
    pub keyword: Option<String>,
    /// Match of one attribute. A string also matches a field whose
    /// canonical text form is equal.
    pub attribute: Option<(String, Value)>,
}

impl RecordFilter {
    fn matches(&self, record: &ResolvedRecord) -> bool {
        if let Some((name, expected)) = &self.attribute {
            let hit = match (record.fields.get(name), expected) {
                (Some(actual), expected) if actual == expected => true,
                // Query strings carry text; "2024" matches a numeric 2024.
                (Some(actual), Value::String(text)) => canonical::serialize(actual) == *text,
                _ => false,
            };
            if !hit {
                return false;
            }
        }
        if let Some(keyword) = self.keyword.as_deref().map(str::trim) {
            if keyword.is_empty() {
                return true;
            }
            let needle = keyword.to_lowercase();
            return KEYWORD_FIELDS.iter().any(|f| {
                record
                    .fields
                    .get(*f)
                    .and_then(Value::as_str)
                    .is_some_and(|v| v.to_lowercase().contains(&needle))
            });
        }
        true
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub items: Vec<ResolvedRecord>,
    pub next_token: Option<String>,
}

/// Per-version failure during [`VersionedStore::propagate_attribute`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropagationFailure {
    pub version: Version,
    pub error: String,
}

/// Outcome of a non-atomic attribute propagation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PropagationReport {
    pub updated: Vec<Version>,
    pub failed: Vec<PropagationFailure>,
}

impl PropagationReport {
    /// Every version was updated.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Entity ids are stored trimmed; every entry point looks them up the same way.
fn entity_key(entity_id: &str) -> Result<&str> {
    let entity_id = entity_id.trim();
    if entity_id.is_empty() {
        return Err(StockdeskError::InvalidRequest(
            "entityId is required".to_string(),
        ));
    }
    Ok(entity_id)
}

/// Versioned record store over a pluggable backend.
pub struct VersionedStore {
    backend: Arc<dyn RecordBackend>,
    config: StoreConfig,
}

impl VersionedStore {
    pub fn new(backend: Arc<dyn RecordBackend>, config: StoreConfig) -> Self {
        Self { backend, config }
    }

    pub fn in_memory(config: StoreConfig) -> Self {
        Self::new(Arc::new(LocalBackend::new_in_memory()), config)
    }

    /// Open the store described by `config`, restoring persisted records.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let backend = match config.path.clone() {
            Some(path) => {
                let backend = LocalBackend::new(path.clone());
                let count = backend.load().await?;
                info!(path = %path.display(), records = count, "Record store loaded");
                backend
            }
            None => LocalBackend::new_in_memory(),
        };
        Ok(Self::new(Arc::new(backend), config))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// List entities resolved at `version`, resuming from `token` if it decodes.
    pub async fn query(
        &self,
        version: Version,
        token: Option<&str>,
        filter: &RecordFilter,
    ) -> Result<Page> {
        let resume = match token {
            Some(raw) => {
                let decoded = ContinuationToken::decode(raw);
                if decoded.is_none() {
                    debug!("Stale continuation token, restarting listing");
                }
                decoded
            }
            None => None,
        };
        let after = resume.as_ref().and_then(|t| t.entity().map(str::to_string));

        let snapshot = self.backend.scan(after.as_deref()).await?;
        let page_size = self.config.page_size.max(1);

        let mut items = Vec::new();
        let mut next_token = None;
        for mut record in resolve::resolve_at(&snapshot, version) {
            if !filter.matches(&record) {
                continue;
            }
            if items.len() == page_size {
                next_token = items
                    .last()
                    .map(|r: &ResolvedRecord| ContinuationToken::after_entity(&r.entity_id).encode());
                break;
            }
            normalize_fields(&mut record.fields, &self.config.numeric_fields);
            items.push(record);
        }

        Ok(Page { items, next_token })
    }

    /// Resolve one entity at `version`.
    pub async fn get(&self, entity_id: &str, version: Version) -> Result<ResolvedRecord> {
        let entity_id = entity_key(entity_id)?;
        let versions = self.backend.versions(entity_id).await?;
        let record = resolve::resolve_entity(&versions, version).ok_or_else(|| {
            StockdeskError::NotFound(format!("{entity_id} has no record at or before {version}"))
        })?;
        let mut resolved = ResolvedRecord::from_record(record, version);
        normalize_fields(&mut resolved.fields, &self.config.numeric_fields);
        Ok(resolved)
    }

    /// Upsert exactly `(entity_id, version)`. Other versions are untouched.
    pub async fn write(
        &self,
        entity_id: &str,
        version: Version,
        mut fields: Fields,
    ) -> Result<VersionedRecord> {
        let entity_id = entity_key(entity_id)?;
        clean_string_fields(&mut fields, &self.config.numeric_fields);
        normalize_fields(&mut fields, &self.config.numeric_fields);
        let record = VersionedRecord {
            entity_id: entity_id.to_string(),
            version,
            fields,
        };
        self.backend.put(record.clone()).await?;
        debug!(key = %record.key(), "Record written");
        Ok(record)
    }

    /// Remove exactly `(entity_id, version)`.
    pub async fn delete(&self, entity_id: &str, version: Version) -> Result<()> {
        let entity_id = entity_key(entity_id)?;
        if self.backend.delete(entity_id, version).await? {
            Ok(())
        } else {
            Err(StockdeskError::NotFound(format!(
                "{entity_id} has no record at version {version}"
            )))
        }
    }

    /// Write `attribute = value` onto every existing version of `entity_id`.
    ///
    /// Not atomic: each version is written independently, and a failure on
    /// one version does not roll back or stop the others. Failures are
    /// collected in the report and are not retried.
    pub async fn propagate_attribute(
        &self,
        entity_id: &str,
        attribute: &str,
        value: Value,
    ) -> Result<PropagationReport> {
        let entity_id = entity_key(entity_id)?;
        if attribute.trim().is_empty() {
            return Err(StockdeskError::InvalidRequest(
                "attribute is required".to_string(),
            ));
        }
        let versions = self.backend.versions(entity_id).await?;
        if versions.is_empty() {
            return Err(StockdeskError::NotFound(format!(
                "{entity_id} has no records"
            )));
        }

        let value = if self.config.numeric_fields.iter().any(|f| f == attribute) {
            normalize_value(&value)
        } else {
            value
        };

        let mut report = PropagationReport::default();
        for mut record in versions {
            let version = record.version;
            record.fields.insert(attribute.to_string(), value.clone());
            match self.backend.put(record).await {
                Ok(()) => report.updated.push(version),
                Err(e) => {
                    warn!(entity = %entity_id, version, error = %e, "Attribute propagation failed");
                    report.failed.push(PropagationFailure {
                        version,
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(
            entity = %entity_id,
            attribute = %attribute,
            updated = report.updated.len(),
            failed = report.failed.len(),
            "Attribute propagated"
        );
        Ok(report)
    }
}
