//! Content-addressed cache keys for AI invocations.
//!
//! A key has two parts, mirroring a partitioned key-value layout:
//!
//! | part        | format                                                  |
//! |-------------|---------------------------------------------------------|
//! | `partition` | `STOCK#<subject>`                                       |
//! | `sort`      | `AI#<request_type>#<version>#<YYYY-MM-DD>#<params_hash>` |
//!
//! The calendar date is part of the key, so identical requests on different
//! days never share an entry: caching is bounded to same-day reuse.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::canonical;

/// Length of the truncated hex digest used in keys.
pub const PARAMS_HASH_LEN: usize = 16;

const SEPARATOR: char = '#';

/// The fixed vocabulary of key prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPrefix {
    /// Partition of everything that concerns one subject.
    Stock,
    /// AI invocation results, under a subject partition.
    Ai,
    /// Versioned record metadata, under a subject partition.
    Meta,
}

impl KeyPrefix {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stock => "STOCK",
            Self::Ai => "AI",
            Self::Meta => "META",
        }
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hash a canonical string to a short, fixed-length lowercase hex token.
///
/// SHA-256 truncated to [`PARAMS_HASH_LEN`] characters. Collisions are an
/// accepted risk; this is not a security boundary.
pub fn hash(serialized: &str) -> String {
    let digest = Sha256::digest(serialized.as_bytes());
    let mut hex = hex::encode(&digest[..]);
    hex.truncate(PARAMS_HASH_LEN);
    hex
}

/// Hash of the canonical serialization of `params`.
pub fn params_hash(params: &Value) -> String {
    hash(&canonical::serialize(params))
}

/// A composite cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub partition: String,
    pub sort: String,
}

impl CacheKey {
    /// Start building a key for `subject_id`.
    pub fn builder(subject_id: &str) -> CacheKeyBuilder {
        CacheKeyBuilder {
            subject_id: subject_id.to_string(),
            request_type: String::new(),
            version: String::new(),
            day: None,
            params_hash: String::new(),
        }
    }

    /// Single-string form used as the map key in storage.
    pub fn storage_key(&self) -> String {
        format!("{}|{}", self.partition, self.sort)
    }

    /// Short prefix of the sort key's hash, for log lines.
    pub fn short(&self) -> &str {
        let hash = self.sort.rsplit(SEPARATOR).next().unwrap_or("");
        &hash[..8.min(hash.len())]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition, self.sort)
    }
}

/// Typed builder for [`CacheKey`]; the only place key strings are assembled.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    subject_id: String,
    request_type: String,
    version: String,
    day: Option<NaiveDate>,
    params_hash: String,
}

impl CacheKeyBuilder {
    pub fn request_type(mut self, request_type: &str) -> Self {
        self.request_type = request_type.to_string();
        self
    }

    pub fn version(mut self, version: impl fmt::Display) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn day(mut self, day: NaiveDate) -> Self {
        self.day = Some(day);
        self
    }

    pub fn params(mut self, params: &Value) -> Self {
        self.params_hash = params_hash(params);
        self
    }

    pub fn build(self) -> CacheKey {
        let day = self
            .day
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        CacheKey {
            partition: format!("{}{SEPARATOR}{}", KeyPrefix::Stock, self.subject_id),
            sort: [
                KeyPrefix::Ai.as_str(),
                self.request_type.as_str(),
                self.version.as_str(),
                day.as_str(),
                self.params_hash.as_str(),
            ]
            .join(&SEPARATOR.to_string()),
        }
    }
}

/// Derive the cache key for one invocation on calendar day `day`.
pub fn derive_key(
    subject_id: &str,
    request_type: &str,
    version: i32,
    params: &Value,
    day: NaiveDate,
) -> CacheKey {
    CacheKey::builder(subject_id)
        .request_type(request_type)
        .version(version)
        .day(day)
        .params(params)
        .build()
}
