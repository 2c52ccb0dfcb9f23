//! Opaque continuation tokens for paginated listings.
//!
//! A token wraps the backend's resume point (an arbitrary JSON map, like a
//! last-evaluated key) and travels to the client as URL-safe base64 of its
//! JSON form. Anything that does not decode is treated as "no token".

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{Map, Value};
use tracing::debug;

const AFTER_ENTITY: &str = "after";

/// Resume point for a partitioned listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuationToken {
    resume: Map<String, Value>,
}

impl ContinuationToken {
    /// Resume after the given entity id.
    pub fn after_entity(entity_id: &str) -> Self {
        let mut resume = Map::new();
        resume.insert(AFTER_ENTITY.to_string(), Value::String(entity_id.to_string()));
        Self { resume }
    }

    /// Entity id to resume after, if this token carries one.
    pub fn entity(&self) -> Option<&str> {
        self.resume.get(AFTER_ENTITY).and_then(Value::as_str)
    }

    /// Encode to the opaque client-facing form.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(&self.resume).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a client-supplied token. Stale or garbage input yields `None`.
    pub fn decode(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let bytes = match URL_SAFE_NO_PAD.decode(raw) {
            Ok(b) => b,
            Err(e) => {
                debug!("Ignoring undecodable continuation token: {}", e);
                return None;
            }
        };
        match serde_json::from_slice::<Map<String, Value>>(&bytes) {
            Ok(resume) => Some(Self { resume }),
            Err(e) => {
                debug!("Ignoring continuation token with bad payload: {}", e);
                None
            }
        }
    }
}
