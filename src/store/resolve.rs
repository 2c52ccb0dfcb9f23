//! Point-in-time resolution over a sparse version timeline.
//!
//! For a query at version `V`, an entity resolves to its record with the
//! largest version `<= V`. Entities whose earliest version is after `V` are
//! absent; nothing is ever forward-filled from a later version.
//!
//! Everything here is pure and synchronous: it operates on records already
//! fetched from the backend.

use std::collections::BTreeMap;

use super::{ResolvedRecord, Version, VersionedRecord};

/// Pick the record of a single entity visible at `as_of`.
pub fn resolve_entity<'a, I>(versions: I, as_of: Version) -> Option<&'a VersionedRecord>
where
    I: IntoIterator<Item = &'a VersionedRecord>,
{
    versions
        .into_iter()
        .filter(|r| r.version <= as_of)
        .max_by_key(|r| r.version)
}

/// Resolve a mixed set of records (many entities, many versions) at `as_of`.
///
/// Output is ordered by entity id.
pub fn resolve_at<'a, I>(records: I, as_of: Version) -> Vec<ResolvedRecord>
where
    I: IntoIterator<Item = &'a VersionedRecord>,
{
    let mut by_entity: BTreeMap<&str, Vec<&VersionedRecord>> = BTreeMap::new();
    for record in records {
        by_entity
            .entry(record.entity_id.as_str())
            .or_default()
            .push(record);
    }
    by_entity
        .into_values()
        .filter_map(|versions| resolve_entity(versions, as_of))
        .map(|record| ResolvedRecord::from_record(record, as_of))
        .collect()
}
