//! Per-entry version history and rollback reconstruction.

use crate::error::{Error, Result};
use crate::types::{FieldChange, MemoryEntry, MemoryVersion};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Bounded version chains, oldest record first.
#[derive(Debug)]
pub struct VersionHistory {
    max_versions: usize,
    chains: HashMap<String, VecDeque<MemoryVersion>>,
}

impl VersionHistory {
    pub fn new(max_versions: usize) -> Self {
        Self {
            max_versions: max_versions.max(1),
            chains: HashMap::new(),
        }
    }

    pub fn is_loaded(&self, memory_id: &str) -> bool {
        self.chains.contains_key(memory_id)
    }

    /// Install a chain read back from storage.
    pub fn load(&mut self, memory_id: &str, versions: Vec<MemoryVersion>) {
        let mut chain: VecDeque<MemoryVersion> = versions.into();
        while chain.len() > self.max_versions {
            chain.pop_front();
        }
        self.chains.insert(memory_id.to_string(), chain);
    }

    /// Append a record, dropping the oldest ones beyond the retention limit.
    pub fn record(&mut self, version: MemoryVersion) -> Vec<MemoryVersion> {
        let chain = self.chains.entry(version.memory_id.clone()).or_default();
        chain.push_back(version);
        while chain.len() > self.max_versions {
            chain.pop_front();
        }
        chain.iter().cloned().collect()
    }

    pub fn chain(&self, memory_id: &str) -> Vec<MemoryVersion> {
        self.chains
            .get(memory_id)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove(&mut self, memory_id: &str) {
        self.chains.remove(memory_id);
    }
}

/// Build a version record describing `changes` applied to `current`.
pub fn version_record(
    current: &MemoryEntry,
    changes: BTreeMap<String, FieldChange>,
    reason: &str,
    author: &str,
) -> MemoryVersion {
    MemoryVersion {
        memory_id: current.id.clone(),
        version: current.version,
        changes,
        reason: reason.to_string(),
        author: author.to_string(),
        created_at: Utc::now(),
    }
}

/// The order changes are applied in: the whole metadata map before any
/// single metadata key, then by name. Rollback replays the reverse.
fn application_order<'a, T>(changes: impl Iterator<Item = (&'a String, T)>) -> Vec<(&'a String, T)> {
    let mut ordered: Vec<_> = changes.collect();
    ordered.sort_by(|(a, _), (b, _)| (a.as_str() != "metadata", a).cmp(&(b.as_str() != "metadata", b)));
    ordered
}

/// Apply a field map to a copy of `current`.
///
/// Returns the changed entry (version not yet bumped) together with the
/// old/new value of every named field. `current` is left untouched on error.
pub fn apply_changes(
    current: &MemoryEntry,
    fields: &Map<String, Value>,
) -> Result<(MemoryEntry, BTreeMap<String, FieldChange>)> {
    if fields.is_empty() {
        return Err(Error::validation("update requires at least one field"));
    }

    let mut updated = current.clone();
    let mut changes = BTreeMap::new();
    for (field, value) in application_order(fields.iter()) {
        let old = updated.field_value(field);
        updated.apply_field(field, Some(value.clone()))?;
        let new = updated.field_value(field);
        changes.insert(field.clone(), FieldChange { old, new });
    }
    Ok((updated, changes))
}

/// Reconstruct the state of `current` as it was at `target` version.
///
/// Walks the chain backwards from the newest record, restoring each
/// record's old values. Every record between `target` and the current
/// version must still be retained.
pub fn reconstruct(
    current: &MemoryEntry,
    chain: &[MemoryVersion],
    target: u64,
) -> Result<(MemoryEntry, BTreeMap<String, FieldChange>)> {
    if target < 1 || target >= current.version {
        return Err(Error::validation(format!(
            "cannot roll back {} from version {} to version {}",
            current.id, current.version, target
        )));
    }

    let mut state = current.clone();
    let mut touched = BTreeSet::new();
    for version in (target..current.version).rev() {
        let record = chain
            .iter()
            .find(|r| r.version == version)
            .ok_or_else(|| Error::not_found("version", format!("{}@{}", current.id, version)))?;
        for (field, change) in application_order(record.changes.iter()).into_iter().rev() {
            state.apply_field(field, change.old.clone())?;
            touched.insert(field.clone());
        }
    }

    let changes = touched
        .into_iter()
        .map(|field| {
            let change = FieldChange {
                old: current.field_value(&field),
                new: state.field_value(&field),
            };
            (field, change)
        })
        .collect();
    Ok((state, changes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryType;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Apply a sequence of updates the way the durable tier does.
    fn evolve(updates: &[Value]) -> (MemoryEntry, Vec<MemoryEntry>, VersionHistory) {
        let mut history = VersionHistory::new(10);
        let mut entry = MemoryEntry::new(MemoryType::Knowledge, "u", "v1")
            .with_id("m")
            .with_metadata("status", "open");
        let mut states = vec![entry.clone()];
        for update in updates {
            let (mut next, changes) = apply_changes(&entry, &fields(update.clone())).unwrap();
            history.record(version_record(&entry, changes, "test", "tester"));
            next.version += 1;
            entry = next;
            states.push(entry.clone());
        }
        (entry, states, history)
    }

    #[test]
    fn test_apply_changes_records_old_and_new() {
        let entry = MemoryEntry::new(MemoryType::Knowledge, "u", "x");
        let (updated, changes) = apply_changes(&entry, &fields(json!({"status": "done"}))).unwrap();
        assert_eq!(updated.metadata.get("status"), Some(&json!("done")));
        let change = &changes["status"];
        assert_eq!(change.old, None);
        assert_eq!(change.new, Some(json!("done")));
    }

    #[test]
    fn test_apply_changes_rejects_empty_and_invalid() {
        let entry = MemoryEntry::new(MemoryType::Knowledge, "u", "x");
        assert!(apply_changes(&entry, &Map::new()).is_err());
        assert!(apply_changes(&entry, &fields(json!({"version": 9}))).is_err());
    }

    #[test]
    fn test_reconstruct_every_prior_version() {
        let (current, states, history) = evolve(&[
            json!({"content": "v2"}),
            json!({"status": "done", "tags": ["a"]}),
            json!({"content": "v4", "priority": 1}),
        ]);
        let chain = history.chain("m");
        for target in 1..current.version {
            let (state, _) = reconstruct(&current, &chain, target).unwrap();
            let expected = &states[(target - 1) as usize];
            assert_eq!(state.content, expected.content, "target {}", target);
            assert_eq!(state.metadata, expected.metadata, "target {}", target);
            assert_eq!(state.tags, expected.tags, "target {}", target);
        }
    }

    #[test]
    fn test_reconstruct_metadata_map_and_key_in_one_update() {
        let (current, states, history) = evolve(&[json!({
            "metadata": {"status": "mid", "k": 1},
            "status": "done",
        })]);
        assert_eq!(current.metadata.get("status"), Some(&json!("done")));
        assert_eq!(current.metadata.get("k"), Some(&json!(1)));

        let (state, changes) = reconstruct(&current, &history.chain("m"), 1).unwrap();
        assert_eq!(state.metadata, states[0].metadata);
        assert_eq!(changes["status"].new, Some(json!("open")));
    }

    #[test]
    fn test_reconstruct_rejects_bad_targets() {
        let (current, _, history) = evolve(&[json!({"content": "v2"})]);
        let chain = history.chain("m");
        assert!(reconstruct(&current, &chain, 0).is_err());
        assert!(reconstruct(&current, &chain, current.version).is_err());
        assert!(reconstruct(&current, &[], 1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_retention_drops_oldest() {
        let mut history = VersionHistory::new(3);
        let entry = MemoryEntry::new(MemoryType::Knowledge, "u", "x").with_id("m");
        for v in 1..=5 {
            let mut e = entry.clone();
            e.version = v;
            history.record(version_record(&e, BTreeMap::new(), "r", "a"));
        }
        let versions: Vec<u64> = history.chain("m").iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![3, 4, 5]);
    }
}
