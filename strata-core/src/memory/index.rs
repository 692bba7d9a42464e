//! Secondary indexes for the durable tier.

use crate::types::{IndexDescriptor, IndexKind, MemoryEntry, MemoryType};
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Split text into lowercase alphanumeric terms.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Whether `text` contains every term of `query` as a whole word.
pub fn contains_all_terms(text: &str, query: &str) -> bool {
    let words: BTreeSet<String> = tokenize(text).collect();
    tokenize(query).all(|term| words.contains(&term))
}

/// Terms an entry was indexed under, kept so a re-index can undo them.
#[derive(Debug, Default, Clone)]
struct Postings {
    terms: BTreeSet<String>,
    entry_type: Option<MemoryType>,
    tags: BTreeSet<String>,
    metadata: Vec<(String, String)>,
}

/// Full-text, by-type, by-tags and by-metadata indexes.
///
/// Created empty at startup and maintained on every write; the periodic
/// index update rebuilds them from the adapter.
#[derive(Debug)]
pub struct DurableIndexes {
    full_text: HashMap<String, BTreeSet<String>>,
    by_type: HashMap<MemoryType, BTreeSet<String>>,
    by_tag: HashMap<String, BTreeSet<String>>,
    by_metadata: HashMap<String, HashMap<String, BTreeSet<String>>>,
    deleted: BTreeSet<String>,
    postings: HashMap<String, Postings>,
    descriptors: Vec<IndexDescriptor>,
}

impl Default for DurableIndexes {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableIndexes {
    pub fn new() -> Self {
        let now = Utc::now();
        let descriptor = |name: &str, kind, fields: &[&str]| IndexDescriptor {
            name: name.to_string(),
            kind,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            last_updated: now,
        };
        Self {
            full_text: HashMap::new(),
            by_type: HashMap::new(),
            by_tag: HashMap::new(),
            by_metadata: HashMap::new(),
            deleted: BTreeSet::new(),
            postings: HashMap::new(),
            descriptors: vec![
                descriptor("full_text", IndexKind::FullText, &["content"]),
                descriptor("by_type", IndexKind::MetadataField, &["type"]),
                descriptor("by_tags", IndexKind::MetadataField, &["tags"]),
                descriptor("by_metadata", IndexKind::MetadataField, &["metadata"]),
            ],
        }
    }

    pub fn descriptors(&self) -> &[IndexDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.postings.contains_key(id)
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        self.deleted.contains(id)
    }

    /// Index a batch of entries, replacing earlier postings for the same ids.
    pub fn insert_batch<'a>(&mut self, entries: impl IntoIterator<Item = &'a MemoryEntry>) {
        for entry in entries {
            self.insert_one(entry);
        }
        self.touch();
    }

    pub fn insert(&mut self, entry: &MemoryEntry) {
        self.insert_one(entry);
        self.touch();
    }

    pub fn remove(&mut self, id: &str) {
        self.remove_one(id);
        self.touch();
    }

    /// Drop everything and index `entries` from scratch.
    pub fn rebuild(&mut self, entries: &[MemoryEntry]) {
        self.full_text.clear();
        self.by_type.clear();
        self.by_tag.clear();
        self.by_metadata.clear();
        self.deleted.clear();
        self.postings.clear();
        self.insert_batch(entries);
    }

    /// Ids containing every term of `query`. An empty query matches all ids.
    pub fn search_text(&self, query: &str) -> BTreeSet<String> {
        let terms: Vec<String> = tokenize(query).collect();
        if terms.is_empty() {
            return self.postings.keys().cloned().collect();
        }

        let mut result: Option<BTreeSet<String>> = None;
        for term in &terms {
            let ids = self.full_text.get(term).cloned().unwrap_or_default();
            result = Some(match result {
                Some(acc) => acc.intersection(&ids).cloned().collect(),
                None => ids,
            });
        }
        result.unwrap_or_default()
    }

    pub fn by_type(&self, entry_type: MemoryType) -> BTreeSet<String> {
        self.by_type.get(&entry_type).cloned().unwrap_or_default()
    }

    pub fn by_tag(&self, tag: &str) -> BTreeSet<String> {
        self.by_tag.get(tag).cloned().unwrap_or_default()
    }

    pub fn by_metadata(&self, field: &str, value: &Value) -> BTreeSet<String> {
        self.by_metadata
            .get(field)
            .and_then(|values| values.get(&value.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn insert_one(&mut self, entry: &MemoryEntry) {
        self.remove_one(&entry.id);

        let postings = Postings {
            terms: tokenize(&entry.text()).collect(),
            entry_type: Some(entry.entry_type),
            tags: entry.tags.clone(),
            metadata: entry
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
        };

        for term in &postings.terms {
            self.full_text
                .entry(term.clone())
                .or_default()
                .insert(entry.id.clone());
        }
        self.by_type
            .entry(entry.entry_type)
            .or_default()
            .insert(entry.id.clone());
        for tag in &postings.tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(entry.id.clone());
        }
        for (field, value) in &postings.metadata {
            self.by_metadata
                .entry(field.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(entry.id.clone());
        }
        if entry.deleted {
            self.deleted.insert(entry.id.clone());
        }
        self.postings.insert(entry.id.clone(), postings);
    }

    fn remove_one(&mut self, id: &str) {
        let Some(postings) = self.postings.remove(id) else {
            return;
        };
        for term in &postings.terms {
            drop_id(&mut self.full_text, term, id);
        }
        if let Some(entry_type) = postings.entry_type {
            drop_id(&mut self.by_type, &entry_type, id);
        }
        for tag in &postings.tags {
            drop_id(&mut self.by_tag, tag, id);
        }
        for (field, value) in &postings.metadata {
            if let Some(values) = self.by_metadata.get_mut(field) {
                drop_id(values, value, id);
                if values.is_empty() {
                    self.by_metadata.remove(field);
                }
            }
        }
        self.deleted.remove(id);
    }

    fn touch(&mut self) {
        let now = Utc::now();
        for descriptor in &mut self.descriptors {
            descriptor.last_updated = now;
        }
    }
}

fn drop_id<K, Q>(index: &mut HashMap<K, BTreeSet<String>>, key: &Q, id: &str)
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + ?Sized,
{
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str, entry_type: MemoryType, content: &str) -> MemoryEntry {
        MemoryEntry::new(entry_type, "u", content).with_id(id)
    }

    #[test]
    fn test_tokenize() {
        let terms: Vec<String> = tokenize("Fix: the Borrow-checker, now!").collect();
        assert_eq!(terms, vec!["fix", "the", "borrow", "checker", "now"]);
    }

    #[test]
    fn test_full_text_requires_all_terms() {
        let mut idx = DurableIndexes::new();
        idx.insert_batch(&[
            entry("a", MemoryType::Knowledge, "tokio runtime tuning"),
            entry("b", MemoryType::Knowledge, "tokio channels"),
        ]);
        assert_eq!(idx.search_text("tokio").len(), 2);
        assert_eq!(
            idx.search_text("Tokio runtime").into_iter().collect::<Vec<_>>(),
            vec!["a"]
        );
        assert!(idx.search_text("tokio python").is_empty());
        assert_eq!(idx.search_text("").len(), 2);
    }

    #[test]
    fn test_reindex_replaces_postings() {
        let mut idx = DurableIndexes::new();
        idx.insert(&entry("a", MemoryType::Knowledge, "old words").with_tag("x"));
        idx.insert(&entry("a", MemoryType::Profile, "new words").with_metadata("status", "done"));

        assert!(idx.search_text("old").is_empty());
        assert_eq!(idx.search_text("new").len(), 1);
        assert!(idx.by_type(MemoryType::Knowledge).is_empty());
        assert_eq!(idx.by_type(MemoryType::Profile).len(), 1);
        assert!(idx.by_tag("x").is_empty());
        assert_eq!(idx.by_metadata("status", &json!("done")).len(), 1);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_remove_and_rebuild() {
        let mut idx = DurableIndexes::new();
        let mut deleted = entry("b", MemoryType::Knowledge, "gone");
        deleted.deleted = true;
        idx.insert_batch(&[entry("a", MemoryType::Knowledge, "kept"), deleted.clone()]);
        assert!(idx.is_deleted("b"));

        idx.remove("a");
        assert!(!idx.contains("a"));
        assert!(idx.search_text("kept").is_empty());

        idx.rebuild(&[entry("c", MemoryType::Knowledge, "fresh")]);
        assert_eq!(idx.len(), 1);
        assert!(!idx.is_deleted("b"));
        assert_eq!(idx.descriptors().len(), 4);
    }
}
