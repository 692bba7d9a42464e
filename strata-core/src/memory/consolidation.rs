//! Memory consolidation strategies.
//!
//! A strategy looks at every entry an owner holds across tiers and returns a
//! plan: entries to remove and entries to create. The coordinator carries
//! the plan out against the tiers, so strategies stay pure.

use super::index::tokenize;
use crate::error::{Error, Result};
use crate::types::{MemoryEntry, MemoryType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Which consolidation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationKind {
    DuplicateRemoval,
    PatternExtraction,
    ObsoleteCleanup,
}

impl ConsolidationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateRemoval => "duplicate_removal",
            Self::PatternExtraction => "pattern_extraction",
            Self::ObsoleteCleanup => "obsolete_cleanup",
        }
    }
}

impl std::fmt::Display for ConsolidationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConsolidationKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.replace('-', "_").as_str() {
            "duplicate_removal" => Ok(Self::DuplicateRemoval),
            "pattern_extraction" => Ok(Self::PatternExtraction),
            "obsolete_cleanup" => Ok(Self::ObsoleteCleanup),
            _ => Err(Error::validation(format!("Unknown consolidation kind: {}", s))),
        }
    }
}

/// What a strategy wants done.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsolidationPlan {
    pub remove: Vec<String>,
    pub create: Vec<MemoryEntry>,
}

/// A pluggable consolidation algorithm.
pub trait ConsolidationStrategy: Send + Sync {
    fn kind(&self) -> ConsolidationKind;

    fn plan(&self, owner_id: &str, entries: &[MemoryEntry], now: DateTime<Utc>) -> ConsolidationPlan;
}

/// Jaccard similarity of the lowercase whitespace token sets of two texts.
///
/// Two empty texts are identical; one empty text shares nothing.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let a_words: HashSet<&str> = a_lower.split_whitespace().collect();
    let b_words: HashSet<&str> = b_lower.split_whitespace().collect();

    if a_words.is_empty() && b_words.is_empty() {
        return 1.0;
    }
    if a_words.is_empty() || b_words.is_empty() {
        return 0.0;
    }

    let intersection = a_words.intersection(&b_words).count();
    let union = a_words.union(&b_words).count();
    intersection as f64 / union as f64
}

/// Whether two entries are duplicates: same content hash, or token overlap
/// at or above `threshold`.
pub fn are_similar(a: &MemoryEntry, b: &MemoryEntry, threshold: f64) -> bool {
    if a.entry_type != b.entry_type {
        return false;
    }
    if a.content_hash() == b.content_hash() {
        return true;
    }
    jaccard_similarity(&a.text(), &b.text()) >= threshold
}

// ─────────────────────────────────────────────────────────────────────────────
// Duplicate Removal
// ─────────────────────────────────────────────────────────────────────────────

/// Keeps the most recently updated entry of each group of near-duplicates.
#[derive(Debug, Clone)]
pub struct DuplicateRemoval {
    pub similarity_threshold: f64,
}

impl Default for DuplicateRemoval {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
        }
    }
}

impl ConsolidationStrategy for DuplicateRemoval {
    fn kind(&self) -> ConsolidationKind {
        ConsolidationKind::DuplicateRemoval
    }

    fn plan(&self, _owner_id: &str, entries: &[MemoryEntry], _now: DateTime<Utc>) -> ConsolidationPlan {
        let mut live: Vec<&MemoryEntry> = entries.iter().filter(|e| !e.deleted).collect();
        live.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));

        let mut kept: Vec<&MemoryEntry> = Vec::new();
        let mut plan = ConsolidationPlan::default();
        for entry in live {
            if kept
                .iter()
                .any(|k| k.id == entry.id || are_similar(k, entry, self.similarity_threshold))
            {
                if !kept.iter().any(|k| k.id == entry.id) {
                    plan.remove.push(entry.id.clone());
                }
            } else {
                kept.push(entry);
            }
        }
        plan
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pattern Extraction
// ─────────────────────────────────────────────────────────────────────────────

/// Records terms that recur across many entries as `code_pattern` entries.
#[derive(Debug, Clone)]
pub struct PatternExtraction {
    /// Entries a term must appear in (default: 3)
    pub min_support: usize,
    /// Terms shorter than this are ignored (default: 4)
    pub min_term_len: usize,
    /// Patterns produced per run (default: 10)
    pub max_patterns: usize,
}

impl Default for PatternExtraction {
    fn default() -> Self {
        Self {
            min_support: 3,
            min_term_len: 4,
            max_patterns: 10,
        }
    }
}

/// Marks entries produced by consolidation so they are not mined again.
pub const CONSOLIDATION_ORIGIN: &str = "consolidation";

impl ConsolidationStrategy for PatternExtraction {
    fn kind(&self) -> ConsolidationKind {
        ConsolidationKind::PatternExtraction
    }

    fn plan(&self, owner_id: &str, entries: &[MemoryEntry], _now: DateTime<Utc>) -> ConsolidationPlan {
        let mut support: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for entry in entries.iter().filter(|e| {
            !e.deleted && e.metadata.get("origin").and_then(|v| v.as_str()) != Some(CONSOLIDATION_ORIGIN)
        }) {
            for term in tokenize(&entry.text()).filter(|t| t.chars().count() >= self.min_term_len) {
                support.entry(term).or_default().insert(entry.id.clone());
            }
        }

        let mut frequent: Vec<(String, BTreeSet<String>)> = support
            .into_iter()
            .filter(|(_, ids)| ids.len() >= self.min_support.max(1))
            .collect();
        frequent.sort_by(|(ta, a), (tb, b)| b.len().cmp(&a.len()).then_with(|| ta.cmp(tb)));

        let create = frequent
            .into_iter()
            .take(self.max_patterns)
            .map(|(term, ids)| {
                let id = pattern_id(owner_id, &term);
                MemoryEntry::new(
                    MemoryType::CodePattern,
                    owner_id,
                    json!({ "pattern": term, "support": ids.len(), "sources": ids }),
                )
                .with_id(id)
                .with_tag("pattern")
                .with_metadata("origin", CONSOLIDATION_ORIGIN)
            })
            .collect();

        ConsolidationPlan {
            remove: Vec::new(),
            create,
        }
    }
}

/// Stable id so re-running extraction overwrites rather than duplicates.
fn pattern_id(owner_id: &str, term: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(term.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("pattern-{}", &digest[..16])
}

// ─────────────────────────────────────────────────────────────────────────────
// Obsolete Cleanup
// ─────────────────────────────────────────────────────────────────────────────

/// Removes soft-deleted, expired and long-unaccessed entries.
#[derive(Debug, Clone)]
pub struct ObsoleteCleanup {
    /// Entries not accessed for this many seconds are obsolete (default: 30 days)
    pub max_idle_secs: i64,
}

impl Default for ObsoleteCleanup {
    fn default() -> Self {
        Self {
            max_idle_secs: 86_400 * 30,
        }
    }
}

impl ConsolidationStrategy for ObsoleteCleanup {
    fn kind(&self) -> ConsolidationKind {
        ConsolidationKind::ObsoleteCleanup
    }

    fn plan(&self, _owner_id: &str, entries: &[MemoryEntry], now: DateTime<Utc>) -> ConsolidationPlan {
        let idle_cutoff = now - chrono::Duration::seconds(self.max_idle_secs);
        let remove = entries
            .iter()
            .filter(|e| e.deleted || e.is_expired_at(now) || e.accessed_at < idle_cutoff)
            .map(|e| e.id.clone())
            .collect();
        ConsolidationPlan {
            remove,
            create: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_entry(id: &str, content: &str, age_secs: i64) -> MemoryEntry {
        let mut entry = MemoryEntry::new(MemoryType::Knowledge, "user-1", content).with_id(id);
        let at = Utc::now() - chrono::Duration::seconds(age_secs);
        entry.created_at = at;
        entry.updated_at = at;
        entry.accessed_at = at;
        entry
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Similarity Tests
    // ─────────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_jaccard_similarity() {
        assert_eq!(jaccard_similarity("a b c", "A B C"), 1.0);
        assert_eq!(jaccard_similarity("a b", "c d"), 0.0);
        assert!((jaccard_similarity("a b c", "a b d") - 0.5).abs() < 1e-9);
        assert_eq!(jaccard_similarity("", ""), 1.0);
        assert_eq!(jaccard_similarity("", "x"), 0.0);
    }

    #[test]
    fn test_are_similar_requires_same_type() {
        let a = create_test_entry("a", "same words", 0);
        let mut b = create_test_entry("b", "same words", 0);
        assert!(are_similar(&a, &b, 0.85));
        b.entry_type = MemoryType::Profile;
        assert!(!are_similar(&a, &b, 0.85));
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Strategy Tests
    // ─────────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_duplicate_removal_keeps_newest() {
        let entries = vec![
            create_test_entry("old", "use tokio for async io", 100),
            create_test_entry("new", "use tokio for async io", 10),
            create_test_entry("other", "completely different text", 50),
        ];
        let plan = DuplicateRemoval::default().plan("user-1", &entries, Utc::now());
        assert_eq!(plan.remove, vec!["old".to_string()]);
        assert!(plan.create.is_empty());
    }

    #[test]
    fn test_duplicate_removal_same_id_in_two_tiers() {
        let entries = vec![
            create_test_entry("a", "shared text", 10),
            create_test_entry("a", "shared text", 10),
        ];
        let plan = DuplicateRemoval::default().plan("user-1", &entries, Utc::now());
        assert!(plan.remove.is_empty());
    }

    #[test]
    fn test_pattern_extraction() {
        let entries = vec![
            create_test_entry("1", "builder pattern for config", 0),
            create_test_entry("2", "the builder returns self", 0),
            create_test_entry("3", "builder with defaults", 0),
            create_test_entry("4", "unrelated note", 0),
        ];
        let plan = PatternExtraction::default().plan("user-1", &entries, Utc::now());
        assert_eq!(plan.create.len(), 1);
        let pattern = &plan.create[0];
        assert_eq!(pattern.entry_type, MemoryType::CodePattern);
        assert_eq!(pattern.content["pattern"], "builder");
        assert_eq!(pattern.content["support"], 3);

        // Stable ids, and generated entries are not mined again.
        let mut again = entries.clone();
        again.push(pattern.clone());
        let second = PatternExtraction::default().plan("user-1", &again, Utc::now());
        assert_eq!(second.create[0].id, pattern.id);
        assert_eq!(second.create[0].content["support"], 3);
    }

    #[test]
    fn test_obsolete_cleanup() {
        let mut deleted = create_test_entry("deleted", "x", 0);
        deleted.deleted = true;
        let mut expired = create_test_entry("expired", "x", 120);
        expired.ttl_secs = Some(60);
        let idle = create_test_entry("idle", "x", 86_400 * 31);
        let fresh = create_test_entry("fresh", "x", 5);

        let plan = ObsoleteCleanup::default().plan(
            "user-1",
            &[deleted, expired, idle, fresh],
            Utc::now(),
        );
        assert_eq!(plan.remove, vec!["deleted", "expired", "idle"]);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(
            "duplicate-removal".parse::<ConsolidationKind>().unwrap(),
            ConsolidationKind::DuplicateRemoval
        );
        assert!("defragment".parse::<ConsolidationKind>().unwrap_err().kind()
            == crate::error::ErrorKind::Validation);
    }
}
