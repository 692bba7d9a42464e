//! Multi-factor ranking of context candidates.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use super::types::ContextEntry;
use crate::config::ScoreWeights;

/// Importance bonus for an entry matching a caller preference.
pub const PREFERENCE_BONUS: f64 = 0.2;

/// Age bucket score: newer is better.
pub fn recency_score(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let minutes = (now - timestamp).num_minutes();
    match minutes {
        m if m < 5 => 1.0,
        m if m < 30 => 0.8,
        m if m < 60 => 0.6,
        m if m < 24 * 60 => 0.4,
        _ => 0.2,
    }
}

/// Whether any preference key/value appears in the entry metadata.
pub fn matches_preferences(entry: &ContextEntry, preferences: &serde_json::Map<String, Value>) -> bool {
    preferences
        .iter()
        .any(|(key, value)| entry.metadata.get(key) == Some(value))
}

/// Source importance scaled by relative source weight, plus the preference bonus.
pub fn importance_score(
    entry: &ContextEntry,
    relative_weight: f64,
    preferences: &serde_json::Map<String, Value>,
) -> f64 {
    let declared = entry
        .metadata
        .get("importance")
        .and_then(Value::as_f64)
        .unwrap_or(1.0)
        .clamp(0.0, 1.0);
    let mut importance = declared * relative_weight;
    if matches_preferences(entry, preferences) {
        importance += PREFERENCE_BONUS;
    }
    importance.min(1.0)
}

/// Keep entries whose metadata carries every filter key/value.
pub fn apply_filters(entries: Vec<ContextEntry>, filters: &serde_json::Map<String, Value>) -> Vec<ContextEntry> {
    if filters.is_empty() {
        return entries;
    }
    entries
        .into_iter()
        .filter(|e| filters.iter().all(|(k, v)| e.metadata.get(k) == Some(v)))
        .collect()
}

/// Score every entry and sort descending.
///
/// `source_weights` holds the weight of each queried source; the largest one
/// counts as 1. The sort is stable so equal scores keep source order.
pub fn rank(
    mut entries: Vec<ContextEntry>,
    weights: &ScoreWeights,
    source_weights: &HashMap<String, f64>,
    preferences: &serde_json::Map<String, Value>,
    now: DateTime<Utc>,
) -> Vec<ContextEntry> {
    let max_weight = source_weights.values().copied().fold(0.0_f64, f64::max);

    for entry in &mut entries {
        let relative = match source_weights.get(&entry.source_id) {
            Some(w) if max_weight > 0.0 => w / max_weight,
            _ => 0.0,
        };
        entry.score = entry.relevance_score * weights.relevance
            + recency_score(entry.timestamp, now) * weights.recency
            + importance_score(entry, relative, preferences) * weights.importance;
    }

    entries.sort_by(|a, b| b.score.total_cmp(&a.score));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::{Map, json};

    fn weights() -> HashMap<String, f64> {
        HashMap::from([("primary".to_string(), 1.0), ("secondary".to_string(), 0.5)])
    }

    #[test]
    fn test_recency_buckets() {
        let now = Utc::now();
        assert_eq!(recency_score(now - Duration::minutes(1), now), 1.0);
        assert_eq!(recency_score(now - Duration::minutes(10), now), 0.8);
        assert_eq!(recency_score(now - Duration::minutes(45), now), 0.6);
        assert_eq!(recency_score(now - Duration::hours(5), now), 0.4);
        assert_eq!(recency_score(now - Duration::days(3), now), 0.2);
    }

    #[test]
    fn test_importance_bonus_is_capped() {
        let entry = ContextEntry::new("primary", "x", 0.5).with_metadata("lang", "rust");
        let prefs = Map::from_iter([("lang".to_string(), json!("rust"))]);

        assert_eq!(importance_score(&entry, 1.0, &prefs), 1.0);
        assert!((importance_score(&entry, 0.5, &prefs) - 0.7).abs() < 1e-9);
        assert!((importance_score(&entry, 0.5, &Map::new()) - 0.5).abs() < 1e-9);

        let low = ContextEntry::new("primary", "x", 0.5).with_metadata("importance", 0.25);
        assert!((importance_score(&low, 1.0, &Map::new()) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_heavier_source_ranks_first_at_equal_relevance() {
        let now = Utc::now();
        let entries = vec![
            ContextEntry::new("secondary", "from the lighter source", 0.7).with_timestamp(now),
            ContextEntry::new("primary", "from the heavier source", 0.7).with_timestamp(now),
        ];

        let ranked = rank(entries, &ScoreWeights::default(), &weights(), &Map::new(), now);
        assert_eq!(ranked[0].source_id, "primary");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn test_ties_keep_source_order() {
        let now = Utc::now();
        let entries: Vec<_> = (0..4)
            .map(|i| ContextEntry::new("primary", format!("entry {i}"), 0.5).with_timestamp(now))
            .collect();

        let ranked = rank(entries, &ScoreWeights::default(), &weights(), &Map::new(), now);
        let order: Vec<_> = ranked.iter().map(|e| e.text()).collect();
        assert_eq!(order, vec!["entry 0", "entry 1", "entry 2", "entry 3"]);
    }

    #[test]
    fn test_filters_require_every_pair() {
        let entries = vec![
            ContextEntry::new("primary", "a", 0.5).with_metadata("lang", "rust").with_metadata("kind", "bug"),
            ContextEntry::new("primary", "b", 0.5).with_metadata("lang", "rust"),
        ];
        let filters = Map::from_iter([
            ("lang".to_string(), json!("rust")),
            ("kind".to_string(), json!("bug")),
        ]);

        let kept = apply_filters(entries, &filters);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text(), "a");
    }
}
