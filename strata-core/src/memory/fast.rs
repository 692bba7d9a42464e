//! Fast tier store.
//!
//! Holds recent entries keyed by id with secondary indexes by owner and by
//! session. Entries expire after their TTL and the least recently accessed
//! entries are evicted when the store is full. The warm tier is the same
//! store configured with a longer TTL and a larger capacity.

use super::FastTierConfig;
use super::traits::query_tokens;
use crate::error::{Error, Result};
use crate::types::MemoryEntry;
use chrono::Utc;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

struct Slot {
    entry: MemoryEntry,
    stored_at: Instant,
    ttl: Duration,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= self.ttl
    }
}

/// Counters exposed for health checks and metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastTierStats {
    pub items: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub ttl_evictions: u64,
    pub lru_evictions: u64,
}

/// TTL + LRU bounded store for recent entries.
pub struct FastTierStore {
    name: String,
    config: FastTierConfig,
    // Iteration order is most to least recently accessed.
    entries: LruCache<String, Slot>,
    by_owner: HashMap<String, HashSet<String>>,
    by_session: HashMap<String, HashSet<String>>,
    stats: FastTierStats,
}

impl FastTierStore {
    pub fn new(name: impl Into<String>, config: FastTierConfig) -> Self {
        Self {
            name: name.into(),
            entries: LruCache::unbounded(),
            by_owner: HashMap::new(),
            by_session: HashMap::new(),
            stats: FastTierStats::default(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &FastTierConfig {
        &self.config
    }

    fn max_items(&self) -> usize {
        self.config.max_items.max(1)
    }

    /// Store or overwrite an entry.
    ///
    /// The TTL is taken from the argument, then the entry, then the store
    /// default. A new id arriving at a full store evicts least recently
    /// accessed entries before it is inserted.
    pub fn put(&mut self, entry: MemoryEntry, ttl: Option<Duration>) -> Result<String> {
        entry.validate()?;
        let ttl = ttl
            .or_else(|| entry.ttl())
            .unwrap_or_else(|| self.config.ttl());
        if ttl.is_zero() {
            return Err(Error::validation("ttl must be greater than zero"));
        }

        if let Some(previous) = self.entries.pop(&entry.id) {
            self.unindex(&previous.entry);
        } else if self.entries.len() >= self.max_items() {
            let excess = self.entries.len() + 1 - self.max_items();
            self.evict_lru(excess);
        }

        let id = entry.id.clone();
        self.index(&entry);
        self.entries.put(
            id.clone(),
            Slot {
                entry,
                stored_at: Instant::now(),
                ttl,
            },
        );
        Ok(id)
    }

    /// Fetch an entry, refreshing its access time and recency.
    ///
    /// An expired entry is removed and reported as not found.
    pub fn get(&mut self, id: &str) -> Result<MemoryEntry> {
        let now = Instant::now();
        let expired = match self.entries.peek(id) {
            Some(slot) => slot.is_expired(now),
            None => {
                self.stats.misses += 1;
                return Err(Error::not_found("memory", id));
            }
        };

        if expired {
            self.remove_slot(id);
            self.stats.ttl_evictions += 1;
            self.stats.misses += 1;
            tracing::debug!(tier = %self.name, id, "Entry expired on read");
            return Err(Error::not_found("memory", id));
        }

        let slot = self
            .entries
            .get_mut(id)
            .ok_or_else(|| Error::not_found("memory", id))?;
        slot.entry.accessed_at = Utc::now();
        self.stats.hits += 1;
        Ok(slot.entry.clone())
    }

    /// Live entries for an owner, optionally narrowed to one session, newest first.
    ///
    /// Does not count as an access.
    pub fn search_by_owner(&self, owner_id: &str, session_id: Option<&str>) -> Vec<MemoryEntry> {
        let ids: Option<&HashSet<String>> = match session_id {
            Some(session) => self.by_session.get(session),
            None => self.by_owner.get(owner_id),
        };
        let now = Instant::now();
        let mut found: Vec<MemoryEntry> = ids
            .into_iter()
            .flatten()
            .filter_map(|id| self.entries.peek(id))
            .filter(|slot| !slot.is_expired(now) && slot.entry.owner_id == owner_id)
            .map(|slot| slot.entry.clone())
            .collect();
        sort_newest_first(&mut found);
        found
    }

    /// Text search over live entries, best match first.
    ///
    /// An entry matches when it contains at least one query token; an empty
    /// query matches everything. Ties go to the newer entry.
    pub fn search(&self, owner_id: Option<&str>, query: &str, limit: usize) -> Vec<MemoryEntry> {
        let tokens = query_tokens(query);
        let now = Instant::now();
        let mut scored: Vec<(usize, MemoryEntry)> = self
            .entries
            .iter()
            .map(|(_, slot)| slot)
            .filter(|slot| !slot.is_expired(now))
            .filter(|slot| owner_id.is_none_or(|owner| slot.entry.owner_id == owner))
            .filter_map(|slot| {
                let text = slot.entry.text().to_lowercase();
                let score = tokens.iter().filter(|t| text.contains(t.as_str())).count();
                (tokens.is_empty() || score > 0).then(|| (score, slot.entry.clone()))
            })
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.cmp(sa)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.into_iter().take(limit).map(|(_, e)| e).collect()
    }

    /// Remove entries whose TTL has elapsed. Returns how many were removed.
    pub fn evict_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            self.remove_slot(id);
        }
        self.stats.ttl_evictions += expired.len() as u64;
        if !expired.is_empty() {
            tracing::debug!(tier = %self.name, count = expired.len(), "Evicted expired entries");
        }
        expired.len()
    }

    /// Remove the `n` least recently accessed entries, returning their ids.
    pub fn evict_lru(&mut self, n: usize) -> Vec<String> {
        let mut evicted = Vec::with_capacity(n);
        for _ in 0..n {
            let Some((id, slot)) = self.entries.pop_lru() else {
                break;
            };
            self.unindex(&slot.entry);
            evicted.push(id);
        }
        self.stats.lru_evictions += evicted.len() as u64;
        if !evicted.is_empty() {
            tracing::debug!(tier = %self.name, count = evicted.len(), "Evicted least recently used entries");
        }
        evicted
    }

    /// Periodic maintenance: drop expired entries, then trim to capacity.
    pub fn sweep(&mut self) -> (usize, usize) {
        let expired = self.evict_expired();
        let excess = self.entries.len().saturating_sub(self.max_items());
        let trimmed = self.evict_lru(excess).len();
        (expired, trimmed)
    }

    pub fn remove(&mut self, id: &str) -> Option<MemoryEntry> {
        self.remove_slot(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> FastTierStats {
        FastTierStats {
            items: self.entries.len(),
            capacity: self.max_items(),
            ..self.stats.clone()
        }
    }

    fn remove_slot(&mut self, id: &str) -> Option<MemoryEntry> {
        let slot = self.entries.pop(id)?;
        self.unindex(&slot.entry);
        Some(slot.entry)
    }

    fn index(&mut self, entry: &MemoryEntry) {
        self.by_owner
            .entry(entry.owner_id.clone())
            .or_default()
            .insert(entry.id.clone());
        if let Some(session) = &entry.session_id {
            self.by_session
                .entry(session.clone())
                .or_default()
                .insert(entry.id.clone());
        }
    }

    fn unindex(&mut self, entry: &MemoryEntry) {
        remove_from(&mut self.by_owner, &entry.owner_id, &entry.id);
        if let Some(session) = &entry.session_id {
            remove_from(&mut self.by_session, session, &entry.id);
        }
    }
}

fn remove_from(index: &mut HashMap<String, HashSet<String>>, key: &str, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

fn sort_newest_first(entries: &mut [MemoryEntry]) {
    entries.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryType;
    use std::collections::VecDeque;

    fn store(max_items: usize) -> FastTierStore {
        FastTierStore::new(
            "fast",
            FastTierConfig {
                ttl_secs: 3600,
                max_items,
                sweep_interval_secs: 60,
            },
        )
    }

    fn entry(id: &str, owner: &str) -> MemoryEntry {
        MemoryEntry::new(MemoryType::Interaction, owner, format!("content of {}", id)).with_id(id)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // TTL
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_on_get() {
        let mut fast = store(10);
        let hello = MemoryEntry::new(MemoryType::Interaction, "user-1", "hello").with_id("m1");
        fast.put(hello, Some(Duration::from_secs(5))).unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        let err = fast.get("m1").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(fast.stats().ttl_evictions, 1);
        assert!(fast.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_boundary() {
        let mut fast = store(10);
        fast.put(entry("a", "u"), Some(Duration::from_secs(5))).unwrap();

        tokio::time::advance(Duration::from_millis(4_990)).await;
        assert!(fast.get("a").is_ok());

        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(fast.get("a").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_ttl_and_default_ttl() {
        let mut fast = store(10);
        fast.put(entry("own", "u").with_ttl(Duration::from_secs(10)), None)
            .unwrap();
        fast.put(entry("default", "u"), None).unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(fast.evict_expired(), 1);
        assert!(fast.contains("default"));
        assert!(!fast.contains("own"));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut fast = store(10);
        assert!(fast.put(entry("a", "u"), Some(Duration::ZERO)).is_err());
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // LRU
    // ─────────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_lru_eviction_on_put() {
        let mut fast = store(3);
        fast.put(entry("a", "u"), None).unwrap();
        fast.put(entry("b", "u"), None).unwrap();
        fast.put(entry("c", "u"), None).unwrap();

        // Touch "a" so "b" becomes least recently used.
        fast.get("a").unwrap();
        fast.put(entry("d", "u"), None).unwrap();

        assert_eq!(fast.len(), 3);
        assert!(!fast.contains("b"));
        assert!(fast.contains("a"));
        assert_eq!(fast.stats().lru_evictions, 1);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let mut fast = store(2);
        fast.put(entry("a", "u"), None).unwrap();
        fast.put(entry("b", "u"), None).unwrap();
        fast.put(entry("a", "u"), None).unwrap();
        assert_eq!(fast.len(), 2);
        assert_eq!(fast.stats().lru_evictions, 0);
    }

    #[test]
    fn test_eviction_matches_reference_model() {
        let capacity = 4;
        let mut fast = store(capacity);
        // Front is most recent.
        let mut model: VecDeque<String> = VecDeque::new();

        for step in 0..200usize {
            let id = format!("k{}", (step * 7 + step / 3) % 9);
            if step % 3 == 0 {
                let hit = fast.get(&id).is_ok();
                assert_eq!(hit, model.contains(&id), "step {}", step);
                if hit {
                    model.retain(|k| k != &id);
                    model.push_front(id);
                }
            } else {
                if model.contains(&id) {
                    model.retain(|k| k != &id);
                } else if model.len() == capacity {
                    let expected = model.pop_back();
                    let before: HashSet<String> =
                        model.iter().cloned().chain(expected.clone()).collect();
                    fast.put(entry(&id, "u"), None).unwrap();
                    let evicted: Vec<&String> =
                        before.iter().filter(|k| !fast.contains(k)).collect();
                    assert_eq!(evicted, vec![expected.as_ref().unwrap()], "step {}", step);
                    model.push_front(id);
                    assert!(fast.len() <= capacity);
                    continue;
                }
                fast.put(entry(&id, "u"), None).unwrap();
                model.push_front(id);
            }
            assert!(fast.len() <= capacity);
        }
    }

    #[test]
    fn test_explicit_evict_lru() {
        let mut fast = store(10);
        for id in ["a", "b", "c"] {
            fast.put(entry(id, "u"), None).unwrap();
        }
        assert_eq!(fast.evict_lru(2), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(fast.evict_lru(5), vec!["c".to_string()]);
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Indexes
    // ─────────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_search_by_owner_and_session() {
        let mut fast = store(10);
        let base = Utc::now();
        for (i, (id, owner, session)) in [
            ("a", "alice", "s1"),
            ("b", "alice", "s2"),
            ("c", "bob", "s1"),
            ("d", "alice", "s1"),
        ]
        .into_iter()
        .enumerate()
        {
            let mut e = entry(id, owner).with_session(session);
            e.created_at = base + chrono::Duration::seconds(i as i64);
            fast.put(e, None).unwrap();
        }

        let ids: Vec<String> = fast
            .search_by_owner("alice", None)
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["d", "b", "a"]);

        let ids: Vec<String> = fast
            .search_by_owner("alice", Some("s1"))
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["d", "a"]);

        fast.remove("d");
        assert_eq!(fast.search_by_owner("alice", Some("s1")).len(), 1);
    }

    #[test]
    fn test_owner_change_reindexes() {
        let mut fast = store(10);
        fast.put(entry("a", "alice"), None).unwrap();
        fast.put(entry("a", "bob"), None).unwrap();
        assert!(fast.search_by_owner("alice", None).is_empty());
        assert_eq!(fast.search_by_owner("bob", None).len(), 1);
    }

    #[test]
    fn test_text_search() {
        let mut fast = store(10);
        fast.put(
            MemoryEntry::new(MemoryType::Interaction, "u", "fix the borrow checker error").with_id("a"),
            None,
        )
        .unwrap();
        fast.put(
            MemoryEntry::new(MemoryType::Interaction, "u", "borrow a book").with_id("b"),
            None,
        )
        .unwrap();
        fast.put(
            MemoryEntry::new(MemoryType::Interaction, "other", "borrow checker").with_id("c"),
            None,
        )
        .unwrap();

        let hits = fast.search(Some("u"), "borrow checker", 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert_eq!(fast.search(None, "checker", 10).len(), 2);
        assert_eq!(fast.search(Some("u"), "", 1).len(), 1);
    }

    #[test]
    fn test_hit_and_miss_counters() {
        let mut fast = store(10);
        fast.put(entry("a", "u"), None).unwrap();
        fast.get("a").unwrap();
        let _ = fast.get("missing");
        let stats = fast.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.items, 1);
        assert_eq!(stats.capacity, 10);
    }
}
