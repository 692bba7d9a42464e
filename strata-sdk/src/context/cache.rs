//! Assembled bundle cache.
//!
//! Keyed by a deterministic hash of the normalized request. Entries expire
//! after a TTL, the oldest insert is evicted at capacity, and every bundle
//! that queried a source is dropped when that source changes. Bundles built
//! over "every active source" are also dropped when a source becomes active.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use super::types::{BuildRequest, ContextBundle};
use crate::SDKResult;
use crate::utils::canonical_hash;

#[derive(Serialize)]
struct CacheKeyParts<'a> {
    purpose: String,
    query: String,
    owner_id: Option<&'a str>,
    max_tokens: usize,
    sources: BTreeSet<&'a str>,
    filters: &'a Map<String, Value>,
    preferences: &'a Map<String, Value>,
}

/// Deterministic cache key for a request with its budget resolved.
pub fn cache_key(request: &BuildRequest, max_tokens: usize) -> SDKResult<String> {
    let parts = CacheKeyParts {
        purpose: request.purpose.trim().to_lowercase(),
        query: request.query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase(),
        owner_id: request.owner_id.as_deref(),
        max_tokens,
        sources: request.required_sources.iter().map(String::as_str).collect(),
        filters: &request.filters,
        preferences: &request.preferences,
    };
    Ok(canonical_hash(&parts)?)
}

struct Cached {
    bundle: ContextBundle,
    sources: BTreeSet<String>,
    /// Built without required sources, so a newly active source changes it
    open: bool,
    stored_at: Instant,
}

pub struct BundleCache {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<String, Cached>,
    order: VecDeque<String>,
}

impl BundleCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// A fresh bundle for `key`; an expired one is dropped.
    pub fn get(&mut self, key: &str) -> Option<ContextBundle> {
        let expired = match self.entries.get(key) {
            Some(cached) => cached.stored_at.elapsed() >= self.ttl,
            None => return None,
        };
        if expired {
            self.remove(key);
            return None;
        }
        self.entries.get(key).map(|c| c.bundle.clone())
    }

    pub fn insert(&mut self, key: String, bundle: ContextBundle, sources: BTreeSet<String>, open: bool) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.contains_key(&key) {
            self.remove(&key);
        }
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            tracing::debug!(key = %oldest, "Evicted oldest cached bundle");
        }
        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            Cached {
                bundle,
                sources,
                open,
                stored_at: Instant::now(),
            },
        );
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }

    /// Drop every bundle that queried `source_id`. Returns how many.
    pub fn invalidate_source(&mut self, source_id: &str) -> usize {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, c)| c.sources.contains(source_id))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            self.remove(key);
        }
        stale.len()
    }

    /// Drop every bundle built over all active sources. Returns how many.
    pub fn invalidate_open(&mut self) -> usize {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, c)| c.open)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            self.remove(key);
        }
        stale.len()
    }

    /// Drop expired bundles. Returns how many.
    pub fn cleanup(&mut self) -> usize {
        let ttl = self.ttl;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, c)| c.stored_at.elapsed() >= ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
