//! Durable tier store.
//!
//! Long-lived entries go through a write buffer that is flushed in per-type
//! batches to a [`StorageAdapter`]. Flushed entries are indexed (full text,
//! type, tags, metadata) and served through a bounded LRU read cache. Every
//! update records a [`MemoryVersion`] so an entry can be rolled back.

use super::DurableTierConfig;
use super::history::{apply_changes, reconstruct, version_record, VersionHistory};
use super::index::DurableIndexes;
use super::traits::StorageAdapter;
use crate::error::{Error, Result};
use crate::types::{FieldChange, IndexDescriptor, MemoryEntry, MemoryType, MemoryVersion};
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Paginated full-text query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub text: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<MemoryType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
    pub include_deleted: bool,
}

impl SearchQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            limit: 20,
            ..Default::default()
        }
    }

    pub fn with_type(mut self, entry_type: MemoryType) -> Self {
        self.entry_type = Some(entry_type);
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub entries: Vec<MemoryEntry>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Outcome of a flush. Failed types stay buffered for the next attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlushReport {
    pub written: usize,
    pub batches: usize,
    pub failed: Vec<FailedBatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedBatch {
    #[serde(rename = "type")]
    pub entry_type: MemoryType,
    pub entries: usize,
    pub error: String,
}

/// Counters exposed for health checks and metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DurableTierStats {
    pub indexed_entries: usize,
    pub pending_writes: usize,
    pub cache_size: usize,
    pub cache_capacity: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
    pub flushes: u64,
    pub failed_batches: u64,
    pub versions_recorded: u64,
    pub last_flush: Option<DateTime<Utc>>,
}

/// Write-buffered, indexed, versioned store.
pub struct DurableTierStore {
    config: DurableTierConfig,
    adapter: Arc<dyn StorageAdapter>,
    buffer: Vec<MemoryEntry>,
    cache: LruCache<String, MemoryEntry>,
    indexes: DurableIndexes,
    history: VersionHistory,
    stats: DurableTierStats,
}

impl DurableTierStore {
    /// Open the store and build indexes from whatever the adapter holds.
    pub fn open(config: DurableTierConfig, adapter: Arc<dyn StorageAdapter>) -> Result<Self> {
        let capacity = NonZeroUsize::new(config.cache_size)
            .ok_or_else(|| Error::validation("durable cache_size must be greater than 0"))?;
        let mut store = Self {
            cache: LruCache::new(capacity),
            indexes: DurableIndexes::new(),
            history: VersionHistory::new(config.max_versions),
            buffer: Vec::new(),
            stats: DurableTierStats::default(),
            config,
            adapter,
        };
        let indexed = store.refresh_indexes()?;
        tracing::info!(adapter = store.adapter.name(), indexed, "Durable tier opened");
        Ok(store)
    }

    pub fn config(&self) -> &DurableTierConfig {
        &self.config
    }

    pub fn adapter_name(&self) -> &str {
        self.adapter.name()
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn is_pending(&self, id: &str) -> bool {
        self.buffer.iter().any(|e| e.id == id)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────────

    /// Buffer an entry for the next flush.
    ///
    /// Returns the flush report when this write filled the buffer.
    pub fn store(&mut self, entry: MemoryEntry) -> Result<Option<FlushReport>> {
        entry.validate()?;
        self.cache.pop(&entry.id);
        match self.buffer.iter_mut().find(|e| e.id == entry.id) {
            Some(slot) => *slot = entry,
            None => self.buffer.push(entry),
        }

        if self.buffer.len() >= self.config.write_buffer_size.max(1) {
            return Ok(Some(self.flush()));
        }
        Ok(None)
    }

    /// Write buffered entries in per-type batches.
    ///
    /// A failing batch is logged and kept in the buffer; other types are
    /// still written.
    pub fn flush(&mut self) -> FlushReport {
        let mut report = FlushReport::default();
        if self.buffer.is_empty() {
            return report;
        }

        let mut batches: BTreeMap<MemoryType, Vec<MemoryEntry>> = BTreeMap::new();
        for entry in self.buffer.drain(..) {
            batches.entry(entry.entry_type).or_default().push(entry);
        }

        for (entry_type, entries) in batches {
            match self.adapter.write_batch(entry_type, &entries) {
                Ok(()) => {
                    self.indexes.insert_batch(&entries);
                    report.written += entries.len();
                    report.batches += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        entry_type = %entry_type,
                        entries = entries.len(),
                        error = %e,
                        "Durable batch write failed, keeping entries buffered"
                    );
                    self.stats.failed_batches += 1;
                    report.failed.push(FailedBatch {
                        entry_type,
                        entries: entries.len(),
                        error: e.to_string(),
                    });
                    self.buffer.extend(entries);
                }
            }
        }

        self.stats.flushes += 1;
        self.stats.last_flush = Some(Utc::now());
        tracing::debug!(
            written = report.written,
            failed = report.failed.len(),
            pending = self.buffer.len(),
            "Durable flush complete"
        );
        report
    }

    /// Apply a field map as a new version.
    ///
    /// Entry fields (`content`, `tags`, `metadata`, `type`, `ttl`,
    /// `compressed`, `encrypted`) are set directly; any other key sets a
    /// metadata key.
    pub fn update(
        &mut self,
        id: &str,
        fields: &Map<String, Value>,
        reason: &str,
        author: &str,
    ) -> Result<MemoryEntry> {
        let current = self.load_live(id)?;
        let (updated, changes) = apply_changes(&current, fields)?;
        self.commit(current, updated, changes, reason, author)
    }

    /// Restore the state recorded for `target_version`, written as a new version.
    pub fn rollback(&mut self, id: &str, target_version: u64, author: &str) -> Result<MemoryEntry> {
        let current = self.load_live(id)?;
        let chain = self.chain(id)?;
        let (restored, changes) = reconstruct(&current, &chain, target_version)?;
        let reason = format!("rollback to version {}", target_version);
        let entry = self.commit(current, restored, changes, &reason, author)?;
        tracing::info!(id, target_version, version = entry.version, "Rolled back entry");
        Ok(entry)
    }

    /// Persist `updated` as the next version of `current`.
    fn commit(
        &mut self,
        current: MemoryEntry,
        mut updated: MemoryEntry,
        changes: BTreeMap<String, FieldChange>,
        reason: &str,
        author: &str,
    ) -> Result<MemoryEntry> {
        // Make sure a persisted chain is loaded before appending to it.
        self.chain(&current.id)?;
        let record = version_record(&current, changes, reason, author);
        updated.version = current.version + 1;
        updated.updated_at = Utc::now();

        self.adapter
            .write_batch(updated.entry_type, std::slice::from_ref(&updated))?;
        self.buffer.retain(|e| e.id != updated.id);

        let chain = self.history.record(record);
        self.stats.versions_recorded += 1;
        if let Err(e) = self.adapter.save_versions(&updated.id, &chain) {
            tracing::warn!(id = %updated.id, error = %e, "Failed to persist version history");
        }

        self.indexes.insert(&updated);
        self.cache_put(updated.clone());
        Ok(updated)
    }

    /// Mark an entry deleted. It stays in storage but leaves the cache and
    /// normal reads.
    pub fn soft_delete(&mut self, id: &str) -> Result<()> {
        self.flush_if_pending(id);
        let mut entry = self.load_any(id)?;
        if entry.deleted {
            return Ok(());
        }
        entry.deleted = true;
        entry.updated_at = Utc::now();
        self.adapter
            .write_batch(entry.entry_type, std::slice::from_ref(&entry))?;
        self.buffer.retain(|e| e.id != id);
        self.indexes.insert(&entry);
        self.cache.pop(id);
        tracing::debug!(id, "Soft deleted entry");
        Ok(())
    }

    /// Remove an entry from storage, indexes, cache and history.
    pub fn hard_delete(&mut self, id: &str) -> Result<()> {
        let before = self.buffer.len();
        self.buffer.retain(|e| e.id != id);
        let was_pending = self.buffer.len() != before;

        let existed = self.adapter.delete(id)?;
        self.indexes.remove(id);
        self.cache.pop(id);
        self.history.remove(id);

        if !existed && !was_pending {
            return Err(Error::not_found("memory", id));
        }
        tracing::debug!(id, "Hard deleted entry");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────────

    /// Fetch a live entry. Soft-deleted entries read as not found.
    ///
    /// Still-buffered entries are served from the buffer.
    pub fn get(&mut self, id: &str) -> Result<MemoryEntry> {
        let entry = self.load_any(id)?;
        if entry.deleted {
            return Err(Error::not_found("memory", id));
        }
        Ok(entry)
    }

    /// Fetch an entry even if it was soft deleted.
    pub fn get_including_deleted(&mut self, id: &str) -> Result<MemoryEntry> {
        self.load_any(id)
    }

    /// Full-text search intersected with the type filter, then paginated.
    ///
    /// Only flushed entries are searchable. Results are ordered newest
    /// update first.
    pub fn search(&mut self, query: &SearchQuery) -> Result<SearchPage> {
        let mut ids = self.indexes.search_text(&query.text);
        if !query.text.trim().is_empty() {
            ids.extend(self.adapter.query_fulltext(&query.text)?);
        }
        if let Some(entry_type) = query.entry_type {
            let typed = self.indexes.by_type(entry_type);
            ids = ids.intersection(&typed).cloned().collect();
        }

        let mut matches = self.load_matching(ids, |entry| {
            (query.include_deleted || !entry.deleted)
                && query.entry_type.is_none_or(|t| entry.entry_type == t)
                && query
                    .owner_id
                    .as_deref()
                    .is_none_or(|owner| entry.owner_id == owner)
        })?;
        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));

        let total = matches.len();
        let entries = matches
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();
        Ok(SearchPage {
            entries,
            total,
            limit: query.limit,
            offset: query.offset,
        })
    }

    /// Live entries whose metadata `field` equals `value`.
    pub fn find_by_metadata(&mut self, field: &str, value: &Value) -> Result<Vec<MemoryEntry>> {
        let mut ids = self.indexes.by_metadata(field, value);
        ids.extend(self.adapter.query_metadata(field, value)?);
        self.load_matching(ids, |entry| !entry.deleted)
    }

    /// Live entries carrying `tag`.
    pub fn find_by_tag(&mut self, tag: &str) -> Result<Vec<MemoryEntry>> {
        let ids = self.indexes.by_tag(tag);
        self.load_matching(ids, |entry| !entry.deleted)
    }

    /// Every stored or buffered entry for an owner, deleted ones included.
    pub fn entries_for_owner(&self, owner_id: &str) -> Result<Vec<MemoryEntry>> {
        let mut entries: BTreeMap<String, MemoryEntry> = self
            .adapter
            .scan()?
            .into_iter()
            .filter(|e| e.owner_id == owner_id)
            .map(|e| (e.id.clone(), e))
            .collect();
        for pending in self.buffer.iter().filter(|e| e.owner_id == owner_id) {
            entries.insert(pending.id.clone(), pending.clone());
        }
        Ok(entries.into_values().collect())
    }

    /// Retained version records, oldest first.
    pub fn history(&mut self, id: &str) -> Result<Vec<MemoryVersion>> {
        let chain = self.chain(id)?;
        if chain.is_empty() && !self.is_pending(id) && self.adapter.read(id)?.is_none() {
            return Err(Error::not_found("memory", id));
        }
        Ok(chain)
    }

    pub fn indexes(&self) -> Vec<IndexDescriptor> {
        self.indexes.descriptors().to_vec()
    }

    pub fn stats(&self) -> DurableTierStats {
        DurableTierStats {
            indexed_entries: self.indexes.len(),
            pending_writes: self.buffer.len(),
            cache_size: self.cache.len(),
            cache_capacity: self.cache.cap().get(),
            ..self.stats.clone()
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────────

    /// Rebuild every index from the adapter. Returns the indexed count.
    pub fn refresh_indexes(&mut self) -> Result<usize> {
        let entries = self.adapter.scan()?;
        self.indexes.rebuild(&entries);
        Ok(entries.len())
    }

    /// Hard delete stored entries whose TTL has elapsed.
    pub fn sweep_expired(&mut self) -> Result<usize> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .adapter
            .scan()?
            .into_iter()
            .filter(|e| e.is_expired_at(now))
            .map(|e| e.id)
            .collect();

        for id in &expired {
            self.hard_delete(id)?;
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Swept expired durable entries");
        }
        Ok(expired.len())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────────

    fn flush_if_pending(&mut self, id: &str) {
        if self.is_pending(id) {
            self.flush();
        }
    }

    /// Current state of an entry: buffer, then cache, then adapter.
    fn load_any(&mut self, id: &str) -> Result<MemoryEntry> {
        if let Some(pending) = self.buffer.iter().find(|e| e.id == id) {
            return Ok(pending.clone());
        }
        if let Some(cached) = self.cache.get(id) {
            self.stats.cache_hits += 1;
            return Ok(cached.clone());
        }
        self.stats.cache_misses += 1;
        let entry = self
            .adapter
            .read(id)?
            .ok_or_else(|| Error::not_found("memory", id))?;
        if !entry.deleted {
            self.cache_put(entry.clone());
        }
        Ok(entry)
    }

    /// Live entry for a mutation, flushing it first if it is still buffered.
    fn load_live(&mut self, id: &str) -> Result<MemoryEntry> {
        self.flush_if_pending(id);
        self.get(id)
    }

    /// Load entries for `ids` without touching cache recency.
    fn load_matching(
        &self,
        ids: BTreeSet<String>,
        keep: impl Fn(&MemoryEntry) -> bool,
    ) -> Result<Vec<MemoryEntry>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            let entry = match self.cache.peek(&id) {
                Some(cached) => Some(cached.clone()),
                None => self.adapter.read(&id)?,
            };
            if let Some(entry) = entry.filter(|e| keep(e)) {
                found.push(entry);
            }
        }
        Ok(found)
    }

    fn chain(&mut self, id: &str) -> Result<Vec<MemoryVersion>> {
        if !self.history.is_loaded(id) {
            let versions = self.adapter.load_versions(id)?;
            self.history.load(id, versions);
        }
        Ok(self.history.chain(id))
    }

    fn cache_put(&mut self, entry: MemoryEntry) {
        let id = entry.id.clone();
        if let Some((evicted, _)) = self.cache.push(id.clone(), entry) {
            if evicted != id {
                self.stats.cache_evictions += 1;
            }
        }
    }
}
