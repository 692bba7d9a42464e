//! Context source providers.
//!
//! The assembler only sees [`SourceProvider`]s. The two built-in providers
//! read the fast and durable tiers through their actor handles and never
//! touch tier state directly.

use async_trait::async_trait;
use serde_json::Value;
use strata_core::memory::query_tokens;
use strata_core::{DurableTierHandle, FastTierHandle, MemoryEntry, SearchQuery};

use super::types::{BuildRequest, ContextEntry, ContextSource};
use crate::SDKResult;

/// Entries fetched per source when the source config sets no `limit`.
pub const DEFAULT_SOURCE_LIMIT: usize = 50;

/// Something the assembler can query for candidate entries.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch(&self, source: &ContextSource, request: &BuildRequest) -> SDKResult<Vec<ContextEntry>>;
}

/// Share of the query tokens found in `text`; 0.5 for an empty query.
pub fn token_relevance(query: &str, text: &str) -> f64 {
    let tokens = query_tokens(query);
    if tokens.is_empty() {
        return 0.5;
    }
    let haystack = text.to_lowercase();
    let hits = tokens.iter().filter(|t| haystack.contains(t.as_str())).count();
    hits as f64 / tokens.len() as f64
}

/// Convert a memory entry into a context candidate.
///
/// Entry metadata is carried over and the entry's id, type and tier are
/// added so callers can trace a candidate back to its origin.
pub fn entry_candidate(source_id: &str, tier: &str, entry: &MemoryEntry, relevance: f64) -> ContextEntry {
    let mut candidate = ContextEntry::new(source_id, entry.content.clone(), relevance)
        .with_timestamp(entry.updated_at);
    candidate.metadata = entry.metadata.clone();
    candidate.metadata.insert("memory_id".into(), Value::String(entry.id.clone()));
    candidate
        .metadata
        .insert("memory_type".into(), Value::String(entry.entry_type.to_string()));
    candidate.metadata.insert("tier".into(), Value::String(tier.to_string()));
    candidate
}

/// Reads recent entries from a fast (or warm) tier.
#[derive(Clone)]
pub struct FastTierSource {
    tier: FastTierHandle,
}

impl FastTierSource {
    pub fn new(tier: FastTierHandle) -> Self {
        Self { tier }
    }
}

#[async_trait]
impl SourceProvider for FastTierSource {
    async fn fetch(&self, source: &ContextSource, request: &BuildRequest) -> SDKResult<Vec<ContextEntry>> {
        let limit = source.limit().unwrap_or(DEFAULT_SOURCE_LIMIT);
        let entries = self
            .tier
            .search(request.owner_id.clone(), request.query.clone(), limit)
            .await?;
        Ok(entries
            .iter()
            .map(|e| entry_candidate(&source.id, self.tier.name(), e, token_relevance(&request.query, &e.text())))
            .collect())
    }
}

/// Reads indexed entries from the durable tier.
#[derive(Clone)]
pub struct DurableTierSource {
    tier: DurableTierHandle,
}

impl DurableTierSource {
    pub fn new(tier: DurableTierHandle) -> Self {
        Self { tier }
    }
}

#[async_trait]
impl SourceProvider for DurableTierSource {
    async fn fetch(&self, source: &ContextSource, request: &BuildRequest) -> SDKResult<Vec<ContextEntry>> {
        let limit = source.limit().unwrap_or(DEFAULT_SOURCE_LIMIT);
        let mut query = SearchQuery::text(request.query.clone()).page(limit, 0);
        if let Some(owner) = &request.owner_id {
            query = query.with_owner(owner.clone());
        }
        let page = self.tier.search(query).await?;
        Ok(page
            .entries
            .iter()
            .map(|e| entry_candidate(&source.id, "durable", e, token_relevance(&request.query, &e.text())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::types::SourceType;
    use std::sync::Arc;
    use strata_core::{DurableTierConfig, DurableTierStore, FastTierConfig, FastTierStore, InMemoryAdapter, MemoryType};

    #[test]
    fn test_token_relevance() {
        assert_eq!(token_relevance("", "anything"), 0.5);
        assert_eq!(token_relevance("cargo build", "ran cargo build twice"), 1.0);
        assert_eq!(token_relevance("cargo test", "ran cargo build"), 0.5);
        assert_eq!(token_relevance("python", "ran cargo build"), 0.0);
    }

    #[tokio::test]
    async fn test_fast_tier_source_reads_through_handle() {
        let tier = FastTierHandle::spawn(FastTierStore::new("fast", FastTierConfig::default()));
        tier.put(MemoryEntry::new(MemoryType::Interaction, "alice", "cargo build failed"), None)
            .await
            .unwrap();
        tier.put(MemoryEntry::new(MemoryType::Interaction, "bob", "cargo build failed"), None)
            .await
            .unwrap();

        let source = ContextSource::new("fast", SourceType::Memory, 1.0);
        let request = BuildRequest::new("debug").with_query("cargo").for_owner("alice");
        let entries = FastTierSource::new(tier).fetch(&source, &request).await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source_id, "fast");
        assert_eq!(entries[0].metadata["tier"], "fast");
        assert_eq!(entries[0].relevance_score, 1.0);
    }

    #[tokio::test]
    async fn test_durable_tier_source_honours_limit() {
        let store = DurableTierStore::open(DurableTierConfig::default(), Arc::new(InMemoryAdapter::new())).unwrap();
        let tier = DurableTierHandle::spawn(store);
        for i in 0..5 {
            tier.store(MemoryEntry::new(MemoryType::Knowledge, "alice", format!("tokio runtime note {i}")))
                .await
                .unwrap();
        }
        tier.flush().await.unwrap();

        let source = ContextSource::new("durable", SourceType::Memory, 0.8).with_config("limit", 3);
        let request = BuildRequest::new("explain").with_query("tokio");
        let entries = DurableTierSource::new(tier).fetch(&source, &request).await.unwrap();

        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.metadata["memory_type"] == "knowledge"));
    }
}
