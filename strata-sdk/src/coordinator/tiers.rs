//! Tier clients.
//!
//! The coordinator reaches each tier only through a [`TierClient`], which in
//! turn only talks to the tier's actor handle.

use async_trait::async_trait;
use strata_core::{DurableTierHandle, FastTierHandle, MemoryEntry, SearchQuery, Tier};

use super::types::TierSnapshot;
use crate::SDKResult;

#[async_trait]
pub trait TierClient: Send + Sync {
    fn tier(&self) -> Tier;

    async fn put(&self, entry: MemoryEntry) -> SDKResult<String>;

    async fn get(&self, id: &str) -> SDKResult<MemoryEntry>;

    /// Remove an entry; `false` if it was not there.
    async fn delete(&self, id: &str) -> SDKResult<bool>;

    async fn search(&self, owner_id: &str, query: &str, limit: usize) -> SDKResult<Vec<MemoryEntry>>;

    async fn entries_for_owner(&self, owner_id: &str) -> SDKResult<Vec<MemoryEntry>>;

    async fn snapshot(&self) -> SDKResult<TierSnapshot>;
}

/// Client for a fast or warm tier.
#[derive(Clone)]
pub struct FastTierClient {
    tier: Tier,
    handle: FastTierHandle,
}

impl FastTierClient {
    pub fn new(tier: Tier, handle: FastTierHandle) -> Self {
        Self { tier, handle }
    }
}

#[async_trait]
impl TierClient for FastTierClient {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn put(&self, entry: MemoryEntry) -> SDKResult<String> {
        Ok(self.handle.put(entry, None).await?)
    }

    async fn get(&self, id: &str) -> SDKResult<MemoryEntry> {
        Ok(self.handle.get(id).await?)
    }

    async fn delete(&self, id: &str) -> SDKResult<bool> {
        Ok(self.handle.remove(id).await?.is_some())
    }

    async fn search(&self, owner_id: &str, query: &str, limit: usize) -> SDKResult<Vec<MemoryEntry>> {
        Ok(self.handle.search(Some(owner_id.to_string()), query, limit).await?)
    }

    async fn entries_for_owner(&self, owner_id: &str) -> SDKResult<Vec<MemoryEntry>> {
        Ok(self.handle.search_by_owner(owner_id, None).await?)
    }

    async fn snapshot(&self) -> SDKResult<TierSnapshot> {
        let stats = self.handle.stats().await?;
        Ok(TierSnapshot {
            items: stats.items,
            capacity: Some(stats.capacity),
        })
    }
}

/// Client for the durable tier.
#[derive(Clone)]
pub struct DurableTierClient {
    handle: DurableTierHandle,
}

impl DurableTierClient {
    pub fn new(handle: DurableTierHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl TierClient for DurableTierClient {
    fn tier(&self) -> Tier {
        Tier::Durable
    }

    async fn put(&self, entry: MemoryEntry) -> SDKResult<String> {
        let id = entry.id.clone();
        self.handle.store(entry).await?;
        Ok(id)
    }

    async fn get(&self, id: &str) -> SDKResult<MemoryEntry> {
        Ok(self.handle.get(id).await?)
    }

    async fn delete(&self, id: &str) -> SDKResult<bool> {
        match self.handle.hard_delete(id).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn search(&self, owner_id: &str, query: &str, limit: usize) -> SDKResult<Vec<MemoryEntry>> {
        let query = SearchQuery::text(query).with_owner(owner_id).page(limit, 0);
        Ok(self.handle.search(query).await?.entries)
    }

    async fn entries_for_owner(&self, owner_id: &str) -> SDKResult<Vec<MemoryEntry>> {
        Ok(self.handle.entries_for_owner(owner_id).await?)
    }

    async fn snapshot(&self) -> SDKResult<TierSnapshot> {
        let stats = self.handle.stats().await?;
        Ok(TierSnapshot {
            items: stats.indexed_entries + stats.pending_writes,
            capacity: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_core::{DurableTierConfig, DurableTierStore, FastTierConfig, FastTierStore, InMemoryAdapter, MemoryType};

    fn durable() -> DurableTierClient {
        let store = DurableTierStore::open(DurableTierConfig::default(), Arc::new(InMemoryAdapter::new())).unwrap();
        DurableTierClient::new(DurableTierHandle::spawn(store))
    }

    #[tokio::test]
    async fn test_fast_client_round_trip() {
        let client = FastTierClient::new(
            Tier::Warm,
            FastTierHandle::spawn(FastTierStore::new("warm", FastTierConfig::warm())),
        );
        let entry = MemoryEntry::new(MemoryType::Interaction, "alice", "warm hello").with_id("w1");
        client.put(entry).await.unwrap();

        assert_eq!(client.tier(), Tier::Warm);
        assert_eq!(client.get("w1").await.unwrap().owner_id, "alice");
        assert_eq!(client.search("alice", "hello", 10).await.unwrap().len(), 1);
        assert_eq!(client.snapshot().await.unwrap().capacity, Some(50_000));
        assert!(client.delete("w1").await.unwrap());
        assert!(!client.delete("w1").await.unwrap());
    }

    #[tokio::test]
    async fn test_durable_client_delete_reports_absence() {
        let client = durable();
        client
            .put(MemoryEntry::new(MemoryType::Knowledge, "alice", "durable fact").with_id("d1"))
            .await
            .unwrap();

        assert_eq!(client.entries_for_owner("alice").await.unwrap().len(), 1);
        assert_eq!(client.snapshot().await.unwrap().items, 1);
        assert!(client.delete("d1").await.unwrap());
        assert!(!client.delete("d1").await.unwrap());
        assert!(client.get("d1").await.unwrap_err().is_not_found());
    }
}
