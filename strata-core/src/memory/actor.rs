//! Actor tasks owning the tier stores.
//!
//! Every store is moved into its own task and processes one request at a
//! time from a bounded mailbox. Handles are cheap to clone and are the only
//! way to reach a store.

use super::durable::{DurableTierStats, DurableTierStore, FlushReport, SearchPage, SearchQuery};
use super::fast::{FastTierStats, FastTierStore};
use crate::error::{Error, Result};
use crate::types::{IndexDescriptor, MemoryEntry, MemoryVersion};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Requests a mailbox holds before senders wait.
pub const MAILBOX_CAPACITY: usize = 256;

/// One-shot reply channel carried by every mailbox command.
pub type Reply<T> = oneshot::Sender<T>;

/// Send a command built around a fresh reply channel and wait for the answer.
///
/// A closed mailbox or a dropped reply both surface as
/// [`Error::ActorUnavailable`] naming the actor.
pub async fn call<C, T>(
    name: &str,
    tx: &mpsc::Sender<C>,
    make: impl FnOnce(Reply<T>) -> C,
) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    tx.send(make(reply))
        .await
        .map_err(|_| Error::ActorUnavailable(name.to_string()))?;
    rx.await.map_err(|_| Error::ActorUnavailable(name.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Fast / Warm Tier
// ─────────────────────────────────────────────────────────────────────────────

enum FastCommand {
    Put {
        entry: MemoryEntry,
        ttl: Option<Duration>,
        reply: Reply<Result<String>>,
    },
    Get {
        id: String,
        reply: Reply<Result<MemoryEntry>>,
    },
    SearchByOwner {
        owner_id: String,
        session_id: Option<String>,
        reply: Reply<Vec<MemoryEntry>>,
    },
    Search {
        owner_id: Option<String>,
        query: String,
        limit: usize,
        reply: Reply<Vec<MemoryEntry>>,
    },
    Remove {
        id: String,
        reply: Reply<Option<MemoryEntry>>,
    },
    EvictExpired {
        reply: Reply<usize>,
    },
    EvictLru {
        n: usize,
        reply: Reply<Vec<String>>,
    },
    Sweep {
        reply: Reply<(usize, usize)>,
    },
    Stats {
        reply: Reply<FastTierStats>,
    },
}

/// Handle to a fast (or warm) tier actor.
#[derive(Clone)]
pub struct FastTierHandle {
    name: Arc<str>,
    tx: mpsc::Sender<FastCommand>,
}

impl FastTierHandle {
    /// Move `store` into a new actor task.
    pub fn spawn(store: FastTierStore) -> Self {
        let name: Arc<str> = Arc::from(store.name());
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        tokio::spawn(run_fast(store, rx));
        Self { name, tx }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn put(&self, entry: MemoryEntry, ttl: Option<Duration>) -> Result<String> {
        call(&self.name, &self.tx, |reply| FastCommand::Put { entry, ttl, reply }).await?
    }

    pub async fn get(&self, id: impl Into<String>) -> Result<MemoryEntry> {
        let id = id.into();
        call(&self.name, &self.tx, |reply| FastCommand::Get { id, reply }).await?
    }

    pub async fn search_by_owner(
        &self,
        owner_id: impl Into<String>,
        session_id: Option<String>,
    ) -> Result<Vec<MemoryEntry>> {
        let owner_id = owner_id.into();
        call(&self.name, &self.tx, |reply| FastCommand::SearchByOwner {
            owner_id,
            session_id,
            reply,
        })
        .await
    }

    pub async fn search(
        &self,
        owner_id: Option<String>,
        query: impl Into<String>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let query = query.into();
        call(&self.name, &self.tx, |reply| FastCommand::Search {
            owner_id,
            query,
            limit,
            reply,
        })
        .await
    }

    pub async fn remove(&self, id: impl Into<String>) -> Result<Option<MemoryEntry>> {
        let id = id.into();
        call(&self.name, &self.tx, |reply| FastCommand::Remove { id, reply }).await
    }

    pub async fn evict_expired(&self) -> Result<usize> {
        call(&self.name, &self.tx, |reply| FastCommand::EvictExpired { reply }).await
    }

    pub async fn evict_lru(&self, n: usize) -> Result<Vec<String>> {
        call(&self.name, &self.tx, |reply| FastCommand::EvictLru { n, reply }).await
    }

    /// TTL sweep followed by capacity trim. Returns (expired, trimmed).
    pub async fn sweep(&self) -> Result<(usize, usize)> {
        call(&self.name, &self.tx, |reply| FastCommand::Sweep { reply }).await
    }

    pub async fn stats(&self) -> Result<FastTierStats> {
        call(&self.name, &self.tx, |reply| FastCommand::Stats { reply }).await
    }
}

async fn run_fast(mut store: FastTierStore, mut rx: mpsc::Receiver<FastCommand>) {
    tracing::debug!(tier = store.name(), "Fast tier actor started");
    while let Some(command) = rx.recv().await {
        match command {
            FastCommand::Put { entry, ttl, reply } => {
                let _ = reply.send(store.put(entry, ttl));
            }
            FastCommand::Get { id, reply } => {
                let _ = reply.send(store.get(&id));
            }
            FastCommand::SearchByOwner {
                owner_id,
                session_id,
                reply,
            } => {
                let _ = reply.send(store.search_by_owner(&owner_id, session_id.as_deref()));
            }
            FastCommand::Search {
                owner_id,
                query,
                limit,
                reply,
            } => {
                let _ = reply.send(store.search(owner_id.as_deref(), &query, limit));
            }
            FastCommand::Remove { id, reply } => {
                let _ = reply.send(store.remove(&id));
            }
            FastCommand::EvictExpired { reply } => {
                let _ = reply.send(store.evict_expired());
            }
            FastCommand::EvictLru { n, reply } => {
                let _ = reply.send(store.evict_lru(n));
            }
            FastCommand::Sweep { reply } => {
                let _ = reply.send(store.sweep());
            }
            FastCommand::Stats { reply } => {
                let _ = reply.send(store.stats());
            }
        }
    }
    tracing::debug!(tier = store.name(), "Fast tier actor stopped");
}

// ─────────────────────────────────────────────────────────────────────────────
// Durable Tier
// ─────────────────────────────────────────────────────────────────────────────

enum DurableCommand {
    Store {
        entry: MemoryEntry,
        reply: Reply<Result<Option<FlushReport>>>,
    },
    Flush {
        reply: Reply<FlushReport>,
    },
    Get {
        id: String,
        include_deleted: bool,
        reply: Reply<Result<MemoryEntry>>,
    },
    Update {
        id: String,
        fields: Map<String, Value>,
        reason: String,
        author: String,
        reply: Reply<Result<MemoryEntry>>,
    },
    Rollback {
        id: String,
        target_version: u64,
        author: String,
        reply: Reply<Result<MemoryEntry>>,
    },
    SoftDelete {
        id: String,
        reply: Reply<Result<()>>,
    },
    HardDelete {
        id: String,
        reply: Reply<Result<()>>,
    },
    Search {
        query: SearchQuery,
        reply: Reply<Result<SearchPage>>,
    },
    FindByMetadata {
        field: String,
        value: Value,
        reply: Reply<Result<Vec<MemoryEntry>>>,
    },
    FindByTag {
        tag: String,
        reply: Reply<Result<Vec<MemoryEntry>>>,
    },
    EntriesForOwner {
        owner_id: String,
        reply: Reply<Result<Vec<MemoryEntry>>>,
    },
    History {
        id: String,
        reply: Reply<Result<Vec<MemoryVersion>>>,
    },
    Indexes {
        reply: Reply<Vec<IndexDescriptor>>,
    },
    RefreshIndexes {
        reply: Reply<Result<usize>>,
    },
    SweepExpired {
        reply: Reply<Result<usize>>,
    },
    Stats {
        reply: Reply<DurableTierStats>,
    },
}

/// Handle to the durable tier actor.
#[derive(Clone)]
pub struct DurableTierHandle {
    name: Arc<str>,
    tx: mpsc::Sender<DurableCommand>,
}

impl DurableTierHandle {
    /// Move `store` into a new actor task.
    pub fn spawn(store: DurableTierStore) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        tokio::spawn(run_durable(store, rx));
        Self {
            name: Arc::from("durable"),
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn store(&self, entry: MemoryEntry) -> Result<Option<FlushReport>> {
        call(&self.name, &self.tx, |reply| DurableCommand::Store { entry, reply }).await?
    }

    pub async fn flush(&self) -> Result<FlushReport> {
        call(&self.name, &self.tx, |reply| DurableCommand::Flush { reply }).await
    }

    pub async fn get(&self, id: impl Into<String>) -> Result<MemoryEntry> {
        let id = id.into();
        call(&self.name, &self.tx, |reply| DurableCommand::Get {
            id,
            include_deleted: false,
            reply,
        })
        .await?
    }

    pub async fn get_including_deleted(&self, id: impl Into<String>) -> Result<MemoryEntry> {
        let id = id.into();
        call(&self.name, &self.tx, |reply| DurableCommand::Get {
            id,
            include_deleted: true,
            reply,
        })
        .await?
    }

    pub async fn update(
        &self,
        id: impl Into<String>,
        fields: Map<String, Value>,
        reason: impl Into<String>,
        author: impl Into<String>,
    ) -> Result<MemoryEntry> {
        let (id, reason, author) = (id.into(), reason.into(), author.into());
        call(&self.name, &self.tx, |reply| DurableCommand::Update {
            id,
            fields,
            reason,
            author,
            reply,
        })
        .await?
    }

    pub async fn rollback(
        &self,
        id: impl Into<String>,
        target_version: u64,
        author: impl Into<String>,
    ) -> Result<MemoryEntry> {
        let (id, author) = (id.into(), author.into());
        call(&self.name, &self.tx, |reply| DurableCommand::Rollback {
            id,
            target_version,
            author,
            reply,
        })
        .await?
    }

    pub async fn soft_delete(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        call(&self.name, &self.tx, |reply| DurableCommand::SoftDelete { id, reply }).await?
    }

    pub async fn hard_delete(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        call(&self.name, &self.tx, |reply| DurableCommand::HardDelete { id, reply }).await?
    }

    pub async fn search(&self, query: SearchQuery) -> Result<SearchPage> {
        call(&self.name, &self.tx, |reply| DurableCommand::Search { query, reply }).await?
    }

    pub async fn find_by_metadata(
        &self,
        field: impl Into<String>,
        value: Value,
    ) -> Result<Vec<MemoryEntry>> {
        let field = field.into();
        call(&self.name, &self.tx, |reply| DurableCommand::FindByMetadata {
            field,
            value,
            reply,
        })
        .await?
    }

    pub async fn find_by_tag(&self, tag: impl Into<String>) -> Result<Vec<MemoryEntry>> {
        let tag = tag.into();
        call(&self.name, &self.tx, |reply| DurableCommand::FindByTag { tag, reply }).await?
    }

    pub async fn entries_for_owner(&self, owner_id: impl Into<String>) -> Result<Vec<MemoryEntry>> {
        let owner_id = owner_id.into();
        call(&self.name, &self.tx, |reply| DurableCommand::EntriesForOwner {
            owner_id,
            reply,
        })
        .await?
    }

    pub async fn history(&self, id: impl Into<String>) -> Result<Vec<MemoryVersion>> {
        let id = id.into();
        call(&self.name, &self.tx, |reply| DurableCommand::History { id, reply }).await?
    }

    pub async fn indexes(&self) -> Result<Vec<IndexDescriptor>> {
        call(&self.name, &self.tx, |reply| DurableCommand::Indexes { reply }).await
    }

    pub async fn refresh_indexes(&self) -> Result<usize> {
        call(&self.name, &self.tx, |reply| DurableCommand::RefreshIndexes { reply }).await?
    }

    pub async fn sweep_expired(&self) -> Result<usize> {
        call(&self.name, &self.tx, |reply| DurableCommand::SweepExpired { reply }).await?
    }

    pub async fn stats(&self) -> Result<DurableTierStats> {
        call(&self.name, &self.tx, |reply| DurableCommand::Stats { reply }).await
    }
}

async fn run_durable(mut store: DurableTierStore, mut rx: mpsc::Receiver<DurableCommand>) {
    tracing::debug!(adapter = store.adapter_name(), "Durable tier actor started");
    while let Some(command) = rx.recv().await {
        match command {
            DurableCommand::Store { entry, reply } => {
                let _ = reply.send(store.store(entry));
            }
            DurableCommand::Flush { reply } => {
                let _ = reply.send(store.flush());
            }
            DurableCommand::Get {
                id,
                include_deleted,
                reply,
            } => {
                let result = if include_deleted {
                    store.get_including_deleted(&id)
                } else {
                    store.get(&id)
                };
                let _ = reply.send(result);
            }
            DurableCommand::Update {
                id,
                fields,
                reason,
                author,
                reply,
            } => {
                let _ = reply.send(store.update(&id, &fields, &reason, &author));
            }
            DurableCommand::Rollback {
                id,
                target_version,
                author,
                reply,
            } => {
                let _ = reply.send(store.rollback(&id, target_version, &author));
            }
            DurableCommand::SoftDelete { id, reply } => {
                let _ = reply.send(store.soft_delete(&id));
            }
            DurableCommand::HardDelete { id, reply } => {
                let _ = reply.send(store.hard_delete(&id));
            }
            DurableCommand::Search { query, reply } => {
                let _ = reply.send(store.search(&query));
            }
            DurableCommand::FindByMetadata {
                field,
                value,
                reply,
            } => {
                let _ = reply.send(store.find_by_metadata(&field, &value));
            }
            DurableCommand::FindByTag { tag, reply } => {
                let _ = reply.send(store.find_by_tag(&tag));
            }
            DurableCommand::EntriesForOwner { owner_id, reply } => {
                let _ = reply.send(store.entries_for_owner(&owner_id));
            }
            DurableCommand::History { id, reply } => {
                let _ = reply.send(store.history(&id));
            }
            DurableCommand::Indexes { reply } => {
                let _ = reply.send(store.indexes());
            }
            DurableCommand::RefreshIndexes { reply } => {
                let _ = reply.send(store.refresh_indexes());
            }
            DurableCommand::SweepExpired { reply } => {
                let _ = reply.send(store.sweep_expired());
            }
            DurableCommand::Stats { reply } => {
                let _ = reply.send(store.stats());
            }
        }
    }

    // Last handle dropped: write out whatever is still buffered.
    let report = store.flush();
    tracing::debug!(written = report.written, "Durable tier actor stopped");
}
