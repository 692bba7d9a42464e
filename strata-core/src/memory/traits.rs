//! Storage adapter contract for the durable tier.

use crate::error::Result;
use crate::types::{MemoryEntry, MemoryType, MemoryVersion};
use serde_json::Value;

/// Persistent backend behind the durable tier.
///
/// Implementations handle the actual storage (SQLite, in-memory, etc.). All
/// methods are synchronous; the durable tier actor is the only caller, so an
/// implementation only needs interior locking for its own handles.
pub trait StorageAdapter: Send + Sync {
    /// Short name used in logs and health reports.
    fn name(&self) -> &str;

    /// Insert or replace a batch of entries that all share one type.
    fn write_batch(&self, entry_type: MemoryType, entries: &[MemoryEntry]) -> Result<()>;

    /// Read one entry, including soft-deleted ones.
    fn read(&self, id: &str) -> Result<Option<MemoryEntry>>;

    /// Remove an entry and its version history. Returns whether it existed.
    fn delete(&self, id: &str) -> Result<bool>;

    /// Ids of entries whose text contains every whitespace token of `text`
    /// (case-insensitive).
    fn query_fulltext(&self, text: &str) -> Result<Vec<String>>;

    /// Ids of entries whose metadata field equals `value`.
    fn query_metadata(&self, field: &str, value: &Value) -> Result<Vec<String>>;

    /// Every stored entry. Used to rebuild indexes.
    fn scan(&self) -> Result<Vec<MemoryEntry>>;

    /// Replace the retained version history for an entry.
    fn save_versions(&self, memory_id: &str, versions: &[MemoryVersion]) -> Result<()>;

    /// Retained version history for an entry, oldest first.
    fn load_versions(&self, memory_id: &str) -> Result<Vec<MemoryVersion>>;
}

/// Lowercased whitespace tokens of a query string.
pub fn query_tokens(text: &str) -> Vec<String> {
    text.split_whitespace().map(|t| t.to_lowercase()).collect()
}
