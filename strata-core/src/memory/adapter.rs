//! Pure in-memory storage adapter.

use super::index::{contains_all_terms, tokenize};
use super::traits::StorageAdapter;
use crate::error::{Error, Result};
use crate::types::{MemoryEntry, MemoryType, MemoryVersion};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, MemoryEntry>,
    versions: HashMap<String, Vec<MemoryVersion>>,
}

/// Adapter keeping everything in process memory.
///
/// Useful for tests and for running without a database file. Individual
/// memory types can be made to fail their batches to exercise partial flush
/// handling.
#[derive(Default)]
pub struct InMemoryAdapter {
    inner: Mutex<Inner>,
    failing_types: Mutex<Vec<MemoryType>>,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent batch of `entry_type` fail.
    pub fn fail_type(&self, entry_type: MemoryType) -> Result<()> {
        let mut failing = self.failing_types.lock().map_err(|_| Error::LockPoisoned)?;
        if !failing.contains(&entry_type) {
            failing.push(entry_type);
        }
        Ok(())
    }

    /// Undo [`fail_type`](Self::fail_type) for every type.
    pub fn heal(&self) -> Result<()> {
        self.failing_types
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageAdapter for InMemoryAdapter {
    fn name(&self) -> &str {
        "memory"
    }

    fn write_batch(&self, entry_type: MemoryType, entries: &[MemoryEntry]) -> Result<()> {
        if self
            .failing_types
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .contains(&entry_type)
        {
            return Err(Error::resource_with(
                "batch write rejected",
                [("type", entry_type.as_str())],
            ));
        }

        let mut inner = self.inner.lock().map_err(|_| Error::LockPoisoned)?;
        for entry in entries {
            inner.entries.insert(entry.id.clone(), entry.clone());
        }
        Ok(())
    }

    fn read(&self, id: &str) -> Result<Option<MemoryEntry>> {
        let inner = self.inner.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(inner.entries.get(id).cloned())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().map_err(|_| Error::LockPoisoned)?;
        inner.versions.remove(id);
        Ok(inner.entries.remove(id).is_some())
    }

    fn query_fulltext(&self, text: &str) -> Result<Vec<String>> {
        if tokenize(text).next().is_none() {
            return Ok(Vec::new());
        }
        let inner = self.inner.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(inner
            .entries
            .values()
            .filter(|e| contains_all_terms(&e.text(), text))
            .map(|e| e.id.clone())
            .collect())
    }

    fn query_metadata(&self, field: &str, value: &Value) -> Result<Vec<String>> {
        let inner = self.inner.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(inner
            .entries
            .values()
            .filter(|e| e.metadata.get(field) == Some(value))
            .map(|e| e.id.clone())
            .collect())
    }

    fn scan(&self) -> Result<Vec<MemoryEntry>> {
        let inner = self.inner.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(inner.entries.values().cloned().collect())
    }

    fn save_versions(&self, memory_id: &str, versions: &[MemoryVersion]) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| Error::LockPoisoned)?;
        if versions.is_empty() {
            inner.versions.remove(memory_id);
        } else {
            inner.versions.insert(memory_id.to_string(), versions.to_vec());
        }
        Ok(())
    }

    fn load_versions(&self, memory_id: &str) -> Result<Vec<MemoryVersion>> {
        let inner = self.inner.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(inner.versions.get(memory_id).cloned().unwrap_or_default())
    }
}
