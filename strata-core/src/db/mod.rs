//! SQLite storage adapter for the durable tier.
//!
//! Database location priority (resolved by callers):
//! 1. STRATA_DATABASE_PATH env var
//! 2. `database_path` from the config file
//! 3. ~/.strata/strata.db

use crate::error::{Error, Result};
use crate::memory::{contains_all_terms, tokenize, StorageAdapter};
use crate::types::{FieldChange, MemoryEntry, MemoryType, MemoryVersion};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;

const MIGRATIONS: &[&str] = &[include_str!("./migrations/001_memory_tables.sql")];

const ENTRY_COLUMNS: &str = "id, entry_type, owner_id, session_id, content, metadata_json, tags_json,
     ttl_seconds, version, compressed, encrypted, deleted, created_at, accessed_at, updated_at";

/// Database connection wrapper.
///
/// Thread-safe via internal Mutex. All database operations acquire the lock.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (creating if needed) the database at `path` and run migrations
    pub fn open_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(Error::Database)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        for migration in MIGRATIONS {
            conn.execute_batch(migration)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Check database connectivity
    pub fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        conn.execute_batch("SELECT 1").map_err(Error::Database)
    }

    /// Number of stored entries, deleted ones included
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memory_entry", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn map_entry(row: &rusqlite::Row) -> rusqlite::Result<EntryRow> {
        Ok(EntryRow {
            id: row.get(0)?,
            entry_type: row.get(1)?,
            owner_id: row.get(2)?,
            session_id: row.get(3)?,
            content: row.get(4)?,
            metadata_json: row.get(5)?,
            tags_json: row.get(6)?,
            ttl_seconds: row.get(7)?,
            version: row.get(8)?,
            compressed: row.get(9)?,
            encrypted: row.get(10)?,
            deleted: row.get(11)?,
            created_at: row.get(12)?,
            accessed_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn map_version(row: &rusqlite::Row) -> rusqlite::Result<VersionRow> {
        Ok(VersionRow {
            memory_id: row.get(0)?,
            version: row.get(1)?,
            changes_json: row.get(2)?,
            reason: row.get(3)?,
            author: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

/// Raw `memory_entry` row before JSON decoding.
struct EntryRow {
    id: String,
    entry_type: String,
    owner_id: String,
    session_id: Option<String>,
    content: String,
    metadata_json: String,
    tags_json: String,
    ttl_seconds: Option<i64>,
    version: i64,
    compressed: bool,
    encrypted: bool,
    deleted: bool,
    created_at: i64,
    accessed_at: i64,
    updated_at: i64,
}

impl EntryRow {
    fn into_entry(self) -> Result<MemoryEntry> {
        Ok(MemoryEntry {
            entry_type: self.entry_type.parse()?,
            content: serde_json::from_str(&self.content)?,
            metadata: serde_json::from_str::<Map<String, Value>>(&self.metadata_json)?,
            tags: serde_json::from_str::<BTreeSet<String>>(&self.tags_json)?,
            ttl_secs: self.ttl_seconds.map(|t| t.max(0) as u64),
            version: self.version.max(1) as u64,
            created_at: from_millis(self.created_at),
            accessed_at: from_millis(self.accessed_at),
            updated_at: from_millis(self.updated_at),
            compressed: self.compressed,
            encrypted: self.encrypted,
            deleted: self.deleted,
            id: self.id,
            owner_id: self.owner_id,
            session_id: self.session_id,
        })
    }
}

struct VersionRow {
    memory_id: String,
    version: i64,
    changes_json: String,
    reason: String,
    author: String,
    created_at: i64,
}

impl VersionRow {
    fn into_version(self) -> Result<MemoryVersion> {
        Ok(MemoryVersion {
            changes: serde_json::from_str::<BTreeMap<String, FieldChange>>(&self.changes_json)?,
            version: self.version.max(0) as u64,
            created_at: from_millis(self.created_at),
            memory_id: self.memory_id,
            reason: self.reason,
            author: self.author,
        })
    }
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

impl StorageAdapter for Database {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn write_batch(&self, entry_type: MemoryType, entries: &[MemoryEntry]) -> Result<()> {
        let mut conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO memory_entry
                 (id, entry_type, owner_id, session_id, content, content_text, metadata_json,
                  tags_json, ttl_seconds, version, compressed, encrypted, deleted,
                  created_at, accessed_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            )?;
            for entry in entries {
                if entry.entry_type != entry_type {
                    return Err(Error::validation(format!(
                        "entry {} is {} but the batch is {}",
                        entry.id, entry.entry_type, entry_type
                    )));
                }
                stmt.execute(params![
                    entry.id,
                    entry.entry_type.as_str(),
                    entry.owner_id,
                    entry.session_id,
                    serde_json::to_string(&entry.content)?,
                    entry.text().to_lowercase(),
                    serde_json::to_string(&entry.metadata)?,
                    serde_json::to_string(&entry.tags)?,
                    entry.ttl_secs.map(|t| t.min(i64::MAX as u64) as i64),
                    entry.version as i64,
                    entry.compressed,
                    entry.encrypted,
                    entry.deleted,
                    entry.created_at.timestamp_millis(),
                    entry.accessed_at.timestamp_millis(),
                    entry.updated_at.timestamp_millis(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn read(&self, id: &str) -> Result<Option<MemoryEntry>> {
        let row = {
            let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM memory_entry WHERE id = ?1",
                ENTRY_COLUMNS
            ))?;
            stmt.query_row(params![id], Self::map_entry).optional()?
        };
        row.map(EntryRow::into_entry).transpose()
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        conn.execute("DELETE FROM memory_version WHERE memory_id = ?1", params![id])?;
        let removed = conn.execute("DELETE FROM memory_entry WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    fn query_fulltext(&self, text: &str) -> Result<Vec<String>> {
        let terms: Vec<String> = tokenize(text).collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        // LIKE narrows the scan; whole-word matching happens below.
        let clauses: Vec<String> = (1..=terms.len())
            .map(|i| format!("content_text LIKE '%' || ?{} || '%'", i))
            .collect();
        let sql = format!(
            "SELECT id, content_text FROM memory_entry WHERE {} ORDER BY id",
            clauses.join(" AND ")
        );

        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(terms.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter(|(_, content_text)| contains_all_terms(content_text, text))
            .map(|(id, _)| id)
            .collect())
    }

    fn query_metadata(&self, field: &str, value: &Value) -> Result<Vec<String>> {
        let path = format!("$.\"{}\"", field.replace('"', "\\\""));
        let rows = {
            let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
            let mut stmt = conn.prepare(
                "SELECT id, metadata_json FROM memory_entry
                 WHERE json_type(metadata_json, ?1) IS NOT NULL
                 ORDER BY id",
            )?;
            stmt.query_map(params![path], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
        };

        let mut ids = Vec::new();
        for (id, metadata_json) in rows {
            let metadata: Map<String, Value> = serde_json::from_str(&metadata_json)?;
            if metadata.get(field) == Some(value) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn scan(&self) -> Result<Vec<MemoryEntry>> {
        let rows = {
            let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM memory_entry ORDER BY id",
                ENTRY_COLUMNS
            ))?;
            stmt.query_map([], Self::map_entry)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    fn save_versions(&self, memory_id: &str, versions: &[MemoryVersion]) -> Result<()> {
        let mut conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM memory_version WHERE memory_id = ?1",
            params![memory_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO memory_version
                 (memory_id, version, changes_json, reason, author, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for version in versions {
                stmt.execute(params![
                    memory_id,
                    version.version as i64,
                    serde_json::to_string(&version.changes)?,
                    version.reason,
                    version.author,
                    version.created_at.timestamp_millis(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_versions(&self, memory_id: &str) -> Result<Vec<MemoryVersion>> {
        let rows = {
            let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
            let mut stmt = conn.prepare(
                "SELECT memory_id, version, changes_json, reason, author, created_at
                 FROM memory_version WHERE memory_id = ?1 ORDER BY version",
            )?;
            stmt.query_map(params![memory_id], Self::map_version)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        rows.into_iter().map(VersionRow::into_version).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{DurableTierConfig, DurableTierStore};
    use serde_json::json;
    use std::sync::Arc;

    fn entry(id: &str, content: &str) -> MemoryEntry {
        MemoryEntry::new(MemoryType::Knowledge, "user-1", content)
            .with_id(id)
            .with_tag("rust")
            .with_metadata("status", "open")
    }

    #[test]
    fn test_write_and_read_back() {
        let db = Database::open_in_memory().unwrap();
        db.write_batch(MemoryType::Knowledge, &[entry("a", "Ownership rules")])
            .unwrap();

        let read = db.read("a").unwrap().unwrap();
        assert_eq!(read.text(), "Ownership rules");
        assert_eq!(read.entry_type, MemoryType::Knowledge);
        assert!(read.tags.contains("rust"));
        assert_eq!(read.metadata.get("status"), Some(&json!("open")));
        assert_eq!(read.version, 1);
        assert!(db.read("missing").unwrap().is_none());
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn test_batch_type_mismatch_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let profile = MemoryEntry::new(MemoryType::Profile, "u", "p").with_id("p");
        let result = db.write_batch(MemoryType::Knowledge, &[entry("a", "x"), profile]);
        assert!(result.is_err());
        assert_eq!(db.count().unwrap(), 0);
    }

    #[test]
    fn test_fulltext_and_metadata_queries() {
        let db = Database::open_in_memory().unwrap();
        let mut done = entry("b", "Lifetimes and borrowing");
        done.metadata.insert("status".into(), json!("done"));
        db.write_batch(MemoryType::Knowledge, &[entry("a", "Ownership and BORROWING"), done])
            .unwrap();

        assert_eq!(db.query_fulltext("borrowing").unwrap(), vec!["a", "b"]);
        assert_eq!(db.query_fulltext("ownership borrowing").unwrap(), vec!["a"]);
        assert!(db.query_fulltext("borrow").unwrap().is_empty());
        assert!(db.query_fulltext("").unwrap().is_empty());
        assert_eq!(db.query_metadata("status", &json!("done")).unwrap(), vec!["b"]);
        assert!(db.query_metadata("missing", &json!("done")).unwrap().is_empty());
    }

    #[test]
    fn test_versions_persist_and_delete_cascades() {
        let db = Database::open_in_memory().unwrap();
        db.write_batch(MemoryType::Knowledge, &[entry("a", "x")]).unwrap();
        let version = MemoryVersion {
            memory_id: "a".into(),
            version: 1,
            changes: BTreeMap::from([(
                "status".to_string(),
                FieldChange {
                    old: Some(json!("open")),
                    new: Some(json!("done")),
                },
            )]),
            reason: "fix".into(),
            author: "tester".into(),
            created_at: Utc::now(),
        };
        db.save_versions("a", &[version.clone()]).unwrap();

        let loaded = db.load_versions("a").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].changes, version.changes);

        assert!(db.delete("a").unwrap());
        assert!(db.load_versions("a").unwrap().is_empty());
        assert!(!db.delete("a").unwrap());
    }

    #[test]
    fn test_durable_store_over_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("strata.db");
        {
            let db = Arc::new(Database::open_path(&path).unwrap());
            let mut store = DurableTierStore::open(
                DurableTierConfig {
                    write_buffer_size: 1,
                    ..Default::default()
                },
                db,
            )
            .unwrap();
            store.store(entry("a", "persisted fact")).unwrap();
            let mut fields = Map::new();
            fields.insert("status".into(), json!("done"));
            store.update("a", &fields, "fix", "tester").unwrap();
        }

        let db = Arc::new(Database::open_path(&path).unwrap());
        let mut store = DurableTierStore::open(DurableTierConfig::default(), db).unwrap();
        let restored = store.rollback("a", 1, "tester").unwrap();
        assert_eq!(restored.metadata.get("status"), Some(&json!("open")));
        assert_eq!(restored.version, 3);
    }
}
