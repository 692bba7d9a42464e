//! Shared types for strata-core.
//!
//! These types cross every tier boundary: the stores hold them, the storage
//! adapters persist them and the SDK serializes them into boundary messages.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Enumerations
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of knowledge a memory entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Profile,
    CodePattern,
    Interaction,
    Knowledge,
    Optimization,
    Configuration,
}

impl MemoryType {
    pub const ALL: [MemoryType; 6] = [
        MemoryType::Profile,
        MemoryType::CodePattern,
        MemoryType::Interaction,
        MemoryType::Knowledge,
        MemoryType::Optimization,
        MemoryType::Configuration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Profile => "profile",
            MemoryType::CodePattern => "code_pattern",
            MemoryType::Interaction => "interaction",
            MemoryType::Knowledge => "knowledge",
            MemoryType::Optimization => "optimization",
            MemoryType::Configuration => "configuration",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.replace('-', "_").as_str() {
            "profile" => Ok(MemoryType::Profile),
            "code_pattern" => Ok(MemoryType::CodePattern),
            "interaction" => Ok(MemoryType::Interaction),
            "knowledge" => Ok(MemoryType::Knowledge),
            "optimization" => Ok(MemoryType::Optimization),
            "configuration" => Ok(MemoryType::Configuration),
            _ => Err(Error::validation(format!("Invalid memory type: {}", s))),
        }
    }
}

/// Memory tier an entry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Fast,
    Warm,
    Durable,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Fast, Tier::Warm, Tier::Durable];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Fast => "fast",
            Tier::Warm => "warm",
            Tier::Durable => "durable",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fast" => Ok(Tier::Fast),
            "warm" => Ok(Tier::Warm),
            "durable" => Ok(Tier::Durable),
            _ => Err(Error::validation(format!("Invalid tier: {}", s))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Entry
// ─────────────────────────────────────────────────────────────────────────────

/// A stored unit of memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub entry_type: MemoryType,
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub content: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Time to live in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl MemoryEntry {
    /// Create a version 1 entry with a fresh id
    pub fn new(entry_type: MemoryType, owner_id: impl Into<String>, content: impl Into<Value>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entry_type,
            owner_id: owner_id.into(),
            session_id: None,
            content: content.into(),
            metadata: Map::new(),
            tags: BTreeSet::new(),
            ttl_secs: None,
            version: 1,
            created_at: now,
            accessed_at: now,
            updated_at: now,
            compressed: false,
            encrypted: false,
            deleted: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = Some(ttl.as_secs());
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    /// Plain-text rendering of the content used for indexing and similarity.
    pub fn text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// SHA-256 of the text rendering, hex encoded
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether the wall-clock TTL has elapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_secs {
            Some(ttl) => {
                let ttl = chrono::Duration::seconds(ttl.min(i64::MAX as u64) as i64);
                self.created_at + ttl <= now
            }
            None => false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::validation("memory id must not be empty"));
        }
        if self.owner_id.trim().is_empty() {
            return Err(Error::validation("owner_id must not be empty"));
        }
        if self.version == 0 {
            return Err(Error::validation("version starts at 1"));
        }
        Ok(())
    }

    /// Current value of an addressable field.
    ///
    /// Names other than the entry's own fields address a metadata key,
    /// returning `None` when the key is absent.
    pub fn field_value(&self, field: &str) -> Option<Value> {
        match field {
            "content" => Some(self.content.clone()),
            "metadata" => Some(Value::Object(self.metadata.clone())),
            "tags" => Some(Value::from(
                self.tags.iter().cloned().collect::<Vec<String>>(),
            )),
            "type" => Some(Value::from(self.entry_type.as_str())),
            "ttl" => self.ttl_secs.map(Value::from),
            "compressed" => Some(Value::Bool(self.compressed)),
            "encrypted" => Some(Value::Bool(self.encrypted)),
            "session_id" => self.session_id.clone().map(Value::from),
            key => self.metadata.get(key).cloned(),
        }
    }

    /// Set (or clear, with `None`) an addressable field.
    pub fn apply_field(&mut self, field: &str, value: Option<Value>) -> Result<()> {
        match field {
            "id" | "owner_id" | "version" | "created_at" | "accessed_at" | "updated_at"
            | "deleted" => {
                return Err(Error::validation(format!("field '{}' is not updatable", field)));
            }
            "content" => self.content = value.unwrap_or(Value::Null),
            "metadata" => match value {
                Some(Value::Object(map)) => self.metadata = map,
                None | Some(Value::Null) => self.metadata.clear(),
                Some(_) => return Err(Error::validation("metadata must be an object")),
            },
            "tags" => match value {
                Some(Value::Array(items)) => {
                    let mut tags = BTreeSet::new();
                    for item in items {
                        match item {
                            Value::String(s) => {
                                tags.insert(s);
                            }
                            _ => return Err(Error::validation("tags must be strings")),
                        }
                    }
                    self.tags = tags;
                }
                None | Some(Value::Null) => self.tags.clear(),
                Some(_) => return Err(Error::validation("tags must be an array")),
            },
            "type" => match value {
                Some(Value::String(s)) => self.entry_type = s.parse()?,
                _ => return Err(Error::validation("type must be a string")),
            },
            "ttl" => match value {
                Some(Value::Number(n)) => {
                    self.ttl_secs = Some(
                        n.as_u64()
                            .ok_or_else(|| Error::validation("ttl must be a non-negative integer"))?,
                    )
                }
                None | Some(Value::Null) => self.ttl_secs = None,
                Some(_) => return Err(Error::validation("ttl must be a number of seconds")),
            },
            "compressed" => self.compressed = bool_field(field, value)?,
            "encrypted" => self.encrypted = bool_field(field, value)?,
            "session_id" => match value {
                Some(Value::String(s)) => self.session_id = Some(s),
                None | Some(Value::Null) => self.session_id = None,
                Some(_) => return Err(Error::validation("session_id must be a string")),
            },
            key => match value {
                Some(v) => {
                    self.metadata.insert(key.to_string(), v);
                }
                None => {
                    self.metadata.remove(key);
                }
            },
        }
        Ok(())
    }
}

fn bool_field(field: &str, value: Option<Value>) -> Result<bool> {
    match value {
        Some(Value::Bool(b)) => Ok(b),
        None | Some(Value::Null) => Ok(false),
        Some(_) => Err(Error::validation(format!("{} must be a boolean", field))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Version History
// ─────────────────────────────────────────────────────────────────────────────

/// Old and new value of one field. `None` means the field was absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub old: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub new: Option<Value>,
}

// A present key is `Some`, even when its value is null.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Immutable audit record of one update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryVersion {
    pub memory_id: String,
    /// The version number this record supersedes
    pub version: u64,
    pub changes: BTreeMap<String, FieldChange>,
    pub reason: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Indexes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    FullText,
    MetadataField,
}

/// Describes one secondary index maintained by the durable tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub kind: IndexKind,
    pub fields: Vec<String>,
    pub last_updated: DateTime<Utc>,
}
