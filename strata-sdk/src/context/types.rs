//! Context Assembly Types
//!
//! Sources, candidate entries, requests and the assembled bundle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{SDKError, SDKResult};

/// Kind of provider behind a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Memory,
    CodeAnalysis,
    Documentation,
    Conversation,
    Planning,
    Custom,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::CodeAnalysis => "code_analysis",
            Self::Documentation => "documentation",
            Self::Conversation => "conversation",
            Self::Planning => "planning",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = SDKError;

    fn from_str(s: &str) -> SDKResult<Self> {
        match s.replace('-', "_").as_str() {
            "memory" => Ok(Self::Memory),
            "code_analysis" => Ok(Self::CodeAnalysis),
            "documentation" => Ok(Self::Documentation),
            "conversation" => Ok(Self::Conversation),
            "planning" => Ok(Self::Planning),
            "custom" => Ok(Self::Custom),
            other => Err(SDKError::invalid_input(format!("unknown source type: {other}"))),
        }
    }
}

/// Whether a source takes part in builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    #[default]
    Active,
    Disabled,
}

/// A registered context provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Relative trust; compared against the other queried sources
    pub weight: f64,
    #[serde(default)]
    pub status: SourceStatus,
    /// Provider-specific options
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl ContextSource {
    pub fn new(id: impl Into<String>, source_type: SourceType, weight: f64) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            source_type,
            weight,
            status: SourceStatus::Active,
            config: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == SourceStatus::Active
    }

    /// Per-build fetch limit from `config.limit`, if set.
    pub fn limit(&self) -> Option<usize> {
        self.config
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
    }
}

/// Partial update applied to a registered source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceUpdate {
    pub name: Option<String>,
    pub weight: Option<f64>,
    pub status: Option<SourceStatus>,
    /// Keys merged into the source config; a null value removes the key
    pub config: Map<String, Value>,
}

/// One candidate fetched from a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub source_id: String,
    pub content: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Source-supplied relevance in [0, 1]
    pub relevance_score: f64,
    pub timestamp: DateTime<Utc>,
    pub size_tokens: usize,
    #[serde(default)]
    pub compressed: bool,
    /// Combined ranking score, set during scoring
    #[serde(default)]
    pub score: f64,
}

impl ContextEntry {
    pub fn new(source_id: impl Into<String>, content: impl Into<Value>, relevance_score: f64) -> Self {
        let content = content.into();
        let size_tokens = estimate_tokens(&text_of(&content));
        Self {
            source_id: source_id.into(),
            content,
            metadata: Map::new(),
            relevance_score: relevance_score.clamp(0.0, 1.0),
            timestamp: Utc::now(),
            size_tokens,
            compressed: false,
            score: 0.0,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Content as plain text
    pub fn text(&self) -> String {
        text_of(&self.content)
    }

    /// Replace the content with `text` and re-estimate its size.
    pub fn set_text(&mut self, text: String) {
        self.size_tokens = estimate_tokens(&text);
        self.content = Value::String(text);
    }
}

fn text_of(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Rough token estimate: four characters per token, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// A context build request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildRequest {
    /// What the context is for, e.g. "debug"
    pub purpose: String,
    /// Free-text query handed to sources; empty matches everything
    pub query: String,
    /// Restrict memory sources to one owner
    pub owner_id: Option<String>,
    /// Token budget; the assembler default applies when absent
    pub max_tokens: Option<usize>,
    /// Query only these sources instead of every active one
    pub required_sources: Vec<String>,
    /// Entry metadata that must match for an entry to be considered
    pub filters: Map<String, Value>,
    /// Entry metadata that earns an importance bonus
    pub preferences: Map<String, Value>,
}

impl BuildRequest {
    pub fn new(purpose: impl Into<String>) -> Self {
        Self {
            purpose: purpose.into(),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn for_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn require_source(mut self, source_id: impl Into<String>) -> Self {
        self.required_sources.push(source_id.into());
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn with_preference(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.preferences.insert(key.into(), value.into());
        self
    }
}

/// A source that contributed nothing to a build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source_id: String,
    pub error: String,
}

/// Aggregate facts about a bundle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub total_tokens: usize,
    pub sources_used: Vec<String>,
    #[serde(default)]
    pub source_failures: Vec<SourceFailure>,
    pub compression_applied: bool,
    /// Candidates dropped as duplicates or to meet the budget
    pub dropped_entries: usize,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
    pub cache_hit: bool,
}

/// The assembled, ranked, budget-trimmed result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub request_id: String,
    pub purpose: String,
    pub entries: Vec<ContextEntry>,
    pub metadata: BundleMetadata,
    pub timestamp: DateTime<Utc>,
}

/// Progress of a single build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    #[default]
    Idle,
    Building,
    Gathering,
    Scoring,
    Optimizing,
    Done,
}

/// An event of a streamed build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    Chunk {
        index: usize,
        entries: Vec<ContextEntry>,
    },
    Complete {
        request_id: String,
        total_tokens: usize,
        chunks: usize,
    },
}
