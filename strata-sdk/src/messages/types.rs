//! Boundary message types.
//!
//! Every message travels as an [`Envelope`]: a `type` string, a correlation
//! id and a `data` payload. Requests decode `data` into one of the payload
//! structs below; responses are the tagged [`Response`] union.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use strata_core::memory::{ConsolidationKind, FlushReport};
use strata_core::{MemoryEntry, MemoryType, MemoryVersion, Tier};

use crate::context::{ContextBundle, SourceUpdate};
use crate::coordinator::{
    AccessDecision, AccessKind, CapacityLimits, ConsolidationReport, CrossTierSearchResult, HealthKind, HealthReport,
    MigrationReport, Partition, PartitionStrategy, PerformanceMetrics, SyncKind, SyncReport,
};
use crate::error::ErrorBody;
use crate::{SDKError, SDKResult};

/// Wire form of every request and response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(message_type: impl Into<String>, data: Value) -> Self {
        Self {
            message_type: message_type.into(),
            correlation_id: None,
            data,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn from_json(raw: &str) -> SDKResult<Self> {
        serde_json::from_str(raw).map_err(|e| SDKError::invalid_input(format!("malformed envelope: {e}")))
    }

    pub fn is_error(&self) -> bool {
        self.message_type == ERROR_TYPE
    }
}

pub const ERROR_TYPE: &str = "error";

// ─────────────────────────────────────────────────────────────────────────────
// Request payloads
// ─────────────────────────────────────────────────────────────────────────────

fn default_tier() -> Tier {
    Tier::Durable
}

fn default_author() -> String {
    "system".to_string()
}

fn default_limit() -> usize {
    20
}

/// A new entry as callers describe it; ids and timestamps are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

impl EntryPayload {
    pub fn into_entry(self) -> MemoryEntry {
        let mut entry = MemoryEntry::new(self.entry_type, self.owner_id, self.content);
        if let Some(id) = self.id {
            entry = entry.with_id(id);
        }
        entry.session_id = self.session_id;
        entry.metadata = self.metadata;
        entry.tags = self.tags;
        entry.ttl_secs = self.ttl_secs;
        entry
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorePayload {
    #[serde(default = "default_tier")]
    pub tier: Tier,
    #[serde(flatten)]
    pub entry: EntryPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPayload {
    pub id: String,
    /// Look in every tier, fastest first, when absent
    #[serde(default)]
    pub tier: Option<Tier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPayload {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default, rename = "type")]
    pub entry_type: Option<MemoryType>,
    #[serde(default = "default_tier")]
    pub tier: Tier,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePayload {
    pub id: String,
    pub changes: Map<String, Value>,
    #[serde(default)]
    pub reason: String,
    #[serde(default = "default_author")]
    pub author: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackPayload {
    pub id: String,
    pub version: u64,
    #[serde(default = "default_author")]
    pub author: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletePayload {
    pub id: String,
    #[serde(default = "default_tier")]
    pub tier: Tier,
    /// Durable tier only; the fast tiers always remove
    #[serde(default)]
    pub hard: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdPayload {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyPayload {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossSearchPayload {
    pub owner_id: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub tiers: Vec<Tier>,
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigratePayload {
    pub owner_id: String,
    pub item_ids: Vec<String>,
    pub source_tier: Tier,
    pub target_tier: Tier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatePayload {
    pub owner_id: String,
    pub kind: ConsolidationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub owner_id: String,
    pub source_tier: Tier,
    pub target_tier: Tier,
    pub sync_kind: SyncKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePartitionPayload {
    pub partition_id: String,
    pub owner_id: String,
    pub strategy: PartitionStrategy,
    pub capacity_limits: CapacityLimits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionWritePayload {
    pub partition_id: String,
    pub tier: Tier,
    pub entry: EntryPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPayload {
    pub owner_id: String,
    pub access: AccessKind,
    pub tier: Tier,
    #[serde(default)]
    pub resource_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthPayload {
    #[serde(default)]
    pub kind: HealthKind,
    #[serde(default)]
    pub include_metrics: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUpdatePayload {
    pub source_id: String,
    #[serde(flatten)]
    pub update: SourceUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceIdPayload {
    pub source_id: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredData {
    pub id: String,
    pub tier: Tier,
    /// Set when the store filled the durable write buffer and flushed it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flush: Option<FlushReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchData {
    pub tier: Tier,
    pub entries: Vec<MemoryEntry>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryData {
    pub id: String,
    pub versions: Vec<MemoryVersion>,
}

/// Outcome of an operation with no richer result type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationData {
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

impl OperationData {
    pub fn new(operation: impl Into<String>, id: Option<String>, success: bool) -> Self {
        Self {
            operation: operation.into(),
            id,
            success,
            detail: Value::Null,
        }
    }

    pub fn with_detail(mut self, detail: impl Serialize) -> SDKResult<Self> {
        self.detail = serde_json::to_value(detail)?;
        Ok(self)
    }
}

/// Every response the dispatcher produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Response {
    #[serde(rename = "memory.stored")]
    Stored(StoredData),
    #[serde(rename = "memory.entry")]
    Entry(Box<MemoryEntry>),
    #[serde(rename = "memory.search.result")]
    SearchResult(SearchData),
    #[serde(rename = "memory.history")]
    History(HistoryData),
    #[serde(rename = "memory.operation.result")]
    Operation(OperationData),
    #[serde(rename = "memory.sync.status")]
    SyncStatus(SyncReport),
    #[serde(rename = "coordination.search.result")]
    CrossTierSearch(CrossTierSearchResult),
    #[serde(rename = "coordination.migration.result")]
    Migration(MigrationReport),
    #[serde(rename = "coordination.consolidation.result")]
    Consolidation(ConsolidationReport),
    #[serde(rename = "coordination.partition.created")]
    PartitionCreated(Partition),
    #[serde(rename = "coordination.access.decision")]
    AccessDecision(AccessDecision),
    #[serde(rename = "coordination.health.report")]
    HealthReport(Box<HealthReport>),
    #[serde(rename = "coordination.metrics.report")]
    MetricsReport(PerformanceMetrics),
    #[serde(rename = "context.bundle")]
    Bundle(Box<ContextBundle>),
    #[serde(rename = "error")]
    Error(ErrorBody),
}

impl Response {
    pub fn error(err: &SDKError) -> Self {
        Self::Error(ErrorBody::from(err))
    }

    /// Wrap as an envelope carrying `correlation_id`.
    pub fn into_envelope(self, correlation_id: String) -> Envelope {
        let (message_type, data) = match serde_json::to_value(&self) {
            Ok(Value::Object(mut fields)) => (
                fields
                    .remove("type")
                    .and_then(|t| t.as_str().map(str::to_string))
                    .unwrap_or_else(|| ERROR_TYPE.to_string()),
                fields.remove("data").unwrap_or(Value::Null),
            ),
            Ok(_) | Err(_) => {
                tracing::error!("Response did not serialize to an object");
                (ERROR_TYPE.to_string(), Value::Null)
            }
        };
        Envelope {
            message_type,
            correlation_id: Some(correlation_id),
            data,
        }
    }

    /// Decode a response envelope.
    pub fn from_envelope(envelope: &Envelope) -> SDKResult<Self> {
        let tagged = serde_json::json!({ "type": envelope.message_type, "data": envelope.data });
        Ok(serde_json::from_value(tagged)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_core::ErrorKind;

    #[test]
    fn test_envelope_parsing() {
        let envelope = Envelope::from_json(r#"{"type":"memory.get","data":{"id":"m1"}}"#).unwrap();
        assert_eq!(envelope.message_type, "memory.get");
        assert!(envelope.correlation_id.is_none());
        assert!(Envelope::from_json("{not json").is_err());

        let envelope = Envelope::from_json(r#"{"type":"coordination.metrics"}"#).unwrap();
        assert_eq!(envelope.data, Value::Null);
    }

    #[test]
    fn test_store_payload_defaults_to_durable() {
        let payload: StorePayload = serde_json::from_value(json!({
            "type": "interaction",
            "owner_id": "alice",
            "content": "hello",
            "ttl_secs": 5
        }))
        .unwrap();
        assert_eq!(payload.tier, Tier::Durable);
        let entry = payload.entry.into_entry();
        assert_eq!(entry.ttl_secs, Some(5));
        assert_eq!(entry.version, 1);
    }

    #[test]
    fn test_unknown_kinds_fail_to_decode() {
        let bad_kind = serde_json::from_value::<ConsolidatePayload>(json!({"owner_id": "a", "kind": "merge"}));
        assert!(bad_kind.is_err());
        let bad_tier = serde_json::from_value::<SyncPayload>(json!({
            "owner_id": "a", "source_tier": "cold", "target_tier": "fast", "sync_kind": "replication"
        }));
        assert!(bad_tier.is_err());
    }

    #[test]
    fn test_response_envelope_shape() {
        let response = Response::Operation(OperationData::new("memory.flush", None, true));
        let envelope = response.clone().into_envelope("c-1".into());
        assert_eq!(envelope.message_type, "memory.operation.result");
        assert_eq!(envelope.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(envelope.data["success"], true);
        assert_eq!(Response::from_envelope(&envelope).unwrap(), response);

        let error = Response::error(&SDKError::invalid_input("nope")).into_envelope("c-2".into());
        assert!(error.is_error());
        assert_eq!(error.data["kind"], json!(ErrorKind::Validation));
    }
}
