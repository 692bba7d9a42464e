//! Tier Coordinator Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strata_core::memory::ConsolidationKind;
use strata_core::{ErrorKind, MemoryEntry, Tier};

use crate::{SDKError, SDKResult};

/// What the coordinator is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationStatus {
    #[default]
    Idle,
    Coordinating,
    Syncing,
}

/// A tier that failed during a multi-tier operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierFailure {
    pub tier: Tier,
    pub kind: ErrorKind,
    pub error: String,
}

impl TierFailure {
    pub fn new(tier: Tier, err: &SDKError) -> Self {
        Self {
            tier,
            kind: err.kind(),
            error: err.to_string(),
        }
    }
}

/// Entries one tier returned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierResults {
    pub tier: Tier,
    pub entries: Vec<MemoryEntry>,
}

/// Result of a cross-tier search; `failures` is non-empty on partial success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossTierSearchResult {
    pub owner_id: String,
    pub query: String,
    pub results: Vec<TierResults>,
    pub failures: Vec<TierFailure>,
}

impl CrossTierSearchResult {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn total(&self) -> usize {
        self.results.iter().map(|r| r.entries.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Succeeded,
    Failed,
}

/// Outcome for one migrated item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationItem {
    pub id: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub source_tier: Tier,
    pub target_tier: Tier,
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<MigrationItem>,
}

impl MigrationReport {
    pub fn new(source_tier: Tier, target_tier: Tier) -> Self {
        Self {
            source_tier,
            target_tier,
            succeeded: 0,
            failed: 0,
            items: Vec::new(),
        }
    }

    pub fn record(&mut self, id: impl Into<String>, result: SDKResult<()>) {
        let id = id.into();
        match result {
            Ok(()) => {
                self.succeeded += 1;
                self.items.push(MigrationItem {
                    id,
                    status: ItemStatus::Succeeded,
                    error: None,
                });
            }
            Err(e) => {
                self.failed += 1;
                self.items.push(MigrationItem {
                    id,
                    status: ItemStatus::Failed,
                    error: Some(e.to_string()),
                });
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub owner_id: String,
    pub kind: ConsolidationKind,
    pub examined: usize,
    pub removed: Vec<String>,
    pub created: Vec<String>,
    pub failures: Vec<TierFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    Migration,
    Replication,
    Consolidation,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Migration => "migration",
            Self::Replication => "replication",
            Self::Consolidation => "consolidation",
        }
    }
}

impl std::fmt::Display for SyncKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SyncKind {
    type Err = SDKError;

    fn from_str(s: &str) -> SDKResult<Self> {
        match s {
            "migration" => Ok(Self::Migration),
            "replication" => Ok(Self::Replication),
            "consolidation" => Ok(Self::Consolidation),
            other => Err(SDKError::invalid_input(format!("unknown sync kind: {other}"))),
        }
    }
}

/// An in-flight sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub sync_id: String,
    pub owner_id: String,
    pub source_tier: Tier,
    pub target_tier: Tier,
    pub kind: SyncKind,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub sync_id: String,
    pub kind: SyncKind,
    pub source_tier: Tier,
    pub target_tier: Tier,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<MigrationItem>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    Hash,
    Range,
    List,
    Composite,
}

impl std::str::FromStr for PartitionStrategy {
    type Err = SDKError;

    fn from_str(s: &str) -> SDKResult<Self> {
        match s {
            "hash" => Ok(Self::Hash),
            "range" => Ok(Self::Range),
            "list" => Ok(Self::List),
            "composite" => Ok(Self::Composite),
            other => Err(SDKError::invalid_input(format!("unknown partition strategy: {other}"))),
        }
    }
}

/// Per-tier limits of a partition. `max_items` is required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityLimits {
    pub max_items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size_bytes: Option<u64>,
}

impl CapacityLimits {
    pub fn items(max_items: usize) -> Self {
        Self {
            max_items: Some(max_items),
            max_size_bytes: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierUsage {
    pub items: usize,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    #[default]
    Active,
    Full,
}

/// A per-owner storage boundary spanning all tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub partition_id: String,
    pub owner_id: String,
    pub strategy: PartitionStrategy,
    pub capacity_limits: CapacityLimits,
    pub current_usage: BTreeMap<Tier, TierUsage>,
    pub status: PartitionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Read,
    Write,
    Delete,
}

impl AccessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for AccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AccessKind {
    type Err = SDKError;

    fn from_str(s: &str) -> SDKResult<Self> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "delete" => Ok(Self::Delete),
            other => Err(SDKError::invalid_input(format!("unknown access kind: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub owner_id: String,
    pub access: AccessKind,
    pub tier: Tier,
    pub resource_id: String,
    pub granted: bool,
    pub reason: String,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthKind {
    #[default]
    Quick,
    Deep,
}

impl std::str::FromStr for HealthKind {
    type Err = SDKError;

    fn from_str(s: &str) -> SDKResult<Self> {
        match s {
            "quick" => Ok(Self::Quick),
            "deep" => Ok(Self::Deep),
            other => Err(SDKError::invalid_input(format!("unknown health check kind: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unavailable,
}

/// Point-in-time size of one tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSnapshot {
    pub items: usize,
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierHealth {
    pub tier: Tier,
    pub status: HealthStatus,
    pub items: usize,
    pub capacity: Option<usize>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub kind: HealthKind,
    pub status: HealthStatus,
    pub coordination_status: CoordinationStatus,
    pub tiers: Vec<TierHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PerformanceMetrics>,
    pub checked_at: DateTime<Utc>,
}

/// Shared performance record updated by every coordinator operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub operations_completed: u64,
    pub operations_failed: u64,
    /// Mean latency over the most recent operations
    pub average_latency_ms: f64,
    pub sync_count: u64,
    pub partition_count: usize,
    pub active_syncs: usize,
    pub retries: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
}
