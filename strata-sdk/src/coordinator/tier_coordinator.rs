//! Tier Coordinator actor.
//!
//! Owns partitions, the audit trail and the performance record. Tier work is
//! only ever issued through [`TierClient`]s; fan-out runs on a `JoinSet`
//! with every target under the operation timeout, so one slow or broken
//! tier degrades the answer instead of failing it.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use strata_core::memory::{
    ConsolidationKind, ConsolidationStrategy, DuplicateRemoval, MAILBOX_CAPACITY, ObsoleteCleanup,
    PatternExtraction, Reply, call,
};
use strata_core::{MemoryEntry, Tier};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::access::{AuditTrail, decide};
use super::metrics::MetricsRecorder;
use super::partition::PartitionRegistry;
use super::retry::{OperationClass, Retried, RetryPolicy, retry};
use super::tiers::TierClient;
use super::types::{
    AccessDecision, AccessKind, CapacityLimits, ConsolidationReport, CoordinationStatus, CrossTierSearchResult,
    HealthKind, HealthReport, HealthStatus, MigrationReport, Partition, PartitionStrategy, PerformanceMetrics,
    SyncKind, SyncRecord, SyncReport, TierFailure, TierHealth, TierResults,
};
use crate::config::CoordinatorConfig;
use crate::utils::validate_owner;
use crate::{SDKError, SDKResult};

const NAME: &str = "coordinator";

/// Per-tier result count when a search names no limit.
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// Share of capacity above which a tier reports degraded.
const DEGRADED_FILL: f64 = 0.9;

/// Id the deep health check reads; it is never stored.
const HEALTH_PROBE_ID: &str = "__strata_health_probe__";

/// Run `op` with retries, all of it bounded by `wait`.
async fn bounded<T, F, Fut>(
    wait: Duration,
    policy: RetryPolicy,
    class: OperationClass,
    operation: &str,
    op: F,
) -> Retried<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SDKResult<T>>,
{
    match tokio::time::timeout(wait, retry(policy, class, operation, op)).await {
        Ok(outcome) => outcome,
        Err(_) => Retried {
            result: Err(SDKError::timeout(operation, wait.as_millis() as u64)),
            retries: 0,
        },
    }
}

/// Copy one entry between tiers, then drop the source copy unless
/// `keep_source`.
async fn transfer(
    source: Arc<dyn TierClient>,
    target: Arc<dyn TierClient>,
    owner_id: String,
    id: String,
    keep_source: bool,
) -> SDKResult<()> {
    let entry = source.get(&id).await?;
    if entry.owner_id != owner_id {
        return Err(SDKError::invalid_input(format!("memory {id} is not owned by {owner_id}")));
    }
    target.put(entry).await?;
    if !keep_source {
        source.delete(&id).await?;
    }
    Ok(())
}

pub struct TierCoordinator {
    config: CoordinatorConfig,
    policy: RetryPolicy,
    tiers: BTreeMap<Tier, Arc<dyn TierClient>>,
    strategies: HashMap<ConsolidationKind, Arc<dyn ConsolidationStrategy>>,
    partitions: PartitionRegistry,
    audit: AuditTrail,
    metrics: MetricsRecorder,
    syncs: HashMap<String, SyncRecord>,
    status: watch::Sender<CoordinationStatus>,
}

impl TierCoordinator {
    pub fn new(config: CoordinatorConfig, clients: Vec<Arc<dyn TierClient>>) -> Self {
        let mut tiers = BTreeMap::new();
        for client in clients {
            if tiers.insert(client.tier(), client).is_some() {
                tracing::warn!("Duplicate tier client replaced");
            }
        }

        let duplicates = DuplicateRemoval {
            similarity_threshold: config.similarity_threshold,
        };
        let patterns = PatternExtraction {
            min_support: config.pattern_min_support,
            ..Default::default()
        };
        let obsolete = ObsoleteCleanup {
            max_idle_secs: i64::try_from(config.obsolete_age().as_secs()).unwrap_or(i64::MAX),
        };

        Self {
            policy: RetryPolicy::from_config(&config),
            tiers,
            strategies: HashMap::new(),
            partitions: PartitionRegistry::new(),
            audit: AuditTrail::default(),
            metrics: MetricsRecorder::new(),
            syncs: HashMap::new(),
            status: watch::Sender::new(CoordinationStatus::Idle),
            config,
        }
        .with_strategy(Arc::new(duplicates))
        .with_strategy(Arc::new(patterns))
        .with_strategy(Arc::new(obsolete))
    }

    /// Replace the strategy for its kind.
    pub fn with_strategy(mut self, strategy: Arc<dyn ConsolidationStrategy>) -> Self {
        self.strategies.insert(strategy.kind(), strategy);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn status(&self) -> CoordinationStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinationStatus> {
        self.status.subscribe()
    }

    pub fn tiers(&self) -> Vec<Tier> {
        self.tiers.keys().copied().collect()
    }

    fn set_status(&self, status: CoordinationStatus) {
        self.status.send_replace(status);
    }

    fn client(&self, tier: Tier) -> SDKResult<Arc<dyn TierClient>> {
        self.tiers
            .get(&tier)
            .cloned()
            .ok_or_else(|| SDKError::invalid_input(format!("tier not available: {tier}")))
    }

    /// Named tiers in tier order, or every tier when none are named.
    fn targets(&self, tiers: &[Tier]) -> SDKResult<Vec<Arc<dyn TierClient>>> {
        if tiers.is_empty() {
            return Ok(self.tiers.values().cloned().collect());
        }
        let mut named = tiers.to_vec();
        named.sort();
        named.dedup();
        named.into_iter().map(|t| self.client(t)).collect()
    }

    fn finish<T>(&mut self, started: Instant, retries: u32, result: SDKResult<T>) -> SDKResult<T> {
        self.metrics.record(started.elapsed(), result.is_ok(), retries);
        self.set_status(CoordinationStatus::Idle);
        result
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Search
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn cross_tier_search(
        &mut self,
        owner_id: &str,
        query: &str,
        tiers: &[Tier],
        limit: usize,
    ) -> SDKResult<CrossTierSearchResult> {
        let started = Instant::now();
        self.set_status(CoordinationStatus::Coordinating);
        let mut retries = 0;
        let result = self.search_tiers(owner_id, query, tiers, limit, &mut retries).await;
        self.finish(started, retries, result)
    }

    async fn search_tiers(
        &self,
        owner_id: &str,
        query: &str,
        tiers: &[Tier],
        limit: usize,
        retries: &mut u32,
    ) -> SDKResult<CrossTierSearchResult> {
        validate_owner(owner_id)?;
        let targets = self.targets(tiers)?;
        let limit = if limit == 0 { DEFAULT_SEARCH_LIMIT } else { limit };
        let (wait, policy) = (self.config.operation_timeout(), self.policy);
        let order: Vec<Tier> = targets.iter().map(|c| c.tier()).collect();

        let mut set = JoinSet::new();
        for (index, client) in targets.into_iter().enumerate() {
            let owner = owner_id.to_string();
            let query = query.to_string();
            set.spawn(async move {
                let outcome = bounded(wait, policy, OperationClass::Idempotent, "cross_tier_search", || {
                    let client = client.clone();
                    let owner = owner.clone();
                    let query = query.clone();
                    async move { client.search(&owner, &query, limit).await }
                })
                .await;
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<Retried<Vec<MemoryEntry>>>> = (0..order.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => tracing::warn!(error = %e, "Tier search task aborted"),
            }
        }

        let mut result = CrossTierSearchResult {
            owner_id: owner_id.to_string(),
            query: query.to_string(),
            results: Vec::new(),
            failures: Vec::new(),
        };
        for (tier, outcome) in order.iter().copied().zip(outcomes) {
            let outcome = outcome.unwrap_or_else(|| Retried {
                result: Err(SDKError::Core(strata_core::Error::system("tier search task aborted"))),
                retries: 0,
            });
            *retries += outcome.retries;
            match outcome.result {
                Ok(entries) => result.results.push(TierResults { tier, entries }),
                Err(e) => {
                    tracing::warn!(%tier, owner_id, error = %e, "Tier search failed");
                    result.failures.push(TierFailure::new(tier, &e));
                }
            }
        }

        if result.results.is_empty() && !result.failures.is_empty() {
            let mut context: Vec<(String, String)> = result
                .failures
                .iter()
                .map(|f| (f.tier.to_string(), f.error.clone()))
                .collect();
            context.push(("owner_id".to_string(), owner_id.to_string()));
            return Err(SDKError::resource("every tier failed", context));
        }
        tracing::debug!(owner_id, total = result.total(), failed = result.failures.len(), "Cross-tier search");
        Ok(result)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Migration
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn migrate(
        &mut self,
        owner_id: &str,
        ids: &[String],
        source_tier: Tier,
        target_tier: Tier,
    ) -> SDKResult<MigrationReport> {
        let started = Instant::now();
        self.set_status(CoordinationStatus::Coordinating);
        let mut retries = 0;
        let result = self
            .migrate_items(owner_id, ids, source_tier, target_tier, false, &mut retries)
            .await;
        self.finish(started, retries, result)
    }

    async fn migrate_items(
        &self,
        owner_id: &str,
        ids: &[String],
        source_tier: Tier,
        target_tier: Tier,
        keep_source: bool,
        retries: &mut u32,
    ) -> SDKResult<MigrationReport> {
        validate_owner(owner_id)?;
        if source_tier == target_tier {
            return Err(SDKError::invalid_input("source and target tier must differ"));
        }
        if ids.is_empty() {
            return Err(SDKError::invalid_input("no items to migrate"));
        }
        let source = self.client(source_tier)?;
        let target = self.client(target_tier)?;
        let wait = self.config.operation_timeout();

        let mut report = MigrationReport::new(source_tier, target_tier);
        for id in ids {
            let outcome = bounded(wait, self.policy, OperationClass::Mutating, "migrate", || {
                transfer(
                    source.clone(),
                    target.clone(),
                    owner_id.to_string(),
                    id.clone(),
                    keep_source,
                )
            })
            .await;
            *retries += outcome.retries;
            if let Err(e) = &outcome.result {
                tracing::warn!(id = %id, %source_tier, %target_tier, error = %e, "Item migration failed");
            }
            report.record(id.clone(), outcome.result);
        }
        tracing::info!(
            owner_id,
            %source_tier,
            %target_tier,
            succeeded = report.succeeded,
            failed = report.failed,
            "Migration finished"
        );
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Consolidation
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn consolidate(&mut self, owner_id: &str, kind: ConsolidationKind) -> SDKResult<ConsolidationReport> {
        let started = Instant::now();
        self.set_status(CoordinationStatus::Coordinating);
        let mut retries = 0;
        let tiers = self.tiers();
        let result = self.consolidate_tiers(owner_id, kind, &tiers, &mut retries).await;
        self.finish(started, retries, result)
    }

    async fn consolidate_tiers(
        &self,
        owner_id: &str,
        kind: ConsolidationKind,
        tiers: &[Tier],
        retries: &mut u32,
    ) -> SDKResult<ConsolidationReport> {
        validate_owner(owner_id)?;
        let strategy = self
            .strategies
            .get(&kind)
            .cloned()
            .ok_or_else(|| SDKError::invalid_input(format!("unknown consolidation kind: {kind}")))?;
        let targets = self.targets(tiers)?;
        let wait = self.config.operation_timeout();

        let mut report = ConsolidationReport {
            owner_id: owner_id.to_string(),
            kind,
            examined: 0,
            removed: Vec::new(),
            created: Vec::new(),
            failures: Vec::new(),
        };

        // The first copy of an id, in tier order, is the one planned on.
        let mut entries: Vec<MemoryEntry> = Vec::new();
        let mut holders: HashMap<String, Vec<Arc<dyn TierClient>>> = HashMap::new();
        for client in &targets {
            let outcome = bounded(wait, self.policy, OperationClass::Idempotent, "consolidate", || {
                let client = client.clone();
                let owner = owner_id.to_string();
                async move { client.entries_for_owner(&owner).await }
            })
            .await;
            *retries += outcome.retries;
            match outcome.result {
                Ok(found) => {
                    for entry in found {
                        let held = holders.entry(entry.id.clone()).or_default();
                        if held.is_empty() {
                            entries.push(entry);
                        }
                        held.push(client.clone());
                    }
                }
                Err(e) => report.failures.push(TierFailure::new(client.tier(), &e)),
            }
        }
        report.examined = entries.len();

        let plan = strategy.plan(owner_id, &entries, Utc::now());
        for id in plan.remove {
            let mut removed = true;
            for client in holders.get(&id).into_iter().flatten() {
                let outcome = bounded(wait, self.policy, OperationClass::Mutating, "consolidate", || {
                    let client = client.clone();
                    let id = id.clone();
                    async move { client.delete(&id).await }
                })
                .await;
                *retries += outcome.retries;
                if let Err(e) = outcome.result {
                    removed = false;
                    report.failures.push(TierFailure {
                        tier: client.tier(),
                        kind: e.kind(),
                        error: format!("{id}: {e}"),
                    });
                }
            }
            if removed {
                report.removed.push(id);
            }
        }

        if !plan.create.is_empty() {
            let store = self.client(Tier::Durable)?;
            for entry in plan.create {
                let id = entry.id.clone();
                let outcome = bounded(wait, self.policy, OperationClass::Mutating, "consolidate", || {
                    let store = store.clone();
                    let entry = entry.clone();
                    async move { store.put(entry).await }
                })
                .await;
                *retries += outcome.retries;
                match outcome.result {
                    Ok(_) => report.created.push(id),
                    Err(e) => report.failures.push(TierFailure {
                        tier: Tier::Durable,
                        kind: e.kind(),
                        error: format!("{id}: {e}"),
                    }),
                }
            }
        }

        tracing::info!(
            owner_id,
            kind = %kind,
            examined = report.examined,
            removed = report.removed.len(),
            created = report.created.len(),
            "Consolidation finished"
        );
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn sync(
        &mut self,
        owner_id: &str,
        source_tier: Tier,
        target_tier: Tier,
        kind: SyncKind,
    ) -> SDKResult<SyncReport> {
        let started = Instant::now();
        let checked = validate_owner(owner_id)
            .map_err(SDKError::from)
            .and_then(|()| {
                if source_tier == target_tier {
                    return Err(SDKError::invalid_input("cannot sync a tier with itself"));
                }
                self.client(source_tier).and(self.client(target_tier))
            });
        if let Err(e) = checked {
            return self.finish(started, 0, Err(e));
        }

        let record = SyncRecord {
            sync_id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            source_tier,
            target_tier,
            kind,
            started_at: Utc::now(),
        };
        let sync_id = record.sync_id.clone();
        self.syncs.insert(sync_id.clone(), record.clone());
        self.metrics.record_sync();
        self.set_status(CoordinationStatus::Syncing);
        tracing::info!(sync_id = %sync_id, owner_id, %source_tier, %target_tier, kind = %kind, "Sync started");

        let mut retries = 0;
        let result = self.run_sync(&record, &mut retries).await;
        self.syncs.remove(&sync_id);
        self.finish(started, retries, result)
    }

    async fn run_sync(&self, record: &SyncRecord, retries: &mut u32) -> SDKResult<SyncReport> {
        let (owner_id, source_tier, target_tier) = (record.owner_id.as_str(), record.source_tier, record.target_tier);
        let (processed, succeeded, failed, failures) = match record.kind {
            SyncKind::Migration | SyncKind::Replication => {
                let source = self.client(source_tier)?;
                let outcome = bounded(
                    self.config.operation_timeout(),
                    self.policy,
                    OperationClass::Idempotent,
                    "sync",
                    || {
                        let source = source.clone();
                        let owner = owner_id.to_string();
                        async move { source.entries_for_owner(&owner).await }
                    },
                )
                .await;
                *retries += outcome.retries;
                let ids: Vec<String> = outcome.result?.into_iter().map(|e| e.id).collect();
                if ids.is_empty() {
                    (0, 0, 0, Vec::new())
                } else {
                    let keep_source = record.kind == SyncKind::Replication;
                    let report = self
                        .migrate_items(owner_id, &ids, source_tier, target_tier, keep_source, retries)
                        .await?;
                    let failures = report
                        .items
                        .into_iter()
                        .filter(|i| i.error.is_some())
                        .collect();
                    (ids.len(), report.succeeded, report.failed, failures)
                }
            }
            SyncKind::Consolidation => {
                let report = self
                    .consolidate_tiers(
                        owner_id,
                        ConsolidationKind::DuplicateRemoval,
                        &[source_tier, target_tier],
                        retries,
                    )
                    .await?;
                let failures: Vec<_> = report
                    .failures
                    .iter()
                    .map(|f| super::types::MigrationItem {
                        id: f.tier.to_string(),
                        status: super::types::ItemStatus::Failed,
                        error: Some(f.error.clone()),
                    })
                    .collect();
                (report.examined, report.removed.len(), failures.len(), failures)
            }
        };

        tracing::info!(sync_id = %record.sync_id, processed, succeeded, failed, "Sync finished");
        Ok(SyncReport {
            sync_id: record.sync_id.clone(),
            kind: record.kind,
            source_tier,
            target_tier,
            processed,
            succeeded,
            failed,
            failures,
            started_at: record.started_at,
            completed_at: Utc::now(),
        })
    }

    /// Syncs currently in flight.
    pub fn active_syncs(&self) -> Vec<SyncRecord> {
        self.syncs.values().cloned().collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Partitions
    // ─────────────────────────────────────────────────────────────────────────

    pub fn create_partition(
        &mut self,
        partition_id: &str,
        owner_id: &str,
        strategy: PartitionStrategy,
        capacity_limits: CapacityLimits,
    ) -> SDKResult<Partition> {
        let started = Instant::now();
        let result = self
            .partitions
            .create(partition_id, owner_id, strategy, capacity_limits);
        self.finish(started, 0, result)
    }

    pub fn partition(&self, partition_id: &str) -> SDKResult<Partition> {
        self.partitions.get(partition_id)
    }

    pub fn partitions(&self) -> Vec<Partition> {
        self.partitions.list()
    }

    /// Write an entry to `tier` on behalf of a partition, subject to its
    /// capacity limits.
    pub async fn partition_write(&mut self, partition_id: &str, tier: Tier, entry: MemoryEntry) -> SDKResult<Partition> {
        let started = Instant::now();
        self.set_status(CoordinationStatus::Coordinating);
        let mut retries = 0;
        let result = self.route_write(partition_id, tier, entry, &mut retries).await;
        self.finish(started, retries, result)
    }

    async fn route_write(
        &mut self,
        partition_id: &str,
        tier: Tier,
        entry: MemoryEntry,
        retries: &mut u32,
    ) -> SDKResult<Partition> {
        let owner_id = self.partitions.owner_of(partition_id)?;
        if entry.owner_id != owner_id {
            return Err(SDKError::invalid_input(format!(
                "partition {partition_id} belongs to {owner_id}, not {}",
                entry.owner_id
            )));
        }
        self.authorize(&owner_id, AccessKind::Write, tier, &entry.id)?;
        let client = self.client(tier)?;

        let size = serde_json::to_vec(&entry)?.len() as u64;
        let id = entry.id.clone();
        self.partitions.check_write(partition_id, tier, &id, size)?;

        let outcome = bounded(
            self.config.operation_timeout(),
            self.policy,
            OperationClass::Mutating,
            "partition_write",
            || {
                let client = client.clone();
                let entry = entry.clone();
                async move { client.put(entry).await }
            },
        )
        .await;
        *retries += outcome.retries;
        outcome.result?;
        self.partitions.commit_write(partition_id, tier, &id, size)
    }

    /// Delete an entry written through a partition. Returns whether the tier
    /// held it.
    pub async fn partition_delete(&mut self, partition_id: &str, tier: Tier, id: &str) -> SDKResult<bool> {
        let started = Instant::now();
        self.set_status(CoordinationStatus::Coordinating);
        let mut retries = 0;
        let result = self.route_delete(partition_id, tier, id, &mut retries).await;
        self.finish(started, retries, result)
    }

    async fn route_delete(&mut self, partition_id: &str, tier: Tier, id: &str, retries: &mut u32) -> SDKResult<bool> {
        let owner_id = self.partitions.owner_of(partition_id)?;
        self.authorize(&owner_id, AccessKind::Delete, tier, id)?;
        let client = self.client(tier)?;
        let outcome = bounded(
            self.config.operation_timeout(),
            self.policy,
            OperationClass::Mutating,
            "partition_delete",
            || {
                let client = client.clone();
                let id = id.to_string();
                async move { client.delete(&id).await }
            },
        )
        .await;
        *retries += outcome.retries;
        let existed = outcome.result?;
        self.partitions.release(partition_id, tier, id)?;
        Ok(existed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Access control
    // ─────────────────────────────────────────────────────────────────────────

    pub fn check_access(
        &mut self,
        owner_id: &str,
        access: AccessKind,
        tier: Tier,
        resource_id: &str,
    ) -> SDKResult<AccessDecision> {
        let started = Instant::now();
        let result = validate_owner(owner_id).map_err(SDKError::from).map(|()| {
            let decision = decide(owner_id, access, tier, resource_id);
            self.audit.record(decision.clone());
            decision
        });
        self.finish(started, 0, result)
    }

    /// Audited check that fails when the access is denied.
    fn authorize(&mut self, owner_id: &str, access: AccessKind, tier: Tier, resource_id: &str) -> SDKResult<()> {
        let decision = decide(owner_id, access, tier, resource_id);
        let granted = decision.granted;
        let reason = decision.reason.clone();
        self.audit.record(decision);
        if granted {
            Ok(())
        } else {
            Err(SDKError::invalid_input(format!("access denied: {reason}")))
        }
    }

    pub fn audit_trail(&self, limit: usize) -> Vec<AccessDecision> {
        self.audit.recent(limit)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Health & metrics
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn health_check(&mut self, kind: HealthKind, include_metrics: bool) -> SDKResult<HealthReport> {
        let started = Instant::now();
        let coordination_status = self.status();
        let (wait, policy) = (self.config.operation_timeout(), self.policy);

        let mut set = JoinSet::new();
        let order: Vec<Tier> = self.tiers.keys().copied().collect();
        for (index, client) in self.tiers.values().cloned().enumerate() {
            set.spawn(async move {
                let probe_started = Instant::now();
                let outcome = bounded(wait, policy, OperationClass::Idempotent, "health_check", || {
                    let client = client.clone();
                    async move {
                        let snapshot = client.snapshot().await?;
                        if kind == HealthKind::Deep {
                            match client.get(HEALTH_PROBE_ID).await {
                                Err(e) if e.is_not_found() => {}
                                Err(e) => return Err(e),
                                Ok(_) => {}
                            }
                        }
                        Ok(snapshot)
                    }
                })
                .await;
                (index, outcome, probe_started.elapsed())
            });
        }

        let mut probes: Vec<Option<TierHealth>> = (0..order.len()).map(|_| None).collect();
        let mut retries = 0;
        while let Some(joined) = set.join_next().await {
            let Ok((index, outcome, elapsed)) = joined else {
                continue;
            };
            retries += outcome.retries;
            let tier = order[index];
            let latency_ms = elapsed.as_millis() as u64;
            probes[index] = Some(match outcome.result {
                Ok(snapshot) => {
                    let filled = snapshot
                        .capacity
                        .filter(|c| *c > 0)
                        .is_some_and(|c| snapshot.items as f64 >= c as f64 * DEGRADED_FILL);
                    TierHealth {
                        tier,
                        status: if filled { HealthStatus::Degraded } else { HealthStatus::Healthy },
                        items: snapshot.items,
                        capacity: snapshot.capacity,
                        latency_ms,
                        error: None,
                    }
                }
                Err(e) => TierHealth {
                    tier,
                    status: HealthStatus::Unavailable,
                    items: 0,
                    capacity: None,
                    latency_ms,
                    error: Some(e.to_string()),
                },
            });
        }
        let tiers: Vec<TierHealth> = order
            .iter()
            .zip(probes)
            .map(|(tier, probe)| {
                probe.unwrap_or_else(|| TierHealth {
                    tier: *tier,
                    status: HealthStatus::Unavailable,
                    items: 0,
                    capacity: None,
                    latency_ms: 0,
                    error: Some("health task aborted".to_string()),
                })
            })
            .collect();

        let status = if tiers.iter().all(|t| t.status == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else if tiers.iter().all(|t| t.status == HealthStatus::Unavailable) {
            HealthStatus::Unavailable
        } else {
            HealthStatus::Degraded
        };

        self.metrics.record(started.elapsed(), true, retries);
        let report = HealthReport {
            kind,
            status,
            coordination_status,
            tiers,
            metrics: include_metrics.then(|| self.metrics()),
            checked_at: Utc::now(),
        };
        tracing::debug!(status = ?report.status, "Health check");
        Ok(report)
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.metrics.snapshot(self.partitions.len(), self.syncs.len())
    }

    /// Release partition members their tier no longer holds, such as
    /// entries the fast tier expired or evicted. Returns how many.
    ///
    /// A tier that fails or times out keeps its members counted.
    pub async fn reconcile_partitions(&mut self) -> usize {
        let wait = self.config.operation_timeout();
        let mut released = 0;
        for (partition_id, owner_id, tier, ids) in self.partitions.tracked() {
            let Ok(client) = self.client(tier) else {
                continue;
            };
            let live: HashSet<String> = match tokio::time::timeout(wait, client.entries_for_owner(&owner_id)).await {
                Ok(Ok(entries)) => entries.into_iter().map(|e| e.id).collect(),
                Ok(Err(e)) => {
                    tracing::warn!(partition_id = %partition_id, %tier, error = %e, "Partition reconcile skipped");
                    continue;
                }
                Err(_) => {
                    tracing::warn!(partition_id = %partition_id, %tier, "Partition reconcile timed out");
                    continue;
                }
            };
            for id in ids.iter().filter(|id| !live.contains(*id)) {
                if self.partitions.release(&partition_id, tier, id).unwrap_or(false) {
                    released += 1;
                }
            }
        }
        if released > 0 {
            tracing::info!(released, "Released partition entries missing from their tier");
        }
        released
    }

    /// Reconcile partition usage, then recompute the performance record.
    pub async fn refresh_metrics(&mut self) -> PerformanceMetrics {
        self.reconcile_partitions().await;
        let metrics = self.metrics.refresh(self.partitions.len(), self.syncs.len());
        tracing::debug!(
            completed = metrics.operations_completed,
            failed = metrics.operations_failed,
            average_latency_ms = metrics.average_latency_ms,
            "Metrics refreshed"
        );
        metrics
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────────────────────────

enum CoordinatorCommand {
    Search {
        owner_id: String,
        query: String,
        tiers: Vec<Tier>,
        limit: usize,
        reply: Reply<SDKResult<CrossTierSearchResult>>,
    },
    Migrate {
        owner_id: String,
        ids: Vec<String>,
        source_tier: Tier,
        target_tier: Tier,
        reply: Reply<SDKResult<MigrationReport>>,
    },
    Consolidate {
        owner_id: String,
        kind: ConsolidationKind,
        reply: Reply<SDKResult<ConsolidationReport>>,
    },
    Sync {
        owner_id: String,
        source_tier: Tier,
        target_tier: Tier,
        kind: SyncKind,
        reply: Reply<SDKResult<SyncReport>>,
    },
    CreatePartition {
        partition_id: String,
        owner_id: String,
        strategy: PartitionStrategy,
        capacity_limits: CapacityLimits,
        reply: Reply<SDKResult<Partition>>,
    },
    Partition {
        partition_id: String,
        reply: Reply<SDKResult<Partition>>,
    },
    Partitions {
        reply: Reply<Vec<Partition>>,
    },
    PartitionWrite {
        partition_id: String,
        tier: Tier,
        entry: Box<MemoryEntry>,
        reply: Reply<SDKResult<Partition>>,
    },
    PartitionDelete {
        partition_id: String,
        tier: Tier,
        id: String,
        reply: Reply<SDKResult<bool>>,
    },
    CheckAccess {
        owner_id: String,
        access: AccessKind,
        tier: Tier,
        resource_id: String,
        reply: Reply<SDKResult<AccessDecision>>,
    },
    AuditTrail {
        limit: usize,
        reply: Reply<Vec<AccessDecision>>,
    },
    Health {
        kind: HealthKind,
        include_metrics: bool,
        reply: Reply<SDKResult<HealthReport>>,
    },
    Metrics {
        reply: Reply<PerformanceMetrics>,
    },
    RefreshMetrics {
        reply: Reply<PerformanceMetrics>,
    },
    ActiveSyncs {
        reply: Reply<Vec<SyncRecord>>,
    },
}

/// Handle to the coordinator actor.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorCommand>,
    status: watch::Receiver<CoordinationStatus>,
}

impl CoordinatorHandle {
    pub fn spawn(coordinator: TierCoordinator) -> Self {
        let status = coordinator.subscribe();
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        tokio::spawn(run(coordinator, rx));
        Self { tx, status }
    }

    /// Current coordination status, readable while an operation is running.
    pub fn status(&self) -> CoordinationStatus {
        *self.status.borrow()
    }

    pub async fn cross_tier_search(
        &self,
        owner_id: impl Into<String>,
        query: impl Into<String>,
        tiers: Vec<Tier>,
        limit: usize,
    ) -> SDKResult<CrossTierSearchResult> {
        let (owner_id, query) = (owner_id.into(), query.into());
        call(NAME, &self.tx, |reply| CoordinatorCommand::Search {
            owner_id,
            query,
            tiers,
            limit,
            reply,
        })
        .await?
    }

    pub async fn migrate(
        &self,
        owner_id: impl Into<String>,
        ids: Vec<String>,
        source_tier: Tier,
        target_tier: Tier,
    ) -> SDKResult<MigrationReport> {
        let owner_id = owner_id.into();
        call(NAME, &self.tx, |reply| CoordinatorCommand::Migrate {
            owner_id,
            ids,
            source_tier,
            target_tier,
            reply,
        })
        .await?
    }

    pub async fn consolidate(
        &self,
        owner_id: impl Into<String>,
        kind: ConsolidationKind,
    ) -> SDKResult<ConsolidationReport> {
        let owner_id = owner_id.into();
        call(NAME, &self.tx, |reply| CoordinatorCommand::Consolidate { owner_id, kind, reply }).await?
    }

    pub async fn sync(
        &self,
        owner_id: impl Into<String>,
        source_tier: Tier,
        target_tier: Tier,
        kind: SyncKind,
    ) -> SDKResult<SyncReport> {
        let owner_id = owner_id.into();
        call(NAME, &self.tx, |reply| CoordinatorCommand::Sync {
            owner_id,
            source_tier,
            target_tier,
            kind,
            reply,
        })
        .await?
    }

    pub async fn create_partition(
        &self,
        partition_id: impl Into<String>,
        owner_id: impl Into<String>,
        strategy: PartitionStrategy,
        capacity_limits: CapacityLimits,
    ) -> SDKResult<Partition> {
        let (partition_id, owner_id) = (partition_id.into(), owner_id.into());
        call(NAME, &self.tx, |reply| CoordinatorCommand::CreatePartition {
            partition_id,
            owner_id,
            strategy,
            capacity_limits,
            reply,
        })
        .await?
    }

    pub async fn partition(&self, partition_id: impl Into<String>) -> SDKResult<Partition> {
        let partition_id = partition_id.into();
        call(NAME, &self.tx, |reply| CoordinatorCommand::Partition { partition_id, reply }).await?
    }

    pub async fn partitions(&self) -> SDKResult<Vec<Partition>> {
        Ok(call(NAME, &self.tx, |reply| CoordinatorCommand::Partitions { reply }).await?)
    }

    pub async fn partition_write(
        &self,
        partition_id: impl Into<String>,
        tier: Tier,
        entry: MemoryEntry,
    ) -> SDKResult<Partition> {
        let partition_id = partition_id.into();
        call(NAME, &self.tx, |reply| CoordinatorCommand::PartitionWrite {
            partition_id,
            tier,
            entry: Box::new(entry),
            reply,
        })
        .await?
    }

    pub async fn partition_delete(
        &self,
        partition_id: impl Into<String>,
        tier: Tier,
        id: impl Into<String>,
    ) -> SDKResult<bool> {
        let (partition_id, id) = (partition_id.into(), id.into());
        call(NAME, &self.tx, |reply| CoordinatorCommand::PartitionDelete {
            partition_id,
            tier,
            id,
            reply,
        })
        .await?
    }

    pub async fn check_access(
        &self,
        owner_id: impl Into<String>,
        access: AccessKind,
        tier: Tier,
        resource_id: impl Into<String>,
    ) -> SDKResult<AccessDecision> {
        let (owner_id, resource_id) = (owner_id.into(), resource_id.into());
        call(NAME, &self.tx, |reply| CoordinatorCommand::CheckAccess {
            owner_id,
            access,
            tier,
            resource_id,
            reply,
        })
        .await?
    }

    pub async fn audit_trail(&self, limit: usize) -> SDKResult<Vec<AccessDecision>> {
        Ok(call(NAME, &self.tx, |reply| CoordinatorCommand::AuditTrail { limit, reply }).await?)
    }

    pub async fn health_check(&self, kind: HealthKind, include_metrics: bool) -> SDKResult<HealthReport> {
        call(NAME, &self.tx, |reply| CoordinatorCommand::Health {
            kind,
            include_metrics,
            reply,
        })
        .await?
    }

    pub async fn metrics(&self) -> SDKResult<PerformanceMetrics> {
        Ok(call(NAME, &self.tx, |reply| CoordinatorCommand::Metrics { reply }).await?)
    }

    pub async fn refresh_metrics(&self) -> SDKResult<PerformanceMetrics> {
        Ok(call(NAME, &self.tx, |reply| CoordinatorCommand::RefreshMetrics { reply }).await?)
    }

    pub async fn active_syncs(&self) -> SDKResult<Vec<SyncRecord>> {
        Ok(call(NAME, &self.tx, |reply| CoordinatorCommand::ActiveSyncs { reply }).await?)
    }
}

async fn run(mut coordinator: TierCoordinator, mut rx: mpsc::Receiver<CoordinatorCommand>) {
    tracing::debug!(tiers = coordinator.tiers.len(), "Coordinator actor started");
    while let Some(command) = rx.recv().await {
        match command {
            CoordinatorCommand::Search {
                owner_id,
                query,
                tiers,
                limit,
                reply,
            } => {
                let _ = reply.send(coordinator.cross_tier_search(&owner_id, &query, &tiers, limit).await);
            }
            CoordinatorCommand::Migrate {
                owner_id,
                ids,
                source_tier,
                target_tier,
                reply,
            } => {
                let _ = reply.send(coordinator.migrate(&owner_id, &ids, source_tier, target_tier).await);
            }
            CoordinatorCommand::Consolidate { owner_id, kind, reply } => {
                let _ = reply.send(coordinator.consolidate(&owner_id, kind).await);
            }
            CoordinatorCommand::Sync {
                owner_id,
                source_tier,
                target_tier,
                kind,
                reply,
            } => {
                let _ = reply.send(coordinator.sync(&owner_id, source_tier, target_tier, kind).await);
            }
            CoordinatorCommand::CreatePartition {
                partition_id,
                owner_id,
                strategy,
                capacity_limits,
                reply,
            } => {
                let _ = reply.send(coordinator.create_partition(&partition_id, &owner_id, strategy, capacity_limits));
            }
            CoordinatorCommand::Partition { partition_id, reply } => {
                let _ = reply.send(coordinator.partition(&partition_id));
            }
            CoordinatorCommand::Partitions { reply } => {
                let _ = reply.send(coordinator.partitions());
            }
            CoordinatorCommand::PartitionWrite {
                partition_id,
                tier,
                entry,
                reply,
            } => {
                let _ = reply.send(coordinator.partition_write(&partition_id, tier, *entry).await);
            }
            CoordinatorCommand::PartitionDelete {
                partition_id,
                tier,
                id,
                reply,
            } => {
                let _ = reply.send(coordinator.partition_delete(&partition_id, tier, &id).await);
            }
            CoordinatorCommand::CheckAccess {
                owner_id,
                access,
                tier,
                resource_id,
                reply,
            } => {
                let _ = reply.send(coordinator.check_access(&owner_id, access, tier, &resource_id));
            }
            CoordinatorCommand::AuditTrail { limit, reply } => {
                let _ = reply.send(coordinator.audit_trail(limit));
            }
            CoordinatorCommand::Health {
                kind,
                include_metrics,
                reply,
            } => {
                let _ = reply.send(coordinator.health_check(kind, include_metrics).await);
            }
            CoordinatorCommand::Metrics { reply } => {
                let _ = reply.send(coordinator.metrics());
            }
            CoordinatorCommand::RefreshMetrics { reply } => {
                let _ = reply.send(coordinator.refresh_metrics().await);
            }
            CoordinatorCommand::ActiveSyncs { reply } => {
                let _ = reply.send(coordinator.active_syncs());
            }
        }
    }
    tracing::debug!("Coordinator actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::tiers::{DurableTierClient, FastTierClient};
    use crate::coordinator::types::{ItemStatus, PartitionStatus, TierSnapshot};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use strata_core::{
        DurableTierConfig, DurableTierHandle, DurableTierStore, ErrorKind, FastTierConfig, FastTierHandle,
        FastTierStore, InMemoryAdapter, MemoryType,
    };

    /// A tier whose every call fails with a resource error.
    struct BrokenTier {
        tier: Tier,
        calls: Arc<AtomicU32>,
    }

    impl BrokenTier {
        fn new(tier: Tier) -> (Arc<Self>, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (Arc::new(Self { tier, calls: calls.clone() }), calls)
        }

        fn fail<T>(&self) -> SDKResult<T> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SDKError::resource("tier offline", [("tier", self.tier.to_string())]))
        }
    }

    #[async_trait]
    impl TierClient for BrokenTier {
        fn tier(&self) -> Tier {
            self.tier
        }

        async fn put(&self, _entry: MemoryEntry) -> SDKResult<String> {
            self.fail()
        }

        async fn get(&self, _id: &str) -> SDKResult<MemoryEntry> {
            self.fail()
        }

        async fn delete(&self, _id: &str) -> SDKResult<bool> {
            self.fail()
        }

        async fn search(&self, _owner_id: &str, _query: &str, _limit: usize) -> SDKResult<Vec<MemoryEntry>> {
            self.fail()
        }

        async fn entries_for_owner(&self, _owner_id: &str) -> SDKResult<Vec<MemoryEntry>> {
            self.fail()
        }

        async fn snapshot(&self) -> SDKResult<TierSnapshot> {
            self.fail()
        }
    }

    /// A tier that never answers within any sane timeout.
    struct HangingTier(Tier);

    impl HangingTier {
        async fn hang<T>(&self) -> SDKResult<T> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(SDKError::resource("tier woke up", [("tier", self.0.to_string())]))
        }
    }

    #[async_trait]
    impl TierClient for HangingTier {
        fn tier(&self) -> Tier {
            self.0
        }

        async fn put(&self, _entry: MemoryEntry) -> SDKResult<String> {
            self.hang().await
        }

        async fn get(&self, _id: &str) -> SDKResult<MemoryEntry> {
            self.hang().await
        }

        async fn delete(&self, _id: &str) -> SDKResult<bool> {
            self.hang().await
        }

        async fn search(&self, _owner_id: &str, _query: &str, _limit: usize) -> SDKResult<Vec<MemoryEntry>> {
            self.hang().await
        }

        async fn entries_for_owner(&self, _owner_id: &str) -> SDKResult<Vec<MemoryEntry>> {
            self.hang().await
        }

        async fn snapshot(&self) -> SDKResult<TierSnapshot> {
            self.hang().await
        }
    }

    fn fast(tier: Tier) -> Arc<dyn TierClient> {
        let config = if tier == Tier::Warm { FastTierConfig::warm() } else { FastTierConfig::default() };
        Arc::new(FastTierClient::new(
            tier,
            FastTierHandle::spawn(FastTierStore::new(tier.as_str(), config)),
        ))
    }

    fn durable_handle() -> DurableTierHandle {
        let store = DurableTierStore::open(DurableTierConfig::default(), Arc::new(InMemoryAdapter::new())).unwrap();
        DurableTierHandle::spawn(store)
    }

    fn durable() -> Arc<dyn TierClient> {
        Arc::new(DurableTierClient::new(durable_handle()))
    }

    fn quick_config() -> CoordinatorConfig {
        CoordinatorConfig {
            retry_count: 1,
            retry_base_delay_ms: 1,
            ..Default::default()
        }
    }

    fn coordinator_with(clients: Vec<Arc<dyn TierClient>>) -> TierCoordinator {
        TierCoordinator::new(quick_config(), clients)
    }

    fn entry(id: &str, text: &str) -> MemoryEntry {
        MemoryEntry::new(MemoryType::Interaction, "alice", text).with_id(id)
    }

    #[tokio::test]
    async fn test_search_with_one_failing_tier_is_partial() {
        let (broken, _) = BrokenTier::new(Tier::Warm);
        let fast = fast(Tier::Fast);
        fast.put(entry("f1", "deploy notes")).await.unwrap();
        // Durable search only sees flushed entries.
        let store = durable_handle();
        store.store(entry("d1", "deploy runbook")).await.unwrap();
        store.flush().await.unwrap();
        let durable: Arc<dyn TierClient> = Arc::new(DurableTierClient::new(store));
        let mut coordinator = coordinator_with(vec![fast, broken, durable]);

        let result = coordinator
            .cross_tier_search("alice", "deploy", &[], 10)
            .await
            .unwrap();

        assert!(result.is_partial());
        assert_eq!(result.total(), 2);
        let tiers: Vec<Tier> = result.results.iter().map(|r| r.tier).collect();
        assert_eq!(tiers, vec![Tier::Fast, Tier::Durable]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].tier, Tier::Warm);
        assert_eq!(result.failures[0].kind, ErrorKind::Resource);
        assert_eq!(coordinator.metrics().operations_completed, 1);
        assert_eq!(coordinator.status(), CoordinationStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_tier_is_reported_as_timeout() {
        let fast = fast(Tier::Fast);
        fast.put(entry("f1", "deploy notes")).await.unwrap();
        let config = quick_config();
        let wait = config.operation_timeout();
        let mut coordinator = TierCoordinator::new(config, vec![fast, Arc::new(HangingTier(Tier::Durable))]);

        let started = tokio::time::Instant::now();
        let result = coordinator
            .cross_tier_search("alice", "deploy", &[], 10)
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= wait, "returned after {elapsed:?}");
        assert!(elapsed < wait + Duration::from_secs(1), "returned after {elapsed:?}");
        assert_eq!(result.total(), 1);
        assert_eq!(result.results[0].tier, Tier::Fast);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].tier, Tier::Durable);
        assert_eq!(result.failures[0].kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_search_fails_when_every_tier_fails() {
        let (a, calls) = BrokenTier::new(Tier::Fast);
        let (b, _) = BrokenTier::new(Tier::Durable);
        let mut coordinator = coordinator_with(vec![a, b]);

        let err = coordinator.cross_tier_search("alice", "x", &[], 10).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
        // One attempt plus one retry.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.metrics().operations_failed, 1);
        assert_eq!(coordinator.metrics().retries, 2);
    }

    #[tokio::test]
    async fn test_search_rejects_unregistered_tier() {
        let mut coordinator = coordinator_with(vec![fast(Tier::Fast)]);
        let err = coordinator
            .cross_tier_search("alice", "x", &[Tier::Durable], 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_migrate_is_best_effort_per_item() {
        let fast = fast(Tier::Fast);
        let durable = durable();
        fast.put(entry("m1", "first")).await.unwrap();
        fast.put(MemoryEntry::new(MemoryType::Interaction, "bob", "not yours").with_id("m2")).await.unwrap();
        let mut coordinator = coordinator_with(vec![fast.clone(), durable.clone()]);

        let ids = vec!["m1".to_string(), "m2".to_string(), "missing".to_string()];
        let report = coordinator.migrate("alice", &ids, Tier::Fast, Tier::Durable).await.unwrap();

        assert_eq!((report.succeeded, report.failed), (1, 2));
        assert_eq!(report.items[0].status, ItemStatus::Succeeded);
        assert!(durable.get("m1").await.is_ok());
        assert!(fast.get("m1").await.unwrap_err().is_not_found());
        assert!(fast.get("m2").await.is_ok());
    }

    #[tokio::test]
    async fn test_migrate_validation() {
        let mut coordinator = coordinator_with(vec![fast(Tier::Fast), durable()]);
        let ids = vec!["a".to_string()];
        let same = coordinator.migrate("alice", &ids, Tier::Fast, Tier::Fast).await.unwrap_err();
        assert_eq!(same.kind(), ErrorKind::Validation);
        let empty = coordinator.migrate("alice", &[], Tier::Fast, Tier::Durable).await.unwrap_err();
        assert_eq!(empty.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_sync_rejects_same_tier() {
        let mut coordinator = coordinator_with(vec![fast(Tier::Fast), durable()]);
        let err = coordinator
            .sync("alice", Tier::Durable, Tier::Durable, SyncKind::Replication)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(coordinator.active_syncs().is_empty());
        assert_eq!(coordinator.metrics().sync_count, 0);
    }

    #[tokio::test]
    async fn test_replication_keeps_source_copies() {
        let fast = fast(Tier::Fast);
        let durable = durable();
        fast.put(entry("r1", "one")).await.unwrap();
        fast.put(entry("r2", "two")).await.unwrap();
        let mut coordinator = coordinator_with(vec![fast.clone(), durable.clone()]);

        let report = coordinator
            .sync("alice", Tier::Fast, Tier::Durable, SyncKind::Replication)
            .await
            .unwrap();

        assert_eq!((report.processed, report.succeeded, report.failed), (2, 2, 0));
        assert!(fast.get("r1").await.is_ok());
        assert!(durable.get("r2").await.is_ok());
        assert!(coordinator.active_syncs().is_empty());
        assert_eq!(coordinator.metrics().sync_count, 1);
    }

    #[tokio::test]
    async fn test_consolidation_sync_removes_cross_tier_duplicates() {
        let fast = fast(Tier::Fast);
        let durable = durable();
        durable.put(entry("old", "the deploy needs a migration step")).await.unwrap();
        fast.put(entry("new", "the deploy needs a migration step")).await.unwrap();
        let mut coordinator = coordinator_with(vec![fast.clone(), durable.clone()]);

        let report = coordinator
            .sync("alice", Tier::Fast, Tier::Durable, SyncKind::Consolidation)
            .await
            .unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.succeeded, 1);
        let remaining = fast.get("new").await.is_ok() as u8 + durable.get("old").await.is_ok() as u8;
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn test_pattern_extraction_creates_durable_entries() {
        let fast = fast(Tier::Fast);
        let durable = durable();
        for i in 0..3 {
            fast.put(entry(&format!("p{i}"), &format!("retry backoff variant {i}"))).await.unwrap();
        }
        let mut coordinator = coordinator_with(vec![fast, durable.clone()]);

        let report = coordinator
            .consolidate("alice", ConsolidationKind::PatternExtraction)
            .await
            .unwrap();

        assert_eq!(report.examined, 3);
        assert!(!report.created.is_empty());
        assert!(report.failures.is_empty());
        for id in &report.created {
            assert_eq!(durable.get(id).await.unwrap().entry_type, MemoryType::CodePattern);
        }
    }

    #[tokio::test]
    async fn test_partition_rejects_write_beyond_capacity() {
        let fast = fast(Tier::Fast);
        let mut coordinator = coordinator_with(vec![fast.clone(), durable()]);
        coordinator
            .create_partition("p1", "alice", PartitionStrategy::Hash, CapacityLimits::items(2))
            .unwrap();

        coordinator.partition_write("p1", Tier::Fast, entry("a", "one")).await.unwrap();
        let partition = coordinator.partition_write("p1", Tier::Fast, entry("b", "two")).await.unwrap();
        assert_eq!(partition.current_usage[&Tier::Fast].items, 2);
        assert_eq!(partition.status, PartitionStatus::Full);

        let err = coordinator
            .partition_write("p1", Tier::Fast, entry("c", "three"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert!(fast.get("c").await.unwrap_err().is_not_found());

        assert!(coordinator.partition_delete("p1", Tier::Fast, "a").await.unwrap());
        coordinator.partition_write("p1", Tier::Fast, entry("c", "three")).await.unwrap();
        assert_eq!(coordinator.metrics().partition_count, 1);
    }

    #[tokio::test]
    async fn test_metrics_refresh_releases_entries_the_tier_dropped() {
        let fast = fast(Tier::Fast);
        let mut coordinator = coordinator_with(vec![fast.clone(), durable()]);
        coordinator
            .create_partition("p1", "alice", PartitionStrategy::Hash, CapacityLimits::items(2))
            .unwrap();
        coordinator.partition_write("p1", Tier::Fast, entry("a", "one")).await.unwrap();
        coordinator.partition_write("p1", Tier::Fast, entry("b", "two")).await.unwrap();
        assert_eq!(coordinator.partition("p1").unwrap().status, PartitionStatus::Full);

        // Dropped behind the partition's back, as expiry or eviction would.
        assert!(fast.delete("a").await.unwrap());
        coordinator.refresh_metrics().await;

        let partition = coordinator.partition("p1").unwrap();
        assert_eq!(partition.current_usage[&Tier::Fast].items, 1);
        assert_eq!(partition.status, PartitionStatus::Active);
        coordinator.partition_write("p1", Tier::Fast, entry("c", "three")).await.unwrap();
    }

    #[tokio::test]
    async fn test_partition_write_checks_owner_and_duplicates() {
        let mut coordinator = coordinator_with(vec![fast(Tier::Fast)]);
        coordinator
            .create_partition("p1", "alice", PartitionStrategy::List, CapacityLimits::items(5))
            .unwrap();
        assert!(
            coordinator
                .create_partition("p1", "alice", PartitionStrategy::List, CapacityLimits::items(5))
                .is_err()
        );
        let foreign = MemoryEntry::new(MemoryType::Interaction, "bob", "x").with_id("x");
        let err = coordinator.partition_write("p1", Tier::Fast, foreign).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_delete_is_denied_on_durable() {
        let mut coordinator = coordinator_with(vec![fast(Tier::Fast), durable()]);
        let decision = coordinator
            .check_access("alice", AccessKind::Delete, Tier::Durable, "m1")
            .unwrap();
        assert!(!decision.granted);
        assert!(
            coordinator
                .check_access("alice", AccessKind::Delete, Tier::Fast, "m1")
                .unwrap()
                .granted
        );

        coordinator
            .create_partition("p1", "alice", PartitionStrategy::Hash, CapacityLimits::items(5))
            .unwrap();
        let err = coordinator.partition_delete("p1", Tier::Durable, "m1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let trail = coordinator.audit_trail(10);
        assert_eq!(trail.len(), 3);
        assert!(!trail[0].granted);
        assert_eq!(trail[0].tier, Tier::Durable);
    }

    #[tokio::test]
    async fn test_health_reports_each_tier() {
        let (broken, _) = BrokenTier::new(Tier::Warm);
        let mut coordinator = coordinator_with(vec![fast(Tier::Fast), broken, durable()]);

        let report = coordinator.health_check(HealthKind::Deep, true).await.unwrap();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.tiers.len(), 3);
        assert_eq!(report.tiers[0].status, HealthStatus::Healthy);
        assert_eq!(report.tiers[1].status, HealthStatus::Unavailable);
        assert!(report.tiers[1].error.is_some());
        assert!(report.metrics.is_some());

        let quick = coordinator.health_check(HealthKind::Quick, false).await.unwrap();
        assert!(quick.metrics.is_none());
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let fast = fast(Tier::Fast);
        fast.put(entry("h1", "handle search")).await.unwrap();
        let handle = CoordinatorHandle::spawn(coordinator_with(vec![fast, durable()]));

        let result = handle
            .cross_tier_search("alice", "handle", vec![Tier::Fast], 5)
            .await
            .unwrap();
        assert_eq!(result.total(), 1);
        assert_eq!(handle.status(), CoordinationStatus::Idle);

        let metrics = handle.refresh_metrics().await.unwrap();
        assert_eq!(metrics.operations_completed, 1);
        assert!(metrics.refreshed_at.is_some());
        assert!(handle.active_syncs().await.unwrap().is_empty());
    }
}
