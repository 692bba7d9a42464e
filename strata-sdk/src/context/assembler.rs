//! Context Assembler actor.
//!
//! Per build: `idle → building → (cache hit: done) | gathering → scoring →
//! optimizing → done`. Sources are queried in parallel, each under the
//! configured bounded wait; a late or failing source contributes nothing and
//! is listed in the bundle metadata.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use strata_core::memory::{MAILBOX_CAPACITY, Reply, call};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;

use super::cache::{BundleCache, cache_key};
use super::dedup::deduplicate;
use super::optimize::{OptimizeOptions, optimize, total_tokens};
use super::scoring::{apply_filters, rank};
use super::source::SourceProvider;
use super::types::{
    BuildPhase, BuildRequest, BundleMetadata, ContextBundle, ContextEntry, ContextSource, SourceFailure,
    SourceStatus, SourceUpdate, StreamEvent,
};
use crate::config::{AssemblerConfig, ScoreWeights};
use crate::utils::validate_id;
use crate::{SDKError, SDKResult};

/// Buffered stream events before the producer waits for the consumer.
const STREAM_BUFFER: usize = 16;

/// Running counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblerStats {
    pub builds: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub source_failures: u64,
    pub cached_bundles: usize,
    pub registered_sources: usize,
    pub phase: BuildPhase,
}

type Target = (ContextSource, Arc<dyn SourceProvider>);

struct Registered {
    source: ContextSource,
    provider: Arc<dyn SourceProvider>,
}

/// Candidates gathered from one build's fan-out.
struct Gathered {
    entries: Vec<ContextEntry>,
    failures: Vec<SourceFailure>,
    used: Vec<String>,
}

pub struct ContextAssembler {
    config: AssemblerConfig,
    weights: ScoreWeights,
    sources: Vec<Registered>,
    cache: BundleCache,
    phase: BuildPhase,
    stats: AssemblerStats,
}

impl ContextAssembler {
    pub fn new(config: AssemblerConfig) -> SDKResult<Self> {
        let weights = config.weights.normalized()?;
        let cache = BundleCache::new(config.max_cache_size, config.cache_ttl());
        Ok(Self {
            config,
            weights,
            sources: Vec::new(),
            cache,
            phase: BuildPhase::Idle,
            stats: AssemblerStats::default(),
        })
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    fn position(&self, id: &str) -> SDKResult<usize> {
        self.sources
            .iter()
            .position(|r| r.source.id == id)
            .ok_or_else(|| SDKError::not_found("source", id))
    }

    pub fn register_source(&mut self, source: ContextSource, provider: Arc<dyn SourceProvider>) -> SDKResult<String> {
        validate_id(&source.id)?;
        check_weight(source.weight)?;
        if self.sources.iter().any(|r| r.source.id == source.id) {
            return Err(SDKError::invalid_input(format!("source already registered: {}", source.id)));
        }
        tracing::info!(source_id = %source.id, source_type = %source.source_type, weight = source.weight, "Registered context source");
        let id = source.id.clone();
        let active = source.status == SourceStatus::Active;
        self.sources.push(Registered { source, provider });
        if active {
            self.cache.invalidate_open();
        }
        Ok(id)
    }

    pub fn update_source(&mut self, id: &str, update: SourceUpdate) -> SDKResult<ContextSource> {
        let index = self.position(id)?;
        if let Some(weight) = update.weight {
            check_weight(weight)?;
        }
        let source = &mut self.sources[index].source;
        let was_active = source.status == SourceStatus::Active;
        if let Some(name) = update.name {
            source.name = name;
        }
        if let Some(weight) = update.weight {
            source.weight = weight;
        }
        if let Some(status) = update.status {
            source.status = status;
        }
        for (key, value) in update.config {
            if value.is_null() {
                source.config.remove(&key);
            } else {
                source.config.insert(key, value);
            }
        }
        let updated = source.clone();
        let mut dropped = self.cache.invalidate_source(id);
        if !was_active && updated.status == SourceStatus::Active {
            dropped += self.cache.invalidate_open();
        }
        tracing::debug!(source_id = id, invalidated = dropped, "Updated context source");
        Ok(updated)
    }

    pub fn deregister_source(&mut self, id: &str) -> SDKResult<ContextSource> {
        let index = self.position(id)?;
        let removed = self.sources.remove(index).source;
        let dropped = self.cache.invalidate_source(id);
        tracing::info!(source_id = id, invalidated = dropped, "Deregistered context source");
        Ok(removed)
    }

    pub fn sources(&self) -> Vec<ContextSource> {
        self.sources.iter().map(|r| r.source.clone()).collect()
    }

    /// Replace the score weights; they are normalized to sum to 1.
    pub fn set_weights(&mut self, weights: ScoreWeights) -> SDKResult<ScoreWeights> {
        self.weights = weights.normalized()?;
        self.cache.clear();
        Ok(self.weights)
    }

    pub fn cleanup_cache(&mut self) -> usize {
        let removed = self.cache.cleanup();
        if removed > 0 {
            tracing::debug!(removed, "Cleaned up expired bundles");
        }
        removed
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> AssemblerStats {
        AssemblerStats {
            cached_bundles: self.cache.len(),
            registered_sources: self.sources.len(),
            phase: self.phase,
            ..self.stats.clone()
        }
    }

    fn transition(&mut self, request_id: &str, phase: BuildPhase) {
        tracing::trace!(request_id, from = ?self.phase, to = ?phase, "Build phase");
        self.phase = phase;
    }

    /// Sources to query, plus failures for required sources that are disabled.
    fn targets(&self, request: &BuildRequest) -> SDKResult<(Vec<Target>, Vec<SourceFailure>)> {
        let mut failures = Vec::new();
        if request.required_sources.is_empty() {
            let targets = self
                .sources
                .iter()
                .filter(|r| r.source.is_active())
                .map(|r| (r.source.clone(), r.provider.clone()))
                .collect();
            return Ok((targets, failures));
        }

        let mut targets = Vec::new();
        let mut seen = BTreeSet::new();
        for id in &request.required_sources {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let registered = &self.sources[self.position(id)?];
            if registered.source.is_active() {
                targets.push((registered.source.clone(), registered.provider.clone()));
            } else {
                failures.push(SourceFailure {
                    source_id: id.clone(),
                    error: "source disabled".to_string(),
                });
            }
        }
        Ok((targets, failures))
    }

    async fn gather(&self, targets: Vec<Target>, request: &BuildRequest) -> Gathered {
        let wait = self.config.source_timeout();
        let request = Arc::new(request.clone());
        let ids: Vec<String> = targets.iter().map(|(s, _)| s.id.clone()).collect();

        let mut set = JoinSet::new();
        for (index, (source, provider)) in targets.into_iter().enumerate() {
            let request = request.clone();
            set.spawn(async move {
                let outcome = tokio::time::timeout(wait, provider.fetch(&source, &request)).await;
                (index, outcome)
            });
        }

        let mut results: Vec<Option<Result<Vec<ContextEntry>, String>>> = vec![None; ids.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, Ok(Ok(entries)))) => results[index] = Some(Ok(entries)),
                Ok((index, Ok(Err(e)))) => results[index] = Some(Err(e.to_string())),
                Ok((index, Err(_))) => {
                    results[index] = Some(Err(format!("timed out after {}ms", wait.as_millis())))
                }
                Err(e) => tracing::warn!(error = %e, "Source task aborted"),
            }
        }

        let mut gathered = Gathered {
            entries: Vec::new(),
            failures: Vec::new(),
            used: Vec::new(),
        };
        // Collected in registration order so equal scores keep source order.
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Some(Ok(entries)) => {
                    gathered.entries.extend(entries.into_iter().map(|mut e| {
                        e.source_id = id.clone();
                        e
                    }));
                    gathered.used.push(id);
                }
                Some(Err(error)) => {
                    tracing::warn!(source_id = %id, error = %error, "Context source failed");
                    gathered.failures.push(SourceFailure { source_id: id, error });
                }
                None => gathered.failures.push(SourceFailure {
                    source_id: id,
                    error: "source task aborted".to_string(),
                }),
            }
        }
        gathered
    }

    pub async fn build(&mut self, request: BuildRequest) -> SDKResult<ContextBundle> {
        if request.purpose.trim().is_empty() {
            return Err(SDKError::invalid_input("purpose is required"));
        }
        let request_id = uuid::Uuid::new_v4().to_string();
        self.stats.builds += 1;
        self.transition(&request_id, BuildPhase::Building);

        let max_tokens = request.max_tokens.unwrap_or(self.config.default_max_tokens);
        let key = cache_key(&request, max_tokens)?;
        if let Some(mut cached) = self.cache.get(&key) {
            self.stats.cache_hits += 1;
            cached.request_id = request_id.clone();
            cached.metadata.cache_hit = true;
            self.transition(&request_id, BuildPhase::Done);
            tracing::debug!(request_id = %request_id, purpose = %request.purpose, "Context cache hit");
            return Ok(cached);
        }
        self.stats.cache_misses += 1;

        let (targets, mut failures) = match self.targets(&request) {
            Ok(t) => t,
            Err(e) => {
                self.transition(&request_id, BuildPhase::Idle);
                return Err(e);
            }
        };
        let queried: BTreeSet<String> = targets.iter().map(|(s, _)| s.id.clone()).collect();
        let source_weights: HashMap<String, f64> =
            targets.iter().map(|(s, _)| (s.id.clone(), s.weight)).collect();

        self.transition(&request_id, BuildPhase::Gathering);
        let gathered = self.gather(targets, &request).await;
        failures.extend(gathered.failures);
        self.stats.source_failures += failures.len() as u64;

        self.transition(&request_id, BuildPhase::Scoring);
        let candidates = apply_filters(gathered.entries, &request.filters);
        let ranked = rank(candidates, &self.weights, &source_weights, &request.preferences, Utc::now());
        let (unique, duplicates) = deduplicate(ranked, self.config.dedup_threshold);

        self.transition(&request_id, BuildPhase::Optimizing);
        let outcome = optimize(
            unique,
            OptimizeOptions {
                max_tokens,
                compression_threshold: self.config.compression_threshold,
                summary_ratio: self.config.summary_ratio,
            },
        );

        let bundle = ContextBundle {
            request_id: request_id.clone(),
            purpose: request.purpose.clone(),
            metadata: BundleMetadata {
                total_tokens: total_tokens(&outcome.entries),
                sources_used: gathered.used,
                source_failures: failures,
                compression_applied: outcome.compression_applied(),
                dropped_entries: duplicates + outcome.dropped,
                oldest_entry: outcome.entries.iter().map(|e| e.timestamp).min(),
                newest_entry: outcome.entries.iter().map(|e| e.timestamp).max(),
                cache_hit: false,
            },
            entries: outcome.entries,
            timestamp: Utc::now(),
        };

        if bundle.metadata.source_failures.is_empty() {
            let open = request.required_sources.is_empty();
            self.cache.insert(key, bundle.clone(), queried, open);
        }
        self.transition(&request_id, BuildPhase::Done);
        tracing::info!(
            request_id = %request_id,
            purpose = %bundle.purpose,
            entries = bundle.entries.len(),
            total_tokens = bundle.metadata.total_tokens,
            failures = bundle.metadata.source_failures.len(),
            "Assembled context bundle"
        );
        Ok(bundle)
    }
}

fn check_weight(weight: f64) -> SDKResult<()> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(SDKError::invalid_input(format!("invalid source weight: {weight}")));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────────────────────────

enum AssemblerCommand {
    Register {
        source: ContextSource,
        provider: Arc<dyn SourceProvider>,
        reply: Reply<SDKResult<String>>,
    },
    Update {
        id: String,
        update: SourceUpdate,
        reply: Reply<SDKResult<ContextSource>>,
    },
    Deregister {
        id: String,
        reply: Reply<SDKResult<ContextSource>>,
    },
    Sources {
        reply: Reply<Vec<ContextSource>>,
    },
    Build {
        request: BuildRequest,
        reply: Reply<SDKResult<ContextBundle>>,
    },
    SetWeights {
        weights: ScoreWeights,
        reply: Reply<SDKResult<ScoreWeights>>,
    },
    CleanupCache {
        reply: Reply<usize>,
    },
    ClearCache {
        reply: Reply<()>,
    },
    Stats {
        reply: Reply<AssemblerStats>,
    },
}

/// Handle to the assembler actor.
#[derive(Clone)]
pub struct AssemblerHandle {
    tx: mpsc::Sender<AssemblerCommand>,
    chunk_size: usize,
}

const NAME: &str = "assembler";

impl AssemblerHandle {
    pub fn spawn(assembler: ContextAssembler) -> Self {
        let chunk_size = assembler.config().stream_chunk_size.max(1);
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        tokio::spawn(run(assembler, rx));
        Self { tx, chunk_size }
    }

    pub async fn register_source(
        &self,
        source: ContextSource,
        provider: Arc<dyn SourceProvider>,
    ) -> SDKResult<String> {
        call(NAME, &self.tx, |reply| AssemblerCommand::Register {
            source,
            provider,
            reply,
        })
        .await?
    }

    pub async fn update_source(&self, id: impl Into<String>, update: SourceUpdate) -> SDKResult<ContextSource> {
        let id = id.into();
        call(NAME, &self.tx, |reply| AssemblerCommand::Update { id, update, reply }).await?
    }

    pub async fn deregister_source(&self, id: impl Into<String>) -> SDKResult<ContextSource> {
        let id = id.into();
        call(NAME, &self.tx, |reply| AssemblerCommand::Deregister { id, reply }).await?
    }

    pub async fn sources(&self) -> SDKResult<Vec<ContextSource>> {
        Ok(call(NAME, &self.tx, |reply| AssemblerCommand::Sources { reply }).await?)
    }

    pub async fn build(&self, request: BuildRequest) -> SDKResult<ContextBundle> {
        call(NAME, &self.tx, |reply| AssemblerCommand::Build { request, reply }).await?
    }

    /// Run a build and emit its entries in fixed-size chunks, ending with
    /// [`StreamEvent::Complete`].
    pub async fn build_stream(&self, request: BuildRequest) -> SDKResult<ReceiverStream<StreamEvent>> {
        let bundle = self.build(request).await?;
        let chunk_size = self.chunk_size;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            let mut chunks = 0;
            for (index, entries) in bundle.entries.chunks(chunk_size).enumerate() {
                let event = StreamEvent::Chunk {
                    index,
                    entries: entries.to_vec(),
                };
                if tx.send(event).await.is_err() {
                    return;
                }
                chunks += 1;
            }
            let _ = tx
                .send(StreamEvent::Complete {
                    request_id: bundle.request_id,
                    total_tokens: bundle.metadata.total_tokens,
                    chunks,
                })
                .await;
        });
        Ok(ReceiverStream::new(rx))
    }

    pub async fn set_weights(&self, weights: ScoreWeights) -> SDKResult<ScoreWeights> {
        call(NAME, &self.tx, |reply| AssemblerCommand::SetWeights { weights, reply }).await?
    }

    pub async fn cleanup_cache(&self) -> SDKResult<usize> {
        Ok(call(NAME, &self.tx, |reply| AssemblerCommand::CleanupCache { reply }).await?)
    }

    pub async fn clear_cache(&self) -> SDKResult<()> {
        Ok(call(NAME, &self.tx, |reply| AssemblerCommand::ClearCache { reply }).await?)
    }

    pub async fn stats(&self) -> SDKResult<AssemblerStats> {
        Ok(call(NAME, &self.tx, |reply| AssemblerCommand::Stats { reply }).await?)
    }
}

async fn run(mut assembler: ContextAssembler, mut rx: mpsc::Receiver<AssemblerCommand>) {
    tracing::debug!("Assembler actor started");
    while let Some(command) = rx.recv().await {
        match command {
            AssemblerCommand::Register {
                source,
                provider,
                reply,
            } => {
                let _ = reply.send(assembler.register_source(source, provider));
            }
            AssemblerCommand::Update { id, update, reply } => {
                let _ = reply.send(assembler.update_source(&id, update));
            }
            AssemblerCommand::Deregister { id, reply } => {
                let _ = reply.send(assembler.deregister_source(&id));
            }
            AssemblerCommand::Sources { reply } => {
                let _ = reply.send(assembler.sources());
            }
            AssemblerCommand::Build { request, reply } => {
                let _ = reply.send(assembler.build(request).await);
            }
            AssemblerCommand::SetWeights { weights, reply } => {
                let _ = reply.send(assembler.set_weights(weights));
            }
            AssemblerCommand::CleanupCache { reply } => {
                let _ = reply.send(assembler.cleanup_cache());
            }
            AssemblerCommand::ClearCache { reply } => {
                assembler.clear_cache();
                let _ = reply.send(());
            }
            AssemblerCommand::Stats { reply } => {
                let _ = reply.send(assembler.stats());
            }
        }
    }
    tracing::debug!("Assembler actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::types::{SourceStatus, SourceType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_stream::StreamExt;

    /// Returns fixed entries and counts how often it was asked.
    struct Fixed {
        entries: Vec<ContextEntry>,
        calls: Arc<AtomicUsize>,
    }

    impl Fixed {
        fn new(texts: &[&str], relevance: f64) -> (Arc<Self>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let provider = Arc::new(Self {
                entries: texts.iter().map(|t| ContextEntry::new("ignored", *t, relevance)).collect(),
                calls: calls.clone(),
            });
            (provider, calls)
        }
    }

    #[async_trait]
    impl SourceProvider for Fixed {
        async fn fetch(&self, _source: &ContextSource, _request: &BuildRequest) -> SDKResult<Vec<ContextEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.entries.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl SourceProvider for Failing {
        async fn fetch(&self, source: &ContextSource, _request: &BuildRequest) -> SDKResult<Vec<ContextEntry>> {
            Err(SDKError::resource("source offline", [("source_id", source.id.as_str())]))
        }
    }

    struct Slow(Duration);

    #[async_trait]
    impl SourceProvider for Slow {
        async fn fetch(&self, _source: &ContextSource, _request: &BuildRequest) -> SDKResult<Vec<ContextEntry>> {
            tokio::time::sleep(self.0).await;
            Ok(vec![ContextEntry::new("slow", "arrived too late", 1.0)])
        }
    }

    fn assembler() -> ContextAssembler {
        ContextAssembler::new(AssemblerConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_heavier_source_ranks_above_lighter_one() {
        let mut assembler = assembler();
        let (light, _) = Fixed::new(&["lighter source stack trace"], 0.8);
        let (heavy, _) = Fixed::new(&["heavier source panic message"], 0.8);
        assembler
            .register_source(ContextSource::new("light", SourceType::Documentation, 0.5), light)
            .unwrap();
        assembler
            .register_source(ContextSource::new("heavy", SourceType::Memory, 1.0), heavy)
            .unwrap();

        let bundle = assembler.build(BuildRequest::new("debug")).await.unwrap();

        assert_eq!(bundle.entries.len(), 2);
        assert_eq!(bundle.entries[0].source_id, "heavy");
        assert_eq!(bundle.entries[1].source_id, "light");
        assert_eq!(bundle.metadata.sources_used, vec!["light", "heavy"]);
    }

    #[tokio::test]
    async fn test_second_build_is_served_from_cache() {
        let mut assembler = assembler();
        let (provider, calls) = Fixed::new(&["cached entry"], 0.5);
        assembler
            .register_source(ContextSource::new("docs", SourceType::Documentation, 1.0), provider)
            .unwrap();

        let first = assembler.build(BuildRequest::new("review")).await.unwrap();
        let second = assembler.build(BuildRequest::new("review")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!first.metadata.cache_hit);
        assert!(second.metadata.cache_hit);
        assert_ne!(first.request_id, second.request_id);
        assert_eq!(first.entries, second.entries);

        let stats = assembler.stats();
        assert_eq!((stats.cache_hits, stats.cache_misses), (1, 1));
        assert_eq!(stats.phase, BuildPhase::Done);
    }

    #[tokio::test]
    async fn test_deregistering_a_source_invalidates_cached_bundles() {
        let mut assembler = assembler();
        let (docs, docs_calls) = Fixed::new(&["docs entry"], 0.5);
        let (notes, _) = Fixed::new(&["notes entry"], 0.5);
        assembler
            .register_source(ContextSource::new("docs", SourceType::Documentation, 1.0), docs)
            .unwrap();
        assembler
            .register_source(ContextSource::new("notes", SourceType::Planning, 1.0), notes)
            .unwrap();

        assembler.build(BuildRequest::new("plan")).await.unwrap();
        assembler.deregister_source("notes").unwrap();
        let rebuilt = assembler.build(BuildRequest::new("plan")).await.unwrap();

        assert!(!rebuilt.metadata.cache_hit);
        assert_eq!(docs_calls.load(Ordering::SeqCst), 2);
        assert_eq!(rebuilt.metadata.sources_used, vec!["docs"]);
        assert!(assembler.deregister_source("notes").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_failing_source_is_reported_and_not_cached() {
        let mut assembler = assembler();
        let (docs, docs_calls) = Fixed::new(&["still here"], 0.5);
        assembler
            .register_source(ContextSource::new("docs", SourceType::Documentation, 1.0), docs)
            .unwrap();
        assembler
            .register_source(ContextSource::new("broken", SourceType::Custom, 1.0), Arc::new(Failing))
            .unwrap();

        let bundle = assembler.build(BuildRequest::new("debug")).await.unwrap();
        assert_eq!(bundle.entries.len(), 1);
        assert_eq!(bundle.metadata.source_failures.len(), 1);
        assert_eq!(bundle.metadata.source_failures[0].source_id, "broken");
        assert!(bundle.metadata.source_failures[0].error.contains("source offline"));

        assembler.build(BuildRequest::new("debug")).await.unwrap();
        assert_eq!(docs_calls.load(Ordering::SeqCst), 2);
        assert_eq!(assembler.stats().source_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_is_abandoned_after_bounded_wait() {
        let mut assembler = assembler();
        let (fast, _) = Fixed::new(&["prompt answer"], 0.5);
        assembler
            .register_source(ContextSource::new("quick", SourceType::Memory, 1.0), fast)
            .unwrap();
        assembler
            .register_source(
                ContextSource::new("sluggish", SourceType::CodeAnalysis, 1.0),
                Arc::new(Slow(Duration::from_secs(30))),
            )
            .unwrap();

        let started = tokio::time::Instant::now();
        let bundle = assembler.build(BuildRequest::new("debug")).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(6));
        assert_eq!(bundle.entries.len(), 1);
        assert_eq!(bundle.metadata.sources_used, vec!["quick"]);
        assert!(bundle.metadata.source_failures[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_required_sources_restrict_fan_out() {
        let mut assembler = assembler();
        let (a, a_calls) = Fixed::new(&["from a"], 0.5);
        let (b, b_calls) = Fixed::new(&["from b"], 0.5);
        assembler.register_source(ContextSource::new("a", SourceType::Memory, 1.0), a).unwrap();
        assembler.register_source(ContextSource::new("b", SourceType::Memory, 1.0), b).unwrap();

        let bundle = assembler.build(BuildRequest::new("debug").require_source("b")).await.unwrap();
        assert_eq!(bundle.metadata.sources_used, vec!["b"]);
        assert_eq!(a_calls.load(Ordering::SeqCst), 0);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);

        let err = assembler
            .build(BuildRequest::new("debug").require_source("missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_disabled_sources_are_skipped() {
        let mut assembler = assembler();
        let (a, a_calls) = Fixed::new(&["from a"], 0.5);
        assembler.register_source(ContextSource::new("a", SourceType::Memory, 1.0), a).unwrap();
        assembler
            .update_source("a", SourceUpdate {
                status: Some(SourceStatus::Disabled),
                ..Default::default()
            })
            .unwrap();

        let bundle = assembler.build(BuildRequest::new("debug")).await.unwrap();
        assert!(bundle.entries.is_empty());
        assert_eq!(a_calls.load(Ordering::SeqCst), 0);

        let bundle = assembler.build(BuildRequest::new("debug").require_source("a")).await.unwrap();
        assert_eq!(bundle.metadata.source_failures[0].error, "source disabled");
    }

    #[tokio::test]
    async fn test_reenabled_source_is_not_hidden_by_cache() {
        let mut assembler = assembler();
        let (a, _) = Fixed::new(&["from a"], 0.5);
        let (b, b_calls) = Fixed::new(&["from b"], 0.5);
        assembler.register_source(ContextSource::new("a", SourceType::Memory, 1.0), a).unwrap();
        assembler.register_source(ContextSource::new("b", SourceType::Memory, 1.0), b).unwrap();
        let status = |status| SourceUpdate {
            status: Some(status),
            ..Default::default()
        };

        assembler.update_source("b", status(SourceStatus::Disabled)).unwrap();
        let first = assembler.build(BuildRequest::new("debug")).await.unwrap();
        assert_eq!(first.metadata.sources_used, vec!["a"]);

        assembler.update_source("b", status(SourceStatus::Active)).unwrap();
        let second = assembler.build(BuildRequest::new("debug")).await.unwrap();

        assert!(!second.metadata.cache_hit);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.metadata.sources_used, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_registering_a_source_refreshes_open_bundles_only() {
        let mut assembler = assembler();
        let (a, _) = Fixed::new(&["from a"], 0.5);
        assembler.register_source(ContextSource::new("a", SourceType::Memory, 1.0), a).unwrap();
        assembler.build(BuildRequest::new("debug")).await.unwrap();
        assembler.build(BuildRequest::new("debug").require_source("a")).await.unwrap();

        let (c, _) = Fixed::new(&["from c"], 0.5);
        assembler.register_source(ContextSource::new("c", SourceType::Memory, 1.0), c).unwrap();

        let open = assembler.build(BuildRequest::new("debug")).await.unwrap();
        let pinned = assembler.build(BuildRequest::new("debug").require_source("a")).await.unwrap();
        assert!(!open.metadata.cache_hit);
        assert_eq!(open.metadata.sources_used, vec!["a", "c"]);
        assert!(pinned.metadata.cache_hit);
    }

    #[tokio::test]
    async fn test_duplicates_and_budget_are_enforced() {
        let mut assembler = assembler();
        let long = "lorem ipsum dolor sit amet ".repeat(40);
        let (provider, _) = Fixed::new(
            &["the cache layer keeps bundles", "The cache layer keeps bundles", long.as_str(), "short note"],
            0.5,
        );
        assembler
            .register_source(ContextSource::new("docs", SourceType::Documentation, 1.0), provider)
            .unwrap();

        let bundle = assembler
            .build(BuildRequest::new("summarize").with_max_tokens(50))
            .await
            .unwrap();

        assert!(bundle.metadata.total_tokens <= 50);
        assert!(bundle.metadata.dropped_entries >= 1);
        let texts: Vec<_> = bundle.entries.iter().map(|e| e.text().to_lowercase()).collect();
        assert_eq!(
            texts.iter().filter(|t| t.as_str() == "the cache layer keeps bundles").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_filters_and_preferences() {
        let mut assembler = assembler();
        let provider = Arc::new(Fixed {
            entries: vec![
                ContextEntry::new("x", "rust entry", 0.5)
                    .with_metadata("lang", "rust")
                    .with_metadata("importance", 0.5),
                ContextEntry::new("x", "python entry", 0.5)
                    .with_metadata("lang", "python")
                    .with_metadata("importance", 0.5),
                ContextEntry::new("x", "unlabelled entry", 0.5).with_metadata("importance", 0.5),
            ],
            calls: Arc::new(AtomicUsize::new(0)),
        });
        assembler
            .register_source(ContextSource::new("docs", SourceType::Documentation, 0.5), provider)
            .unwrap();

        let preferred = assembler
            .build(BuildRequest::new("debug").with_preference("lang", "python"))
            .await
            .unwrap();
        assert_eq!(preferred.entries[0].text(), "python entry");

        let filtered = assembler
            .build(BuildRequest::new("debug").with_filter("lang", "rust"))
            .await
            .unwrap();
        assert_eq!(filtered.entries.len(), 1);
        assert_eq!(filtered.entries[0].text(), "rust entry");
    }

    #[test]
    fn test_registration_validation() {
        let mut assembler = assembler();
        let (p, _) = Fixed::new(&[], 0.5);
        assert!(assembler.register_source(ContextSource::new("Bad Id", SourceType::Custom, 1.0), p.clone()).is_err());
        assert!(assembler.register_source(ContextSource::new("neg", SourceType::Custom, -1.0), p.clone()).is_err());
        assembler.register_source(ContextSource::new("ok", SourceType::Custom, 1.0), p.clone()).unwrap();
        assert!(assembler.register_source(ContextSource::new("ok", SourceType::Custom, 1.0), p).is_err());
    }

    #[test]
    fn test_set_weights_normalizes() {
        let mut assembler = assembler();
        let weights = assembler.set_weights(ScoreWeights::new(1.0, 1.0, 2.0)).unwrap();
        assert!((weights.importance - 0.5).abs() < 1e-9);
        assert!(assembler.set_weights(ScoreWeights::new(0.0, 0.0, 0.0)).is_err());
        assert_eq!(assembler.weights(), weights);
    }

    #[tokio::test]
    async fn test_empty_purpose_is_rejected() {
        let mut assembler = assembler();
        let err = assembler.build(BuildRequest::new("  ")).await.unwrap_err();
        assert_eq!(err.kind(), strata_core::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_stream_emits_chunks_then_completion() {
        let mut config = AssemblerConfig::default();
        config.stream_chunk_size = 2;
        let mut assembler = ContextAssembler::new(config).unwrap();
        let (provider, _) = Fixed::new(&["alpha one", "beta two", "gamma three", "delta four", "epsilon five"], 0.5);
        assembler
            .register_source(ContextSource::new("docs", SourceType::Documentation, 1.0), provider)
            .unwrap();
        let handle = AssemblerHandle::spawn(assembler);

        let events: Vec<StreamEvent> = handle
            .build_stream(BuildRequest::new("explain"))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 4);
        let sizes: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk { entries, .. } => Some(entries.len()),
                StreamEvent::Complete { .. } => None,
            })
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(matches!(events.last(), Some(StreamEvent::Complete { chunks: 3, .. })));
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let handle = AssemblerHandle::spawn(assembler());
        let (provider, _) = Fixed::new(&["via handle"], 0.5);
        handle
            .register_source(ContextSource::new("docs", SourceType::Documentation, 1.0), provider)
            .await
            .unwrap();

        let updated = handle
            .update_source("docs", SourceUpdate {
                weight: Some(0.25),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.weight, 0.25);

        let bundle = handle.build(BuildRequest::new("debug")).await.unwrap();
        assert_eq!(bundle.entries.len(), 1);
        assert_eq!(handle.sources().await.unwrap().len(), 1);
        assert_eq!(handle.stats().await.unwrap().builds, 1);
    }
}
