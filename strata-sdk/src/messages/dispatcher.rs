//! Request dispatch.
//!
//! Handlers are registered once per request type when the dispatcher is
//! built; each one decodes its own typed payload and answers with a
//! [`Response`]. Nothing here owns state: every handler goes through the
//! actor handles in [`Services`].

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use strata_core::{DurableTierHandle, FastTierHandle, MemoryEntry, SearchQuery, Tier};

use super::types::*;
use crate::context::{AssemblerHandle, BuildRequest};
use crate::coordinator::CoordinatorHandle;
use crate::{SDKError, SDKResult};

/// Handles every request handler may use.
#[derive(Clone)]
pub struct Services {
    pub fast: FastTierHandle,
    pub warm: FastTierHandle,
    pub durable: DurableTierHandle,
    pub assembler: AssemblerHandle,
    pub coordinator: CoordinatorHandle,
}

impl Services {
    /// The fast-store handle backing `tier`; `None` for the durable tier.
    fn fast_store(&self, tier: Tier) -> Option<&FastTierHandle> {
        match tier {
            Tier::Fast => Some(&self.fast),
            Tier::Warm => Some(&self.warm),
            Tier::Durable => None,
        }
    }
}

/// Boxed handler future
pub type HandlerFuture = BoxFuture<'static, SDKResult<Response>>;

/// Handler callback type
pub type Handler = Arc<dyn Fn(Services, Value) -> HandlerFuture + Send + Sync>;

/// Routes envelopes to the handler registered for their type.
#[derive(Clone)]
pub struct Dispatcher {
    services: Services,
    handlers: Arc<HashMap<&'static str, Handler>>,
}

impl Dispatcher {
    /// Dispatcher with every built-in request type registered.
    pub fn new(services: Services) -> Self {
        let mut handlers = HashMap::new();
        register(&mut handlers, "memory.store", store);
        register(&mut handlers, "memory.get", get);
        register(&mut handlers, "memory.search", search);
        register(&mut handlers, "memory.update", update);
        register(&mut handlers, "memory.rollback", rollback);
        register(&mut handlers, "memory.delete", delete);
        register(&mut handlers, "memory.history", history);
        register(&mut handlers, "memory.flush", flush);
        register(&mut handlers, "coordination.search", cross_tier_search);
        register(&mut handlers, "coordination.migrate", migrate);
        register(&mut handlers, "coordination.consolidate", consolidate);
        register(&mut handlers, "coordination.sync", sync);
        register(&mut handlers, "coordination.partition.create", create_partition);
        register(&mut handlers, "coordination.partition.write", partition_write);
        register(&mut handlers, "coordination.access.check", check_access);
        register(&mut handlers, "coordination.health", health);
        register(&mut handlers, "coordination.metrics", metrics);
        register(&mut handlers, "context.build", build_context);
        register(&mut handlers, "context.source.update", update_source);
        register(&mut handlers, "context.source.deregister", deregister_source);
        tracing::debug!(handlers = handlers.len(), "Dispatcher ready");
        Self {
            services,
            handlers: Arc::new(handlers),
        }
    }

    /// Registered request types, sorted.
    pub fn request_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Handle one request. Failures come back as `error` envelopes; the
    /// correlation id is always echoed, and assigned when missing.
    pub async fn dispatch(&self, envelope: Envelope) -> Envelope {
        let correlation_id = envelope
            .correlation_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let message_type = envelope.message_type;

        let response = match self.handlers.get(message_type.as_str()) {
            Some(handler) => match handler(self.services.clone(), envelope.data).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        message_type = %message_type,
                        correlation_id = %correlation_id,
                        kind = %e.kind(),
                        error = %e,
                        "Request failed"
                    );
                    Response::error(&e)
                }
            },
            None => Response::error(&SDKError::invalid_input(format!("unknown message type: {message_type}"))),
        };
        tracing::debug!(message_type = %message_type, correlation_id = %correlation_id, "Dispatched");
        response.into_envelope(correlation_id)
    }

    /// Parse and handle a raw JSON request.
    pub async fn dispatch_json(&self, raw: &str) -> Envelope {
        match Envelope::from_json(raw) {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(e) => Response::error(&e).into_envelope(uuid::Uuid::new_v4().to_string()),
        }
    }
}

fn register<P, F, Fut>(handlers: &mut HashMap<&'static str, Handler>, message_type: &'static str, handler: F)
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(Services, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SDKResult<Response>> + Send + 'static,
{
    let handler = Arc::new(handler);
    handlers.insert(
        message_type,
        Arc::new(move |services: Services, data: Value| {
            let handler = handler.clone();
            async move {
                let payload: P = decode(message_type, data)?;
                handler(services, payload).await
            }
            .boxed()
        }),
    );
}

/// Decode a request payload; a missing payload reads as `{}`.
fn decode<P: DeserializeOwned>(message_type: &str, data: Value) -> SDKResult<P> {
    let data = if data.is_null() { Value::Object(Map::new()) } else { data };
    serde_json::from_value(data).map_err(|e| SDKError::invalid_input(format!("invalid {message_type} payload: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn store(services: Services, payload: StorePayload) -> SDKResult<Response> {
    let tier = payload.tier;
    let entry = payload.entry.into_entry();
    entry.validate()?;
    let id = entry.id.clone();
    let flush = match services.fast_store(tier) {
        Some(handle) => {
            handle.put(entry, None).await?;
            None
        }
        None => services.durable.store(entry).await?,
    };
    Ok(Response::Stored(StoredData { id, tier, flush }))
}

async fn get(services: Services, payload: GetPayload) -> SDKResult<Response> {
    let tiers = match payload.tier {
        Some(tier) => vec![tier],
        None => Tier::ALL.to_vec(),
    };
    for tier in tiers {
        let found = match services.fast_store(tier) {
            Some(handle) => handle.get(payload.id.as_str()).await,
            None => services.durable.get(payload.id.as_str()).await,
        };
        match found {
            Ok(entry) => return Ok(Response::Entry(Box::new(entry))),
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(SDKError::not_found("memory", payload.id))
}

async fn search(services: Services, payload: SearchPayload) -> SDKResult<Response> {
    let SearchPayload {
        query,
        owner_id,
        entry_type,
        tier,
        limit,
        offset,
    } = payload;
    let data = match services.fast_store(tier) {
        Some(handle) => {
            let found: Vec<MemoryEntry> = handle
                .search(owner_id, query, limit.saturating_add(offset))
                .await?
                .into_iter()
                .filter(|e| entry_type.is_none_or(|t| e.entry_type == t))
                .collect();
            SearchData {
                tier,
                total: found.len(),
                entries: found.into_iter().skip(offset).take(limit).collect(),
                limit,
                offset,
            }
        }
        None => {
            let mut search = SearchQuery::text(query).page(limit, offset);
            if let Some(t) = entry_type {
                search = search.with_type(t);
            }
            if let Some(owner) = owner_id {
                search = search.with_owner(owner);
            }
            let page = services.durable.search(search).await?;
            SearchData {
                tier,
                entries: page.entries,
                total: page.total,
                limit: page.limit,
                offset: page.offset,
            }
        }
    };
    Ok(Response::SearchResult(data))
}

async fn update(services: Services, payload: UpdatePayload) -> SDKResult<Response> {
    let entry = services
        .durable
        .update(payload.id, payload.changes, payload.reason, payload.author)
        .await?;
    Ok(Response::Entry(Box::new(entry)))
}

async fn rollback(services: Services, payload: RollbackPayload) -> SDKResult<Response> {
    let entry = services
        .durable
        .rollback(payload.id, payload.version, payload.author)
        .await?;
    Ok(Response::Entry(Box::new(entry)))
}

async fn delete(services: Services, payload: DeletePayload) -> SDKResult<Response> {
    let DeletePayload { id, tier, hard } = payload;
    match services.fast_store(tier) {
        Some(handle) => {
            if handle.remove(id.as_str()).await?.is_none() {
                return Err(SDKError::not_found("memory", id));
            }
        }
        None if hard => services.durable.hard_delete(id.as_str()).await?,
        None => services.durable.soft_delete(id.as_str()).await?,
    }
    let result = OperationData::new("memory.delete", Some(id), true)
        .with_detail(json!({ "tier": tier, "hard": hard || tier != Tier::Durable }))?;
    Ok(Response::Operation(result))
}

async fn history(services: Services, payload: IdPayload) -> SDKResult<Response> {
    let versions = services.durable.history(payload.id.as_str()).await?;
    Ok(Response::History(HistoryData {
        id: payload.id,
        versions,
    }))
}

async fn flush(services: Services, _payload: EmptyPayload) -> SDKResult<Response> {
    let report = services.durable.flush().await?;
    let result = OperationData::new("memory.flush", None, report.failed.is_empty()).with_detail(&report)?;
    Ok(Response::Operation(result))
}

// ─────────────────────────────────────────────────────────────────────────────
// Coordination handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn cross_tier_search(services: Services, payload: CrossSearchPayload) -> SDKResult<Response> {
    let result = services
        .coordinator
        .cross_tier_search(payload.owner_id, payload.query, payload.tiers, payload.limit)
        .await?;
    Ok(Response::CrossTierSearch(result))
}

async fn migrate(services: Services, payload: MigratePayload) -> SDKResult<Response> {
    let report = services
        .coordinator
        .migrate(payload.owner_id, payload.item_ids, payload.source_tier, payload.target_tier)
        .await?;
    Ok(Response::Migration(report))
}

async fn consolidate(services: Services, payload: ConsolidatePayload) -> SDKResult<Response> {
    let report = services.coordinator.consolidate(payload.owner_id, payload.kind).await?;
    Ok(Response::Consolidation(report))
}

async fn sync(services: Services, payload: SyncPayload) -> SDKResult<Response> {
    let report = services
        .coordinator
        .sync(payload.owner_id, payload.source_tier, payload.target_tier, payload.sync_kind)
        .await?;
    Ok(Response::SyncStatus(report))
}

async fn create_partition(services: Services, payload: CreatePartitionPayload) -> SDKResult<Response> {
    let partition = services
        .coordinator
        .create_partition(
            payload.partition_id,
            payload.owner_id,
            payload.strategy,
            payload.capacity_limits,
        )
        .await?;
    Ok(Response::PartitionCreated(partition))
}

async fn partition_write(services: Services, payload: PartitionWritePayload) -> SDKResult<Response> {
    let entry = payload.entry.into_entry();
    entry.validate()?;
    let id = entry.id.clone();
    let partition = services
        .coordinator
        .partition_write(payload.partition_id, payload.tier, entry)
        .await?;
    let result = OperationData::new("coordination.partition.write", Some(id), true).with_detail(&partition)?;
    Ok(Response::Operation(result))
}

async fn check_access(services: Services, payload: AccessPayload) -> SDKResult<Response> {
    let decision = services
        .coordinator
        .check_access(payload.owner_id, payload.access, payload.tier, payload.resource_id)
        .await?;
    Ok(Response::AccessDecision(decision))
}

async fn health(services: Services, payload: HealthPayload) -> SDKResult<Response> {
    let report = services
        .coordinator
        .health_check(payload.kind, payload.include_metrics)
        .await?;
    Ok(Response::HealthReport(Box::new(report)))
}

async fn metrics(services: Services, _payload: EmptyPayload) -> SDKResult<Response> {
    Ok(Response::MetricsReport(services.coordinator.metrics().await?))
}

// ─────────────────────────────────────────────────────────────────────────────
// Context handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn build_context(services: Services, payload: BuildRequest) -> SDKResult<Response> {
    let bundle = services.assembler.build(payload).await?;
    Ok(Response::Bundle(Box::new(bundle)))
}

async fn update_source(services: Services, payload: SourceUpdatePayload) -> SDKResult<Response> {
    let source = services
        .assembler
        .update_source(payload.source_id.as_str(), payload.update)
        .await?;
    let result = OperationData::new("context.source.update", Some(payload.source_id), true).with_detail(&source)?;
    Ok(Response::Operation(result))
}

async fn deregister_source(services: Services, payload: SourceIdPayload) -> SDKResult<Response> {
    let source = services.assembler.deregister_source(payload.source_id.as_str()).await?;
    let result =
        OperationData::new("context.source.deregister", Some(payload.source_id), true).with_detail(&source)?;
    Ok(Response::Operation(result))
}
