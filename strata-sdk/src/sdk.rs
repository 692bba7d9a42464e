//! Main SDK Entry Point
//!
//! [`Strata`] wires the tier actors, the assembler, the coordinator, the
//! dispatcher and the background workers together from one
//! [`StrataConfig`].

use std::sync::Arc;
use strata_core::memory::FlushReport;
use strata_core::{
    Database, DurableTierHandle, DurableTierStore, FastTierHandle, FastTierStore, StorageAdapter, Tier,
};
use tokio::sync::mpsc;

use crate::context::{
    AssemblerHandle, ContextAssembler, ContextSource, DurableTierSource, FastTierSource, SourceType,
};
use crate::coordinator::{CoordinatorHandle, DurableTierClient, FastTierClient, TierClient, TierCoordinator};
use crate::messages::{Dispatcher, Envelope, Services};
use crate::worker::{WorkerFailure, Workers};
use crate::{SDKError, SDKResult, StrataConfig};

/// Built-in context sources: id, tier, weight.
const BUILTIN_SOURCES: [(&str, Tier, f64); 3] = [
    ("fast", Tier::Fast, 1.0),
    ("warm", Tier::Warm, 0.8),
    ("durable", Tier::Durable, 0.9),
];

/// Strata - Main entry point
///
/// # Example
///
/// ```rust,no_run
/// use strata_sdk::{BuildRequest, Strata, StrataConfig};
///
/// async fn example() -> anyhow::Result<()> {
///     let mut strata = Strata::open(StrataConfig::new("strata.db"))?;
///
///     let bundle = strata
///         .assembler()
///         .build(BuildRequest::new("debug").with_query("flush"))
///         .await?;
///     println!("{} entries", bundle.entries.len());
///
///     strata.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct Strata {
    config: StrataConfig,
    fast: FastTierHandle,
    warm: FastTierHandle,
    durable: DurableTierHandle,
    assembler: AssemblerHandle,
    coordinator: CoordinatorHandle,
    dispatcher: Dispatcher,
    workers: Workers,
}

impl Strata {
    /// Open the SQLite database at `config.database_path` and start.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(config: StrataConfig) -> SDKResult<Self> {
        config.validate()?;
        let database = Database::open_path(&config.database_path)?;
        tracing::info!(path = %config.database_path.display(), "Opened database");
        Self::start(config, Arc::new(database))
    }

    /// Spawn every actor and worker over `adapter`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: StrataConfig, adapter: Arc<dyn StorageAdapter>) -> SDKResult<Self> {
        config.validate()?;

        let fast = FastTierHandle::spawn(FastTierStore::new("fast", config.fast.clone()));
        let warm = FastTierHandle::spawn(FastTierStore::new("warm", config.warm.clone()));
        let durable = DurableTierHandle::spawn(DurableTierStore::open(config.durable.clone(), adapter)?);

        let mut assembler = ContextAssembler::new(config.assembler.clone())?;
        for (id, tier, weight) in BUILTIN_SOURCES {
            let source = ContextSource::new(id, SourceType::Memory, weight).with_name(format!("{tier} tier"));
            match tier {
                Tier::Fast => assembler.register_source(source, Arc::new(FastTierSource::new(fast.clone())))?,
                Tier::Warm => assembler.register_source(source, Arc::new(FastTierSource::new(warm.clone())))?,
                Tier::Durable => {
                    assembler.register_source(source, Arc::new(DurableTierSource::new(durable.clone())))?
                }
            };
        }
        let assembler = AssemblerHandle::spawn(assembler);

        let clients: Vec<Arc<dyn TierClient>> = vec![
            Arc::new(FastTierClient::new(Tier::Fast, fast.clone())),
            Arc::new(FastTierClient::new(Tier::Warm, warm.clone())),
            Arc::new(DurableTierClient::new(durable.clone())),
        ];
        let coordinator = CoordinatorHandle::spawn(TierCoordinator::new(config.coordinator.clone(), clients));

        let dispatcher = Dispatcher::new(Services {
            fast: fast.clone(),
            warm: warm.clone(),
            durable: durable.clone(),
            assembler: assembler.clone(),
            coordinator: coordinator.clone(),
        });

        let mut strata = Self {
            config,
            fast,
            warm,
            durable,
            assembler,
            coordinator,
            dispatcher,
            workers: Workers::new(),
        };
        strata.spawn_workers();
        tracing::info!(workers = strata.workers.len(), "Strata started");
        Ok(strata)
    }

    fn spawn_workers(&mut self) {
        let config = &self.config;

        for (name, handle, period) in [
            ("fast-sweep", self.fast.clone(), config.fast.sweep_interval()),
            ("warm-sweep", self.warm.clone(), config.warm.sweep_interval()),
        ] {
            self.workers.spawn(name, period, move || {
                let handle = handle.clone();
                async move {
                    let (expired, evicted) = handle.sweep().await?;
                    if expired + evicted > 0 {
                        tracing::debug!(tier = handle.name(), expired, evicted, "Swept tier");
                    }
                    Ok::<_, SDKError>(())
                }
            });
        }

        let durable = self.durable.clone();
        self.workers.spawn("durable-flush", config.durable.flush_interval(), move || {
            let durable = durable.clone();
            async move {
                let report = durable.flush().await?;
                if report.failed.is_empty() {
                    Ok(())
                } else {
                    Err(SDKError::resource(
                        "flush left batches buffered",
                        [("failed_batches", report.failed.len().to_string())],
                    ))
                }
            }
        });

        let durable = self.durable.clone();
        self.workers
            .spawn("durable-index-update", config.durable.index_update_interval(), move || {
                let durable = durable.clone();
                async move {
                    durable.refresh_indexes().await?;
                    Ok::<_, SDKError>(())
                }
            });

        let durable = self.durable.clone();
        self.workers
            .spawn("durable-ttl-sweep", config.durable.ttl_sweep_interval(), move || {
                let durable = durable.clone();
                async move {
                    durable.sweep_expired().await?;
                    Ok::<_, SDKError>(())
                }
            });

        let assembler = self.assembler.clone();
        self.workers
            .spawn("assembler-cache-cleanup", config.assembler.cache_cleanup_interval(), move || {
                let assembler = assembler.clone();
                async move {
                    assembler.cleanup_cache().await?;
                    Ok::<_, SDKError>(())
                }
            });

        let coordinator = self.coordinator.clone();
        self.workers
            .spawn("metrics-refresh", config.coordinator.metrics_refresh_interval(), move || {
                let coordinator = coordinator.clone();
                async move {
                    coordinator.refresh_metrics().await?;
                    Ok::<_, SDKError>(())
                }
            });
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn fast(&self) -> &FastTierHandle {
        &self.fast
    }

    pub fn warm(&self) -> &FastTierHandle {
        &self.warm
    }

    pub fn durable(&self) -> &DurableTierHandle {
        &self.durable
    }

    pub fn assembler(&self) -> &AssemblerHandle {
        &self.assembler
    }

    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Handle one boundary request.
    pub async fn dispatch(&self, envelope: Envelope) -> Envelope {
        self.dispatcher.dispatch(envelope).await
    }

    /// Names of the running background workers.
    pub fn worker_names(&self) -> Vec<&str> {
        self.workers.names()
    }

    /// Failure reports from background workers; only the first caller gets
    /// the channel.
    pub fn worker_failures(&mut self) -> Option<mpsc::Receiver<WorkerFailure>> {
        self.workers.take_failures()
    }

    /// Stop the workers, then flush whatever the durable tier still buffers.
    pub async fn shutdown(&mut self) -> SDKResult<FlushReport> {
        self.workers.shutdown().await;
        let report = self.durable.flush().await?;
        tracing::info!(written = report.written, failed = report.failed.len(), "Strata stopped");
        Ok(report)
    }
}
