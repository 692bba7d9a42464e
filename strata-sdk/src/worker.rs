//! Supervised background workers.
//!
//! Each periodic job runs on its own task and never touches another
//! component's state except through its actor handle. A failing run is
//! reported on the failure channel and the job keeps its schedule; all
//! workers stop when the shared shutdown signal flips.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use strata_core::ErrorKind;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::SDKResult;

/// Failures buffered before new ones are dropped (and logged).
pub const FAILURE_CHANNEL_CAPACITY: usize = 256;

/// One failed run of a background job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub worker: String,
    pub kind: ErrorKind,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// A named periodic job.
pub struct BackgroundWorker {
    name: String,
    handle: JoinHandle<()>,
}

impl BackgroundWorker {
    /// Run `job` every `period` until `shutdown` turns true. A zero period
    /// disables the job.
    pub fn spawn<F, Fut>(
        name: impl Into<String>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
        failures: mpsc::Sender<WorkerFailure>,
        mut job: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = SDKResult<()>> + Send + 'static,
    {
        let name = name.into();
        let worker = name.clone();
        let handle = tokio::spawn(async move {
            if period.is_zero() {
                tracing::warn!(worker = %worker, "Worker disabled: zero period");
                let _ = shutdown.wait_for(|stop| *stop).await;
                return;
            }
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(worker = %worker, period_ms = period.as_millis() as u64, "Worker started");

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = job().await {
                            tracing::warn!(worker = %worker, kind = %e.kind(), error = %e, "Worker run failed");
                            let failure = WorkerFailure {
                                worker: worker.clone(),
                                kind: e.kind(),
                                error: e.to_string(),
                                at: Utc::now(),
                            };
                            if failures.try_send(failure).is_err() {
                                tracing::warn!(worker = %worker, "Failure channel full, dropping report");
                            }
                        }
                    }
                }
            }
            tracing::debug!(worker = %worker, "Worker stopped");
        });
        Self { name, handle }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to end after shutdown was signalled.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::error!(worker = %self.name, error = %e, "Worker task panicked");
        }
    }
}

/// The set of workers sharing one shutdown signal and failure channel.
pub struct Workers {
    shutdown: watch::Sender<bool>,
    failures: mpsc::Sender<WorkerFailure>,
    failure_rx: Option<mpsc::Receiver<WorkerFailure>>,
    workers: Vec<BackgroundWorker>,
}

impl Default for Workers {
    fn default() -> Self {
        Self::new()
    }
}

impl Workers {
    pub fn new() -> Self {
        let (failures, failure_rx) = mpsc::channel(FAILURE_CHANNEL_CAPACITY);
        Self {
            shutdown: watch::Sender::new(false),
            failures,
            failure_rx: Some(failure_rx),
            workers: Vec::new(),
        }
    }

    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, period: Duration, job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = SDKResult<()>> + Send + 'static,
    {
        let worker = BackgroundWorker::spawn(name, period, self.shutdown.subscribe(), self.failures.clone(), job);
        self.workers.push(worker);
    }

    pub fn names(&self) -> Vec<&str> {
        self.workers.iter().map(BackgroundWorker::name).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// The failure channel; only the first caller gets it.
    pub fn take_failures(&mut self) -> Option<mpsc::Receiver<WorkerFailure>> {
        self.failure_rx.take()
    }

    /// Signal every worker and wait for all of them to stop.
    pub async fn shutdown(&mut self) {
        self.shutdown.send_replace(true);
        for worker in self.workers.drain(..) {
            worker.join().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SDKError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_job_runs_on_schedule() {
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        let mut workers = Workers::new();
        workers.spawn("tick", Duration::from_secs(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        workers.shutdown().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(workers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_reported_and_job_continues() {
        let mut workers = Workers::new();
        let mut failures = workers.take_failures().unwrap();
        assert!(workers.take_failures().is_none());

        workers.spawn("flush", Duration::from_secs(1), || async {
            Err(SDKError::resource("disk full", [("tier", "durable")]))
        });

        let first = failures.recv().await.unwrap();
        assert_eq!(first.worker, "flush");
        assert_eq!(first.kind, ErrorKind::Resource);
        let second = failures.recv().await.unwrap();
        assert!(second.at >= first.at);

        workers.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_disabled() {
        let mut workers = Workers::new();
        workers.spawn("never", Duration::ZERO, || async { Err(SDKError::invalid_input("ran")) });
        let mut failures = workers.take_failures().unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(failures.try_recv().is_err());
        assert_eq!(workers.names(), vec!["never"]);
        workers.shutdown().await;
    }
}
