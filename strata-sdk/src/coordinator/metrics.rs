use chrono::Utc;
use std::collections::VecDeque;
use std::time::Duration;

use super::types::PerformanceMetrics;

/// Operations the average latency is taken over.
pub const LATENCY_WINDOW: usize = 100;

/// Running coordinator counters.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    completed: u64,
    failed: u64,
    syncs: u64,
    retries: u64,
    latencies_ms: VecDeque<f64>,
    refreshed: Option<PerformanceMetrics>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, elapsed: Duration, ok: bool, retries: u32) {
        if ok {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        self.retries += u64::from(retries);
        if self.latencies_ms.len() == LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn record_sync(&mut self) {
        self.syncs += 1;
    }

    pub fn average_latency_ms(&self) -> f64 {
        if self.latencies_ms.is_empty() {
            return 0.0;
        }
        self.latencies_ms.iter().sum::<f64>() / self.latencies_ms.len() as f64
    }

    /// Live view of the counters.
    pub fn snapshot(&self, partition_count: usize, active_syncs: usize) -> PerformanceMetrics {
        PerformanceMetrics {
            operations_completed: self.completed,
            operations_failed: self.failed,
            average_latency_ms: self.average_latency_ms(),
            sync_count: self.syncs,
            partition_count,
            active_syncs,
            retries: self.retries,
            refreshed_at: self.refreshed.as_ref().and_then(|m| m.refreshed_at),
        }
    }

    /// Stamp a snapshot as the latest periodic refresh.
    pub fn refresh(&mut self, partition_count: usize, active_syncs: usize) -> PerformanceMetrics {
        let mut metrics = self.snapshot(partition_count, active_syncs);
        metrics.refreshed_at = Some(Utc::now());
        self.refreshed = Some(metrics.clone());
        metrics
    }
}
