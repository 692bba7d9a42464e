//! Bounded retry with exponential backoff.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use strata_core::ErrorKind;

use crate::SDKResult;
use crate::config::CoordinatorConfig;

/// Whether an operation may be repeated without changing its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    /// search, health, metrics
    Idempotent,
    /// migrate, sync, partition writes
    Mutating,
}

impl OperationClass {
    pub fn should_retry(&self, kind: ErrorKind) -> bool {
        match self {
            Self::Idempotent => !matches!(kind, ErrorKind::Validation | ErrorKind::NotFound),
            Self::Mutating => matches!(kind, ErrorKind::Resource | ErrorKind::Network | ErrorKind::Timeout),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first
    pub retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, base_delay: Duration) -> Self {
        Self { retries, base_delay }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(config.retry_count, config.retry_base_delay())
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1),
    /// plus up to half the base as jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let jitter_ms = self.base_delay.as_millis() as u64 / 2;
        if jitter_ms == 0 {
            return exp;
        }
        exp + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Outcome of [`retry`] with the number of retries spent.
pub struct Retried<T> {
    pub result: SDKResult<T>,
    pub retries: u32,
}

/// Run `op` until it succeeds, fails with a kind `class` does not retry, or
/// the policy runs out of attempts.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, class: OperationClass, operation: &str, mut op: F) -> Retried<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SDKResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    retries: attempt,
                };
            }
            Err(e) if attempt < policy.retries && class.should_retry(e.kind()) => {
                attempt += 1;
                let delay = policy.delay(attempt);
                tracing::debug!(operation, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Retried {
                    result: Err(e),
                    retries: attempt,
                };
            }
        }
    }
}
