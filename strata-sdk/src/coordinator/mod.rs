//! Tier Coordinator
//!
//! Cross-tier search, migration, consolidation, sync, partitions and access
//! control over the fast, warm and durable tiers.
//!
//! ```text
//!                       CoordinatorHandle
//!                              │ mailbox
//!                      ┌───────▼────────┐
//!                      │ TierCoordinator│── partitions, audit, metrics
//!                      └───────┬────────┘
//!             JoinSet fan-out  │  timeout + retry per tier
//!          ┌───────────────────┼───────────────────┐
//!    FastTierClient     FastTierClient (warm)   DurableTierClient
//! ```

mod access;
mod metrics;
mod partition;
mod retry;
mod tier_coordinator;
mod tiers;
mod types;

pub use access::{AUDIT_TRAIL_CAPACITY, AuditTrail, decide, is_granted};
pub use metrics::{LATENCY_WINDOW, MetricsRecorder};
pub use partition::PartitionRegistry;
pub use retry::{OperationClass, Retried, RetryPolicy, retry};
pub use tier_coordinator::{CoordinatorHandle, DEFAULT_SEARCH_LIMIT, TierCoordinator};
pub use tiers::{DurableTierClient, FastTierClient, TierClient};
pub use types::*;
