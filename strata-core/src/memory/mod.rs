//! Tiered memory stores.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │   FastTierHandle      FastTierHandle (warm)   DurableHandle  │
//! │         │                    │                     │         │
//! │   ┌─────▼──────┐      ┌──────▼─────┐      ┌────────▼──────┐  │
//! │   │ FastTier   │      │ FastTier   │      │ DurableTier   │  │
//! │   │ TTL + LRU  │      │ longer TTL │      │ buffer, index │  │
//! │   │ (minutes)  │      │ (hours)    │      │ cache, history│  │
//! │   └────────────┘      └────────────┘      └───────┬───────┘  │
//! │                                                   │          │
//! │                                            StorageAdapter    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each store is owned by exactly one actor task; everything else talks to
//! it through a cloneable handle.

mod actor;
mod adapter;
mod consolidation;
mod durable;
mod fast;
mod history;
mod index;
mod traits;

pub use actor::*;
pub use adapter::*;
pub use consolidation::*;
pub use durable::*;
pub use fast::*;
pub use history::*;
pub use index::*;
pub use traits::*;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a fast (or warm) tier store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastTierConfig {
    /// Default TTL in seconds when neither the put nor the entry names one (default: 3600)
    pub ttl_secs: u64,
    /// Maximum number of live entries (default: 10000)
    pub max_items: usize,
    /// Periodic TTL/capacity sweep interval in seconds (default: 60)
    pub sweep_interval_secs: u64,
}

impl Default for FastTierConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600, // 1 hour
            max_items: 10_000,
            sweep_interval_secs: 60,
        }
    }
}

impl FastTierConfig {
    /// Defaults for the warm mid-tier.
    pub fn warm() -> Self {
        Self {
            ttl_secs: 86_400, // 24 hours
            max_items: 50_000,
            sweep_interval_secs: 300,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Configuration for the durable tier store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurableTierConfig {
    /// Buffered entries that trigger an automatic flush (default: 100)
    pub write_buffer_size: usize,
    /// Read cache capacity (default: 1000)
    pub cache_size: usize,
    /// Periodic flush interval in seconds (default: 5)
    pub flush_interval_secs: u64,
    /// Periodic index rebuild interval in seconds (default: 60)
    pub index_update_interval_secs: u64,
    /// Periodic TTL sweep interval in seconds (default: 300)
    pub ttl_sweep_interval_secs: u64,
    /// Version records retained per entry (default: 10)
    pub max_versions: usize,
}

impl Default for DurableTierConfig {
    fn default() -> Self {
        Self {
            write_buffer_size: 100,
            cache_size: 1000,
            flush_interval_secs: 5,
            index_update_interval_secs: 60,
            ttl_sweep_interval_secs: 300, // 5 minutes
            max_versions: 10,
        }
    }
}

impl DurableTierConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn index_update_interval(&self) -> Duration {
        Duration::from_secs(self.index_update_interval_secs)
    }

    pub fn ttl_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.ttl_sweep_interval_secs)
    }
}
