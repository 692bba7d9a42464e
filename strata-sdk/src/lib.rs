//! Strata SDK - Central Library for the Tiered Memory System
//!
//! This crate ties the tier stores from `strata-core` into one running
//! system:
//!
//! # Core Modules (from strata-core)
//!
//! - **memory** - Fast/warm and durable tier stores, their actors, consolidation
//! - **types** - Memory entries, tiers, version records
//! - **db** - SQLite storage adapter
//!
//! # SDK Modules
//!
//! - **context** - Context Assembler: gather, rank, dedup and budget entries
//! - **coordinator** - Cross-tier search, migration, sync, partitions, health
//! - **messages** - Typed boundary envelopes and the request dispatcher
//! - **worker** - Supervised periodic jobs
//!
//! # Example
//!
//! ```rust,no_run
//! use strata_sdk::{MemoryEntry, MemoryType, Strata, StrataConfig};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let mut strata = Strata::open(StrataConfig::new("strata.db"))?;
//!
//!     // Keep something for the session
//!     let entry = MemoryEntry::new(MemoryType::Interaction, "user-123", "ran `git status`");
//!     strata.fast().put(entry, None).await?;
//!
//!     // Search every tier at once
//!     let results = strata
//!         .coordinator()
//!         .cross_tier_search("user-123", "git", strata_sdk::Tier::ALL.to_vec(), 20)
//!         .await?;
//!     println!("{} tiers answered", results.results.len());
//!
//!     strata.shutdown().await?;
//!     Ok(())
//! }
//! ```

// ─────────────────────────────────────────────────────────────────────────────
// Re-export core modules from strata-core
// ─────────────────────────────────────────────────────────────────────────────

/// Tier stores, actors and consolidation strategies
pub use strata_core::memory;

/// Memory entries, tiers, version records
pub use strata_core::types;

/// SQLite storage adapter
pub use strata_core::db;

/// Error types from core
pub use strata_core::error as core_error;

pub use strata_core::{
    DurableTierConfig, DurableTierHandle, ErrorKind, FastTierConfig, FastTierHandle, InMemoryAdapter,
    MemoryEntry, MemoryType, MemoryVersion, SearchPage, SearchQuery, StorageAdapter, Tier,
};

// ─────────────────────────────────────────────────────────────────────────────
// SDK-specific modules
// ─────────────────────────────────────────────────────────────────────────────

pub mod context;
pub mod coordinator;
pub mod messages;
pub mod utils;
pub mod worker;

mod config;
mod error;
mod sdk;

// Re-export main SDK types
pub use config::{AssemblerConfig, ConfigValidationError, CoordinatorConfig, ScoreWeights, StrataConfig};
pub use error::{ErrorBody, SDKError, SDKResult};
pub use sdk::Strata;

pub use context::{AssemblerHandle, BuildRequest, ContextAssembler, ContextBundle, ContextEntry, ContextSource};
pub use coordinator::{CoordinatorHandle, TierCoordinator};
pub use messages::{Dispatcher, Envelope, Response};
pub use worker::{WorkerFailure, Workers};
