//! strata-core - Core library for Strata
//!
//! This crate holds the tiered memory stores and everything they share:
//!
//! - **types**: Memory entries, tiers, version records, index descriptors
//! - **memory**: Fast/warm tier store, durable tier store, consolidation
//!   strategies and the actors that own each store
//! - **db**: SQLite storage adapter for the durable tier
//! - **error**: Error type with a coarse kind for retry and reporting

#[cfg(feature = "sqlite")]
pub mod db;
pub mod error;
pub mod memory;
pub mod types;

// Re-export commonly used types
#[cfg(feature = "sqlite")]
pub use db::Database;
pub use error::{Error, ErrorKind, Result};
pub use memory::{
    DurableTierConfig, DurableTierHandle, DurableTierStore, FastTierConfig, FastTierHandle,
    FastTierStore, InMemoryAdapter, SearchPage, SearchQuery, StorageAdapter,
};
pub use types::{FieldChange, IndexDescriptor, IndexKind, MemoryEntry, MemoryType, MemoryVersion, Tier};
