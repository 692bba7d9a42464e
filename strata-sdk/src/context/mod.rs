//! Context Assembler
//!
//! Blends entries from registered sources into a ranked, deduplicated,
//! token-bounded [`ContextBundle`].
//!
//! ## Pipeline
//!
//! ```text
//! BuildRequest
//!     │
//!     ├── cache hit? ──────────────────────────────► ContextBundle
//!     │
//!     ▼
//! gather (one task per source, bounded wait)
//!     │
//!     ▼
//! filter → score → dedup → optimize (compress, summarize, truncate)
//!     │
//!     ▼
//! ContextBundle (cached unless a source failed)
//! ```

mod assembler;
mod cache;
mod dedup;
mod optimize;
mod scoring;
mod source;
mod types;

pub use assembler::{AssemblerHandle, AssemblerStats, ContextAssembler};
pub use cache::{BundleCache, cache_key};
pub use dedup::deduplicate;
pub use optimize::{OptimizeOptions, OptimizeOutcome, optimize, total_tokens, truncate_to_tokens};
pub use scoring::{PREFERENCE_BONUS, apply_filters, importance_score, rank, recency_score};
pub use source::{DEFAULT_SOURCE_LIMIT, DurableTierSource, FastTierSource, SourceProvider, entry_candidate, token_relevance};
pub use types::*;
