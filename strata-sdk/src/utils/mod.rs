//! SDK Utilities
//!
//! Common utilities for the SDK.

mod hashing;
mod validation;

pub use hashing::{canonical_hash, content_hash};
pub use validation::{validate_id, validate_owner, ValidationError};
