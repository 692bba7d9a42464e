//! Error types for strata-core.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Result type alias using strata-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification every error maps onto.
///
/// Callers use the kind to decide whether to retry and how to render the
/// failure at the message boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Resource,
    Network,
    Timeout,
    System,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Resource => "resource",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error types for strata operations
#[derive(Error, Debug)]
pub enum Error {
    // Input errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    // Backing store errors
    #[error("Resource error: {message}")]
    Resource {
        message: String,
        context: BTreeMap<String, String>,
    },

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    // Internal faults
    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("{0} actor is not running")]
    ActorUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    System(String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Resource error carrying extra key/value detail for the caller.
    pub fn resource_with<K, V>(message: impl Into<String>, context: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::Resource {
            message: message.into(),
            context: context
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::System(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Serialization(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Resource { .. } | Self::Io(_) => ErrorKind::Resource,
            #[cfg(feature = "sqlite")]
            Self::Database(_) => ErrorKind::Resource,
            Self::Network(_) => ErrorKind::Network,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::LockPoisoned | Self::ActorUnavailable(_) | Self::System(_) => ErrorKind::System,
        }
    }

    /// Structured detail safe to hand back to callers.
    pub fn context(&self) -> BTreeMap<String, String> {
        match self {
            Self::NotFound { entity, id } => BTreeMap::from([
                ("entity".to_string(), entity.clone()),
                ("id".to_string(), id.clone()),
            ]),
            Self::Resource { context, .. } => context.clone(),
            Self::Timeout {
                operation,
                duration_ms,
            } => BTreeMap::from([
                ("operation".to_string(), operation.clone()),
                ("duration_ms".to_string(), duration_ms.to_string()),
            ]),
            _ => BTreeMap::new(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether a caller may reasonably try the same operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Resource | ErrorKind::Network | ErrorKind::Timeout
        )
    }
}
