//! SDK Error Types
//!
//! Defines error types for the Strata SDK.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strata_core::ErrorKind;
use thiserror::Error;

/// SDK Result type alias
pub type SDKResult<T> = Result<T, SDKError>;

/// SDK errors
#[derive(Debug, Error)]
pub enum SDKError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigValidationError),

    /// Tier store or storage adapter error
    #[error(transparent)]
    Core(#[from] strata_core::Error),

    /// Malformed or unsupported input
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Entity not found
    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    /// Backing resource failed or is full
    #[error("resource error: {message}")]
    Resource {
        message: String,
        context: BTreeMap<String, String>,
    },

    /// Timeout error
    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl From<crate::utils::ValidationError> for SDKError {
    fn from(err: crate::utils::ValidationError) -> Self {
        Self::invalid_input(err.to_string())
    }
}

impl SDKError {
    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Create a resource error carrying key/value context
    pub fn resource<K, V>(message: impl Into<String>, context: impl IntoIterator<Item = (K, V)>) -> Self
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

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Coarse error classification
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::InvalidInput { .. } | Self::Serialization(_) => {
                ErrorKind::Validation
            }
            Self::Core(e) => e.kind(),
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Resource { .. } | Self::Io(_) => ErrorKind::Resource,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Other(_) => ErrorKind::System,
        }
    }

    /// Structured detail safe to return to callers
    pub fn context(&self) -> BTreeMap<String, String> {
        match self {
            Self::Core(e) => e.context(),
            Self::NotFound { entity_type, id } => BTreeMap::from([
                ("entity".to_string(), entity_type.clone()),
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

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Check if this error is a timeout error
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

/// Error payload carried by `error` responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl From<&SDKError> for ErrorBody {
    fn from(err: &SDKError) -> Self {
        let kind = err.kind();
        if kind == ErrorKind::System {
            // Internal faults are logged, never echoed.
            tracing::error!(error = %err, "Internal error");
            return Self {
                kind,
                message: "internal error".to_string(),
                context: BTreeMap::new(),
            };
        }
        Self {
            kind,
            message: err.to_string(),
            context: err.context(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SDKError::invalid_input("bad kind");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("bad kind"));

        let err = SDKError::not_found("partition", "p1");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("partition"));
        assert!(err.to_string().contains("p1"));

        let err = SDKError::timeout("search", 5000);
        assert!(err.is_timeout());
        assert!(err.to_string().contains("5000"));
    }

    #[test]
    fn test_core_errors_keep_their_kind() {
        let err: SDKError = strata_core::Error::not_found("memory", "m1").into();
        assert!(err.is_not_found());
        assert_eq!(err.context().get("id").map(String::as_str), Some("m1"));
    }

    #[test]
    fn test_error_body_hides_system_detail() {
        let err: SDKError = strata_core::Error::system("mutex state: {secret}").into();
        let body = ErrorBody::from(&err);
        assert_eq!(body.kind, ErrorKind::System);
        assert!(!body.message.contains("secret"));

        let err = SDKError::resource("partition full", [("partition_id", "p1")]);
        let body = ErrorBody::from(&err);
        assert_eq!(body.kind, ErrorKind::Resource);
        assert_eq!(body.context["partition_id"], "p1");
    }
}
