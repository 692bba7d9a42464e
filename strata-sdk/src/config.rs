//! SDK Configuration
//!
//! One immutable [`StrataConfig`] is built at startup (defaults, then a TOML
//! file, then environment overrides applied by the caller), validated once,
//! and handed section by section to every component constructor.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strata_core::{DurableTierConfig, FastTierConfig};

use crate::SDKResult;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    /// Path to the SQLite database file
    pub database_path: PathBuf,

    /// Fast (ephemeral) tier
    pub fast: FastTierConfig,

    /// Warm (summarized) tier
    pub warm: FastTierConfig,

    /// Durable (indexed, versioned) tier
    pub durable: DurableTierConfig,

    /// Context assembler
    pub assembler: AssemblerConfig,

    /// Tier coordinator
    pub coordinator: CoordinatorConfig,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("strata.db"),
            fast: FastTierConfig::default(),
            warm: FastTierConfig::warm(),
            durable: DurableTierConfig::default(),
            assembler: AssemblerConfig::default(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

/// Relative weights of the three scoring factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub relevance: f64,
    pub recency: f64,
    pub importance: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            relevance: 0.5,
            recency: 0.3,
            importance: 0.2,
        }
    }
}

impl ScoreWeights {
    pub fn new(relevance: f64, recency: f64, importance: f64) -> Self {
        Self {
            relevance,
            recency,
            importance,
        }
    }

    /// Scale the weights so they sum to 1.
    ///
    /// Negative, non-finite and all-zero weights are rejected.
    pub fn normalized(&self) -> Result<Self, ConfigValidationError> {
        let parts = [self.relevance, self.recency, self.importance];
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigValidationError::InvalidValue {
                field: "assembler.weights".into(),
                message: "weights must be finite and non-negative".into(),
            });
        }
        let sum: f64 = parts.iter().sum();
        if sum <= 0.0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "assembler.weights".into(),
                message: "at least one weight must be positive".into(),
            });
        }
        Ok(Self {
            relevance: self.relevance / sum,
            recency: self.recency / sum,
            importance: self.importance / sum,
        })
    }
}

/// Context assembler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Cached bundles kept before the oldest is evicted (default: 100)
    pub max_cache_size: usize,

    /// Cached bundle lifetime in seconds (default: 300)
    pub cache_ttl_secs: u64,

    /// Token budget when a request names none (default: 4000)
    pub default_max_tokens: usize,

    /// Entries above this many tokens are compressed first (default: 500)
    pub compression_threshold: usize,

    /// Jaccard similarity at which an entry counts as a duplicate (default: 0.85)
    pub dedup_threshold: f64,

    /// Fraction of tokens kept when summarizing low-ranked entries (default: 0.3)
    pub summary_ratio: f64,

    /// Bounded wait for each source in milliseconds (default: 5000)
    pub source_timeout_ms: u64,

    /// Entries per streamed chunk (default: 5)
    pub stream_chunk_size: usize,

    /// Expired cache cleanup interval in seconds (default: 60)
    pub cache_cleanup_interval_secs: u64,

    /// Score weights, normalized on use
    pub weights: ScoreWeights,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            max_cache_size: 100,
            cache_ttl_secs: 300, // 5 minutes
            default_max_tokens: 4000,
            compression_threshold: 500,
            dedup_threshold: 0.85,
            summary_ratio: 0.3,
            source_timeout_ms: 5000,
            stream_chunk_size: 5,
            cache_cleanup_interval_secs: 60,
            weights: ScoreWeights::default(),
        }
    }
}

impl AssemblerConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn cache_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cache_cleanup_interval_secs)
    }
}

/// Tier coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Bounded wait for each tier operation in milliseconds (default: 5000)
    pub operation_timeout_ms: u64,

    /// Retries after the first attempt (default: 3)
    pub retry_count: u32,

    /// First backoff delay in milliseconds, doubled per retry (default: 100)
    pub retry_base_delay_ms: u64,

    /// Metrics refresh interval in seconds (default: 30)
    pub metrics_refresh_interval_secs: u64,

    /// Similarity at which duplicate removal merges entries (default: 0.85)
    pub similarity_threshold: f64,

    /// Entries a term must recur in to become a pattern (default: 3)
    pub pattern_min_support: usize,

    /// Idle age in days after which an entry is obsolete (default: 30)
    pub obsolete_age_days: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 5000,
            retry_count: 3,
            retry_base_delay_ms: 100,
            metrics_refresh_interval_secs: 30,
            similarity_threshold: 0.85,
            pattern_min_support: 3,
            obsolete_age_days: 30,
        }
    }
}

impl CoordinatorConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn metrics_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_refresh_interval_secs)
    }

    pub fn obsolete_age(&self) -> Duration {
        Duration::from_secs(self.obsolete_age_days * 86_400)
    }
}

impl StrataConfig {
    /// Create a config with the given database path and default sections
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Default::default()
        }
    }

    /// Set fast tier configuration
    pub fn with_fast(mut self, fast: FastTierConfig) -> Self {
        self.fast = fast;
        self
    }

    /// Set warm tier configuration
    pub fn with_warm(mut self, warm: FastTierConfig) -> Self {
        self.warm = warm;
        self
    }

    /// Set durable tier configuration
    pub fn with_durable(mut self, durable: DurableTierConfig) -> Self {
        self.durable = durable;
        self
    }

    /// Set assembler configuration
    pub fn with_assembler(mut self, assembler: AssemblerConfig) -> Self {
        self.assembler = assembler;
        self
    }

    /// Set coordinator configuration
    pub fn with_coordinator(mut self, coordinator: CoordinatorConfig) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Parse a TOML document; missing sections and keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigValidationError> {
        toml::from_str(text).map_err(|e| ConfigValidationError::Parse(e.to_string()))
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SDKResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigValidationError> {
        toml::to_string_pretty(self).map_err(|e| ConfigValidationError::Parse(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(invalid("database_path", "must not be empty"));
        }

        for (name, tier) in [("fast", &self.fast), ("warm", &self.warm)] {
            if tier.ttl_secs == 0 {
                return Err(invalid(format!("{name}.ttl_secs"), "must be greater than 0"));
            }
            if tier.max_items == 0 {
                return Err(invalid(format!("{name}.max_items"), "must be greater than 0"));
            }
            if tier.sweep_interval_secs == 0 {
                return Err(invalid(
                    format!("{name}.sweep_interval_secs"),
                    "must be greater than 0",
                ));
            }
        }

        let durable = &self.durable;
        for (field, value) in [
            ("durable.write_buffer_size", durable.write_buffer_size as u64),
            ("durable.cache_size", durable.cache_size as u64),
            ("durable.max_versions", durable.max_versions as u64),
            ("durable.flush_interval_secs", durable.flush_interval_secs),
            (
                "durable.index_update_interval_secs",
                durable.index_update_interval_secs,
            ),
            (
                "durable.ttl_sweep_interval_secs",
                durable.ttl_sweep_interval_secs,
            ),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }

        let assembler = &self.assembler;
        for (field, value) in [
            ("assembler.max_cache_size", assembler.max_cache_size as u64),
            ("assembler.cache_ttl_secs", assembler.cache_ttl_secs),
            ("assembler.source_timeout_ms", assembler.source_timeout_ms),
            ("assembler.stream_chunk_size", assembler.stream_chunk_size as u64),
            (
                "assembler.compression_threshold",
                assembler.compression_threshold as u64,
            ),
            (
                "assembler.cache_cleanup_interval_secs",
                assembler.cache_cleanup_interval_secs,
            ),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }
        if !(assembler.dedup_threshold > 0.0 && assembler.dedup_threshold <= 1.0) {
            return Err(invalid("assembler.dedup_threshold", "must be in (0, 1]"));
        }
        if !(assembler.summary_ratio > 0.0 && assembler.summary_ratio <= 1.0) {
            return Err(invalid("assembler.summary_ratio", "must be in (0, 1]"));
        }
        assembler.weights.normalized()?;

        let coordinator = &self.coordinator;
        if coordinator.operation_timeout_ms == 0 {
            return Err(invalid(
                "coordinator.operation_timeout_ms",
                "must be greater than 0",
            ));
        }
        if coordinator.metrics_refresh_interval_secs == 0 {
            return Err(invalid(
                "coordinator.metrics_refresh_interval_secs",
                "must be greater than 0",
            ));
        }
        if !(coordinator.similarity_threshold > 0.0 && coordinator.similarity_threshold <= 1.0) {
            return Err(invalid(
                "coordinator.similarity_threshold",
                "must be in (0, 1]",
            ));
        }
        if coordinator.pattern_min_support < 2 {
            return Err(invalid(
                "coordinator.pattern_min_support",
                "must be at least 2",
            ));
        }

        Ok(())
    }
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigValidationError {
    ConfigValidationError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}
