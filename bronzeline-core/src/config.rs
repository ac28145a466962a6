//! Engine and connection configuration

use crate::{
    ConfigError, ConnectionAlias, LineageError, LineageResult, SourceKind, Tier,
    ValidationError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

// ============================================================================
// ENGINE CONFIG
// ============================================================================

/// What a second analyze request does while one is in flight for the
/// same procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InFlightPolicy {
    /// Wait for the running analysis, then re-check the cache.
    #[default]
    Wait,
    /// Fail fast with a retryable conflict.
    Reject,
}

/// Tunables for the resolver, tracker and pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Minimum score at which auto_map confirms a candidate.
    pub acceptance_threshold: f32,
    /// Table scores closer than this are ranked by column overlap.
    pub tie_epsilon: f32,
    /// Candidates surfaced per `from` table.
    pub top_k: usize,
    /// Candidates scoring below this are never surfaced.
    pub min_candidate_score: f32,
    /// Bound on concurrent catalog / analysis calls in bulk operations.
    pub worker_pool_size: usize,
    pub catalog_timeout_ms: u64,
    pub analysis_timeout_ms: u64,
    pub in_flight_policy: InFlightPolicy,
    /// Check that both tables exist before confirming a mapping.
    pub verify_confirmed_tables: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.85,
            tie_epsilon: 0.02,
            top_k: 1,
            min_candidate_score: 0.0,
            worker_pool_size: 8,
            catalog_timeout_ms: 30_000,
            analysis_timeout_ms: 120_000,
            in_flight_policy: InFlightPolicy::Wait,
            verify_confirmed_tables: true,
        }
    }
}

impl EngineConfig {
    pub fn catalog_timeout(&self) -> Duration {
        Duration::from_millis(self.catalog_timeout_ms)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LineageResult<()> {
        for (field, value) in [
            ("acceptance_threshold", self.acceptance_threshold),
            ("min_candidate_score", self.min_candidate_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(field, value, "must be between 0.0 and 1.0"));
            }
        }

        if !(0.0..0.5).contains(&self.tie_epsilon) {
            return Err(invalid(
                "tie_epsilon",
                self.tie_epsilon,
                "must be non-negative and below 0.5",
            ));
        }

        if self.top_k == 0 {
            return Err(invalid("top_k", self.top_k, "must be at least 1"));
        }

        if self.worker_pool_size == 0 {
            return Err(invalid(
                "worker_pool_size",
                self.worker_pool_size,
                "must be at least 1",
            ));
        }

        if self.catalog_timeout_ms == 0 {
            return Err(invalid(
                "catalog_timeout_ms",
                self.catalog_timeout_ms,
                "must be greater than 0",
            ));
        }

        if self.analysis_timeout_ms == 0 {
            return Err(invalid(
                "analysis_timeout_ms",
                self.analysis_timeout_ms,
                "must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `BRONZELINE_ACCEPTANCE_THRESHOLD` (default: 0.85)
    /// - `BRONZELINE_TIE_EPSILON` (default: 0.02)
    /// - `BRONZELINE_TOP_K` (default: 1)
    /// - `BRONZELINE_WORKER_POOL_SIZE` (default: 8)
    /// - `BRONZELINE_CATALOG_TIMEOUT_MS` (default: 30000)
    /// - `BRONZELINE_ANALYSIS_TIMEOUT_MS` (default: 120000)
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `BRONZELINE_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Self {
        Self {
            acceptance_threshold: env_or("BRONZELINE_ACCEPTANCE_THRESHOLD", self.acceptance_threshold),
            tie_epsilon: env_or("BRONZELINE_TIE_EPSILON", self.tie_epsilon),
            top_k: env_or("BRONZELINE_TOP_K", self.top_k),
            worker_pool_size: env_or("BRONZELINE_WORKER_POOL_SIZE", self.worker_pool_size),
            catalog_timeout_ms: env_or("BRONZELINE_CATALOG_TIMEOUT_MS", self.catalog_timeout_ms),
            analysis_timeout_ms: env_or("BRONZELINE_ANALYSIS_TIMEOUT_MS", self.analysis_timeout_ms),
            ..self
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(fallback)
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> LineageError {
    LineageError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

// ============================================================================
// CONNECTIONS
// ============================================================================

/// One configured database endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    pub alias: ConnectionAlias,
    pub tier: Tier,
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub database: String,
    /// Schema new stage tables land in for this source.
    #[serde(default)]
    pub default_stage_schema: Option<String>,
    /// Prefix applied to stage table names for this source.
    #[serde(default)]
    pub stage_table_prefix: Option<String>,
}

/// Registered connections keyed by alias.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionAlias, ConnectionConfig>,
}

impl ConnectionRegistry {
    pub fn new(connections: impl IntoIterator<Item = ConnectionConfig>) -> LineageResult<Self> {
        let mut map = BTreeMap::new();
        for connection in connections {
            let alias = connection.alias.clone();
            if map.insert(alias.clone(), connection).is_some() {
                return Err(LineageError::Config(ConfigError::InvalidValue {
                    field: "connections.alias".to_string(),
                    value: alias.to_string(),
                    reason: "alias registered more than once".to_string(),
                }));
            }
        }
        Ok(Self { connections: map })
    }

    pub fn resolve(&self, alias: &str) -> Result<&ConnectionConfig, ValidationError> {
        self.connections
            .get(alias)
            .ok_or_else(|| ValidationError::UnknownAlias {
                alias: alias.to_string(),
            })
    }

    /// Resolve `alias` and check it belongs to `tier`.
    pub fn require_tier(&self, alias: &str, tier: Tier) -> Result<&ConnectionConfig, ValidationError> {
        let config = self.resolve(alias)?;
        if config.tier != tier {
            return Err(ValidationError::TierMismatch {
                alias: alias.to_string(),
                expected: tier.to_string(),
                actual: config.tier.to_string(),
            });
        }
        Ok(config)
    }

    /// Aliases registered for `tier`, in alias order.
    pub fn aliases_for(&self, tier: Tier) -> Vec<ConnectionAlias> {
        self.connections
            .values()
            .filter(|c| c.tier == tier)
            .map(|c| c.alias.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionConfig> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
