//! Lineage cache and staleness tracking keyed by procedure identity.

use bronzeline_core::{
    content_hash, AnalysisError, AnalysisOutcome, ConflictError, ConnectionAlias, InFlightPolicy,
    LineageRecord, LineageResult, LineageStatus, ProcedureDefinition, ProcedureIdentity,
};
use bronzeline_llm::{AnalysisRequest, LineageAnalyzer};
use bronzeline_storage::LineageStore;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Current status of one procedure on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureStatus {
    pub procedure_name: String,
    pub schema: String,
    pub status: LineageStatus,
}

/// Serves cached lineage while the procedure text is unchanged and
/// re-analyzes it when the text hash moves.
pub struct LineageTracker {
    store: Arc<dyn LineageStore>,
    analyzer: Arc<dyn LineageAnalyzer>,
    in_flight: DashMap<ProcedureIdentity, Arc<Mutex<()>>>,
    policy: InFlightPolicy,
    analysis_timeout: Duration,
}

/// Removes the identity's lock from the in-flight map once no other caller
/// holds it.
struct InFlightSlot<'a> {
    in_flight: &'a DashMap<ProcedureIdentity, Arc<Mutex<()>>>,
    identity: &'a ProcedureIdentity,
    lock: Arc<Mutex<()>>,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        // One reference in the map, one here.
        self.in_flight.remove_if(self.identity, |_, held| {
            Arc::ptr_eq(held, &self.lock) && Arc::strong_count(held) == 2
        });
    }
}

impl LineageTracker {
    pub fn new(
        store: Arc<dyn LineageStore>,
        analyzer: Arc<dyn LineageAnalyzer>,
        policy: InFlightPolicy,
        analysis_timeout: Duration,
    ) -> Self {
        Self {
            store,
            analyzer,
            in_flight: DashMap::new(),
            policy,
            analysis_timeout,
        }
    }

    /// Return lineage for `definition`, analyzing only when no stored record
    /// carries the same text hash.
    pub async fn analyze(&self, identity: &ProcedureIdentity, definition: &str) -> LineageResult<AnalysisOutcome> {
        identity.validate()?;
        let hash = content_hash(definition);

        if let Some(record) = self.cached(identity, &hash).await? {
            tracing::debug!(procedure = %identity, "Lineage served from cache");
            return Ok(AnalysisOutcome { record, cached: true });
        }

        let slot = InFlightSlot {
            in_flight: &self.in_flight,
            identity,
            lock: self.in_flight.entry(identity.clone()).or_default().clone(),
        };
        let _guard = match self.policy {
            InFlightPolicy::Wait => slot.lock.clone().lock_owned().await,
            InFlightPolicy::Reject => slot.lock.clone().try_lock_owned().map_err(|_| {
                ConflictError::AnalysisInFlight {
                    identity: identity.to_string(),
                }
            })?,
        };

        // A caller that held the lock before us may have stored this hash.
        if let Some(record) = self.cached(identity, &hash).await? {
            tracing::debug!(procedure = %identity, "Lineage served from cache after wait");
            return Ok(AnalysisOutcome { record, cached: true });
        }

        let request = AnalysisRequest {
            identity: identity.clone(),
            definition: definition.to_string(),
        };
        let analysis = match tokio::time::timeout(self.analysis_timeout, self.analyzer.analyze(&request)).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(procedure = %identity, provider = self.analyzer.provider_name(), "Analysis timed out");
                return Err(AnalysisError::Timeout {
                    procedure: identity.to_string(),
                    timeout_ms: self.analysis_timeout.as_millis() as u64,
                }
                .into());
            }
        };

        let record = LineageRecord {
            procedure_identity: identity.clone(),
            source_definition_hash: hash,
            summary: analysis.summary,
            target_table: analysis.target_table,
            column_mappings: analysis.column_mappings,
            computed_at: Utc::now(),
            parse_fallback: analysis.parse_fallback,
        };
        self.store.put(record.clone()).await?;

        tracing::info!(
            procedure = %identity,
            columns = record.column_mappings.len(),
            parse_fallback = record.parse_fallback,
            "Lineage analyzed"
        );
        Ok(AnalysisOutcome { record, cached: false })
    }

    async fn cached(&self, identity: &ProcedureIdentity, hash: &str) -> LineageResult<Option<LineageRecord>> {
        Ok(self
            .store
            .get(identity)
            .await?
            .filter(|record| record.source_definition_hash == hash))
    }

    /// Status of every procedure in `definitions`, from one batch read of
    /// the stored hashes for `alias`.
    pub async fn statuses(
        &self,
        alias: &ConnectionAlias,
        definitions: &[ProcedureDefinition],
    ) -> LineageResult<Vec<ProcedureStatus>> {
        let stored = self.store.hashes_for(alias.as_str()).await?;
        Ok(definitions
            .iter()
            .map(|procedure| {
                let name = &procedure.identity.procedure_name;
                ProcedureStatus {
                    procedure_name: name.clone(),
                    schema: procedure.schema.clone(),
                    status: LineageStatus::derive(
                        stored.get(name).map(String::as_str),
                        &content_hash(&procedure.definition),
                    ),
                }
            })
            .collect())
    }

    /// Procedure name to status for `definitions`.
    pub async fn status_map(
        &self,
        alias: &ConnectionAlias,
        definitions: &[ProcedureDefinition],
    ) -> LineageResult<BTreeMap<String, LineageStatus>> {
        Ok(self
            .statuses(alias, definitions)
            .await?
            .into_iter()
            .map(|s| (s.procedure_name, s.status))
            .collect())
    }

    pub async fn record(&self, identity: &ProcedureIdentity) -> LineageResult<Option<LineageRecord>> {
        self.store.get(identity).await
    }

    /// Identities with an analysis currently holding or waiting on the lock.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}
