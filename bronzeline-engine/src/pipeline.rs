//! Pipeline orchestrator: the single entry point callers use.

use crate::catalog::{CatalogAdapter, TimedCatalog};
use crate::resolver::{AutoMapReport, ConfirmRequest, MappingResolver, SuggestReport};
use crate::tracker::{LineageTracker, ProcedureStatus};
use crate::ItemFailure;
use bronzeline_core::{
    AnalysisOutcome, CatalogError, ColumnRef, ConnectionAlias, ConnectionConfig,
    ConnectionRegistry, EngineConfig, LineageRecord, LineageResult, LineageStatus, Mapping,
    MappingInput, MappingTier, ProcedureDefinition, ProcedureIdentity, TableRef,
};
use bronzeline_llm::LineageAnalyzer;
use bronzeline_storage::{BulkUpsertSummary, ConfirmOutcome, LineageStore, MappingStore};
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

/// Per-procedure result of a bulk analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProcedureResult {
    Analyzed {
        procedure_name: String,
        cached: bool,
        parse_fallback: bool,
        summary: String,
    },
    Failed {
        procedure_name: String,
        failure: ItemFailure,
    },
}

impl ProcedureResult {
    pub fn procedure_name(&self) -> &str {
        match self {
            ProcedureResult::Analyzed { procedure_name, .. } | ProcedureResult::Failed { procedure_name, .. } => {
                procedure_name
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkAnalyzeReport {
    pub connection_alias: ConnectionAlias,
    pub schema: Option<String>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Successes served from cache without an analysis call.
    pub cached_count: usize,
    /// Successes whose response was unparseable and stored the fallback summary.
    pub fallback_count: usize,
    /// Ordered by procedure name.
    pub results: Vec<ProcedureResult>,
}

/// Composes the catalog, resolver and lineage tracker.
pub struct LineagePipeline {
    catalog: Arc<dyn CatalogAdapter>,
    registry: Arc<ConnectionRegistry>,
    resolver: MappingResolver,
    tracker: LineageTracker,
    config: EngineConfig,
}

impl LineagePipeline {
    /// Build a pipeline. Every catalog call is bounded by
    /// `config.catalog_timeout_ms`.
    pub fn new(
        catalog: Arc<dyn CatalogAdapter>,
        mapping_store: Arc<dyn MappingStore>,
        lineage_store: Arc<dyn LineageStore>,
        analyzer: Arc<dyn LineageAnalyzer>,
        registry: ConnectionRegistry,
        config: EngineConfig,
    ) -> LineageResult<Self> {
        config.validate()?;
        let catalog: Arc<dyn CatalogAdapter> = Arc::new(TimedCatalog::new(catalog, config.catalog_timeout()));
        let registry = Arc::new(registry);
        let resolver = MappingResolver::new(catalog.clone(), mapping_store, registry.clone(), config.clone());
        let tracker = LineageTracker::new(
            lineage_store,
            analyzer,
            config.in_flight_policy,
            config.analysis_timeout(),
        );
        Ok(Self {
            catalog,
            registry,
            resolver,
            tracker,
            config,
        })
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // catalog
    // ------------------------------------------------------------------------

    /// Registered connections, ordered by alias.
    pub fn connections(&self) -> Vec<ConnectionConfig> {
        self.registry.iter().cloned().collect()
    }

    #[instrument(skip(self))]
    pub async fn list_tables(&self, alias: &str) -> LineageResult<Vec<TableRef>> {
        let alias = &self.registry.resolve(alias)?.alias;
        let mut tables = self.catalog.list_tables(alias).await?;
        tables.sort();
        Ok(tables)
    }

    /// Columns of `schema.table` on `alias`, matched case-insensitively.
    #[instrument(skip(self))]
    pub async fn list_columns(&self, alias: &str, schema: &str, table: &str) -> LineageResult<Vec<ColumnRef>> {
        let alias = &self.registry.resolve(alias)?.alias;
        let wanted = TableRef::new(alias.clone(), "", schema, table);
        wanted.validate()?;
        let listed = self
            .catalog
            .list_tables(alias)
            .await?
            .into_iter()
            .find(|t| t.same_object_as(&wanted))
            .ok_or_else(|| CatalogError::NotFound {
                alias: alias.to_string(),
                object: wanted.qualified_name(),
            })?;
        self.catalog.list_columns(alias, &listed).await
    }

    // ------------------------------------------------------------------------
    // mappings
    // ------------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn discover_candidates(&self, from_alias: &str, to_alias: &str) -> LineageResult<Vec<Mapping>> {
        self.resolver.discover_candidates(from_alias, to_alias).await
    }

    #[instrument(skip(self))]
    pub async fn suggest(&self, tier: MappingTier) -> LineageResult<SuggestReport> {
        self.resolver.suggest(tier).await
    }

    #[instrument(skip(self))]
    pub async fn auto_map(&self, tier: MappingTier) -> LineageResult<AutoMapReport> {
        self.resolver.auto_map(tier).await
    }

    #[instrument(skip(self, request), fields(tier = %request.tier, from = %request.from))]
    pub async fn confirm_mapping(&self, request: ConfirmRequest) -> LineageResult<ConfirmOutcome> {
        self.resolver.confirm_mapping(request).await
    }

    #[instrument(skip(self, inputs), fields(count = inputs.len()))]
    pub async fn bulk_upsert_mappings(&self, inputs: Vec<MappingInput>) -> LineageResult<BulkUpsertSummary> {
        self.resolver.bulk_upsert_mappings(inputs).await
    }

    pub async fn list_mappings(&self, tier: MappingTier) -> LineageResult<Vec<Mapping>> {
        self.resolver.list_mappings(tier).await
    }

    pub async fn list_candidates(&self, tier: MappingTier) -> LineageResult<Vec<Mapping>> {
        self.resolver.list_candidates(tier).await
    }

    #[instrument(skip(self))]
    pub async fn delete_mapping(&self, tier: MappingTier, from: &TableRef) -> LineageResult<bool> {
        self.resolver.delete_mapping(tier, from).await
    }

    // ------------------------------------------------------------------------
    // lineage
    // ------------------------------------------------------------------------

    /// Analyze caller-supplied procedure text.
    #[instrument(skip(self, definition), fields(procedure = %identity))]
    pub async fn analyze(&self, identity: &ProcedureIdentity, definition: &str) -> LineageResult<AnalysisOutcome> {
        self.registry.resolve(identity.connection_alias.as_str())?;
        self.tracker.analyze(identity, definition).await
    }

    /// Analyze the procedure's current text as read from the catalog.
    #[instrument(skip(self), fields(procedure = %identity))]
    pub async fn analyze_procedure(&self, identity: &ProcedureIdentity) -> LineageResult<AnalysisOutcome> {
        self.registry.resolve(identity.connection_alias.as_str())?;
        identity.validate()?;
        let procedure = self.catalog.procedure_definition(identity).await?;
        self.tracker.analyze(identity, &procedure.definition).await
    }

    /// Status of every procedure on `alias`.
    #[instrument(skip(self))]
    pub async fn status_map(&self, alias: &str) -> LineageResult<BTreeMap<String, LineageStatus>> {
        let (alias, procedures) = self.procedures(alias, None).await?;
        self.tracker.status_map(&alias, &procedures).await
    }

    /// Procedures on `alias` (optionally one schema) with their status.
    #[instrument(skip(self))]
    pub async fn list_procedures(&self, alias: &str, schema: Option<&str>) -> LineageResult<Vec<ProcedureStatus>> {
        let (alias, procedures) = self.procedures(alias, schema).await?;
        self.tracker.statuses(&alias, &procedures).await
    }

    pub async fn lineage_record(&self, identity: &ProcedureIdentity) -> LineageResult<Option<LineageRecord>> {
        self.registry.resolve(identity.connection_alias.as_str())?;
        self.tracker.record(identity).await
    }

    /// Analyze every procedure of a schema (all schemas when `None`) over
    /// the worker pool. One procedure's failure never aborts the batch.
    #[instrument(skip(self))]
    pub async fn bulk_analyze(&self, alias: &str, schema: Option<&str>) -> LineageResult<BulkAnalyzeReport> {
        let (alias, procedures) = self.procedures(alias, schema).await?;

        let mut results: Vec<ProcedureResult> = stream::iter(procedures)
            .map(|procedure| async move {
                let procedure_name = procedure.identity.procedure_name.clone();
                match self.tracker.analyze(&procedure.identity, &procedure.definition).await {
                    Ok(outcome) => ProcedureResult::Analyzed {
                        procedure_name,
                        cached: outcome.cached,
                        parse_fallback: outcome.record.parse_fallback,
                        summary: outcome.record.summary,
                    },
                    Err(e) => {
                        tracing::warn!(procedure = %procedure.identity, error = %e, "Procedure analysis failed");
                        ProcedureResult::Failed {
                            failure: ItemFailure::from_error(procedure.identity.to_string(), &e),
                            procedure_name,
                        }
                    }
                }
            })
            .buffer_unordered(self.config.worker_pool_size)
            .collect()
            .await;
        results.sort_by(|a, b| a.procedure_name().cmp(b.procedure_name()));

        let mut report = BulkAnalyzeReport {
            connection_alias: alias,
            schema: schema.map(str::to_string),
            total: results.len(),
            succeeded: 0,
            failed: 0,
            cached_count: 0,
            fallback_count: 0,
            results: Vec::new(),
        };
        for result in &results {
            match result {
                ProcedureResult::Analyzed {
                    cached, parse_fallback, ..
                } => {
                    report.succeeded += 1;
                    report.cached_count += usize::from(*cached);
                    report.fallback_count += usize::from(*parse_fallback);
                }
                ProcedureResult::Failed { .. } => report.failed += 1,
            }
        }
        report.results = results;

        tracing::info!(
            alias = %report.connection_alias,
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            cached = report.cached_count,
            "Bulk analysis finished"
        );
        Ok(report)
    }

    async fn procedures(
        &self,
        alias: &str,
        schema: Option<&str>,
    ) -> LineageResult<(ConnectionAlias, Vec<ProcedureDefinition>)> {
        let alias = self.registry.resolve(alias)?.alias.clone();
        let procedures = self.catalog.list_procedures(&alias, schema).await?;
        Ok((alias, procedures))
    }
}
