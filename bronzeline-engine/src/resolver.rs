//! Mapping resolution: discover, suggest, auto-map and confirm tier mappings.

use crate::catalog::CatalogAdapter;
use crate::matcher::{column_overlap, rank, select_top, RankedTable, StageConvention};
use crate::ItemFailure;
use bronzeline_core::{
    CatalogError, ColumnRef, ConnectionAlias, ConnectionRegistry, EngineConfig, ErrorKind,
    LineageError, LineageResult, Mapping, MappingInput, MappingTier, Provenance, TableRef,
    ValidationError,
};
use bronzeline_storage::{BulkUpsertSummary, ConfirmMode, ConfirmOutcome, MappingStore};
use futures_util::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// ============================================================================
// REQUEST / REPORT TYPES
// ============================================================================

/// Candidates across every connection of a tier, with the connections that
/// could not be listed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuggestReport {
    pub candidates: Vec<Mapping>,
    pub failures: Vec<ItemFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoMapReport {
    pub created_count: usize,
    pub updated_count: usize,
    /// Number of `from` tables examined.
    pub total_considered: usize,
    pub candidates_recorded: usize,
    /// Tables whose best match cleared the threshold but tied with another.
    pub skipped_ambiguous: usize,
    pub failures: Vec<ItemFailure>,
}

/// A caller's request to confirm (or promote) one mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub tier: MappingTier,
    pub from: TableRef,
    pub to: TableRef,
    #[serde(default)]
    pub provenance: Provenance,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Replace a confirmed mapping to a different target.
    #[serde(default)]
    pub overwrite: bool,
}

/// A table with its columns, as listed from the catalog.
#[derive(Debug, Clone)]
struct CatalogTable {
    table: TableRef,
    columns: Vec<ColumnRef>,
}

enum AutoMapStep {
    Created,
    Updated,
    Unchanged,
    Skipped,
    Recorded { count: usize, ambiguous: bool },
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Proposes and persists mappings between adjacent tiers.
pub struct MappingResolver {
    catalog: Arc<dyn CatalogAdapter>,
    store: Arc<dyn MappingStore>,
    registry: Arc<ConnectionRegistry>,
    config: EngineConfig,
}

impl MappingResolver {
    pub fn new(
        catalog: Arc<dyn CatalogAdapter>,
        store: Arc<dyn MappingStore>,
        registry: Arc<ConnectionRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            registry,
            config,
        }
    }

    /// Ranked candidates from every table of `from_alias` to the tables of
    /// `to_alias`. Nothing is persisted.
    pub async fn discover_candidates(&self, from_alias: &str, to_alias: &str) -> LineageResult<Vec<Mapping>> {
        let from = self.registry.resolve(from_alias)?;
        let to = self.registry.resolve(to_alias)?;
        let tier = MappingTier::between(from.tier, to.tier).ok_or_else(|| ValidationError::InvalidValue {
            field: "to_alias".to_string(),
            reason: format!(
                "no mapping tier from {} ({}) to {} ({})",
                from.alias, from.tier, to.alias, to.tier
            ),
        })?;

        let sources = self.load_connection(&from.alias).await?;
        let targets = self.load_connection(&to.alias).await?;
        let candidates = sources
            .iter()
            .flat_map(|source| self.top_candidates(tier, source, &targets))
            .collect::<Vec<_>>();

        tracing::debug!(%tier, from = %from.alias, to = %to.alias, count = candidates.len(), "Discovered candidates");
        Ok(candidates)
    }

    /// Ranked candidates across every connection registered for `tier`.
    pub async fn suggest(&self, tier: MappingTier) -> LineageResult<SuggestReport> {
        let (sources, targets, failures) = self.gather(tier).await;
        let candidates = sources
            .iter()
            .flat_map(|source| self.top_candidates(tier, source, &targets))
            .collect();
        Ok(SuggestReport { candidates, failures })
    }

    /// Confirm every unambiguous candidate at or above the acceptance
    /// threshold, and record the rest as candidates.
    pub async fn auto_map(&self, tier: MappingTier) -> LineageResult<AutoMapReport> {
        let (sources, targets, failures) = self.gather(tier).await;

        let steps: Vec<AutoMapStep> = stream::iter(0..sources.len())
            .map(|i| self.auto_map_one(tier, &sources[i], &targets))
            .buffer_unordered(self.config.worker_pool_size)
            .try_collect()
            .await?;

        let mut report = AutoMapReport {
            total_considered: sources.len(),
            failures,
            ..AutoMapReport::default()
        };
        for step in steps {
            match step {
                AutoMapStep::Created => report.created_count += 1,
                AutoMapStep::Updated => report.updated_count += 1,
                AutoMapStep::Unchanged | AutoMapStep::Skipped => {}
                AutoMapStep::Recorded { count, ambiguous } => {
                    report.candidates_recorded += count;
                    if ambiguous {
                        report.skipped_ambiguous += 1;
                    }
                }
            }
        }

        tracing::info!(
            %tier,
            created = report.created_count,
            updated = report.updated_count,
            considered = report.total_considered,
            ambiguous = report.skipped_ambiguous,
            failures = report.failures.len(),
            "Auto-map finished"
        );
        Ok(report)
    }

    async fn auto_map_one(
        &self,
        tier: MappingTier,
        source: &CatalogTable,
        targets: &[CatalogTable],
    ) -> LineageResult<AutoMapStep> {
        let ranked = self.ranked(tier, source, targets);
        let best = select_top(&ranked, 1, self.config.tie_epsilon);
        let above_threshold = best
            .first()
            .is_some_and(|b| b.score >= self.config.acceptance_threshold);

        if above_threshold && best.len() == 1 {
            let mapping = Mapping::confirmed(
                tier,
                source.table.clone(),
                best[0].table.clone(),
                best[0].score,
                Provenance::Auto,
            );
            return match self.store.confirm(mapping, ConfirmMode::RefreshAuto).await {
                Ok(ConfirmOutcome::Created { .. }) => Ok(AutoMapStep::Created),
                Ok(ConfirmOutcome::Replaced { .. }) => Ok(AutoMapStep::Updated),
                Ok(ConfirmOutcome::Unchanged { .. }) => Ok(AutoMapStep::Unchanged),
                Err(LineageError::Conflict(conflict)) => {
                    tracing::debug!(from = %source.table, %conflict, "Auto-map lost confirm race");
                    Ok(AutoMapStep::Skipped)
                }
                Err(e) => Err(e),
            };
        }

        let candidates = self.to_mappings(tier, source, &ranked);
        if candidates.is_empty() {
            return Ok(AutoMapStep::Skipped);
        }
        let count = candidates.len();
        // Refused when a confirmed mapping already owns the key.
        if !self.store.record_candidates(tier, &source.table, candidates).await? {
            return Ok(AutoMapStep::Skipped);
        }
        Ok(AutoMapStep::Recorded {
            count,
            ambiguous: above_threshold,
        })
    }

    /// Validate and persist one confirmation.
    pub async fn confirm_mapping(&self, request: ConfirmRequest) -> LineageResult<ConfirmOutcome> {
        self.validate_pair(request.tier, &request.from, &request.to)?;
        let confidence = request.confidence.unwrap_or(1.0);
        validate_confidence(confidence)?;

        let (from, to) = if self.config.verify_confirmed_tables {
            (
                self.catalog_table(&request.from).await?,
                self.catalog_table(&request.to).await?,
            )
        } else {
            (request.from, request.to)
        };

        let mut mapping = Mapping::confirmed(request.tier, from, to, confidence, request.provenance);
        mapping.notes = request.notes;
        let mode = if request.overwrite {
            ConfirmMode::Overwrite
        } else {
            ConfirmMode::IfAbsent
        };

        let outcome = self.store.confirm(mapping, mode).await?;
        tracing::info!(
            tier = %request.tier,
            from = %outcome.mapping().from,
            to = %outcome.mapping().to,
            provenance = %outcome.mapping().provenance,
            "Mapping confirmed"
        );
        Ok(outcome)
    }

    /// Validate a whole batch, then upsert it. Any invalid row rejects the batch.
    ///
    /// With `verify_confirmed_tables` set, every row is resolved to the
    /// catalog's own table references before it is stored.
    pub async fn bulk_upsert_mappings(&self, inputs: Vec<MappingInput>) -> LineageResult<BulkUpsertSummary> {
        let mut seen = HashSet::new();
        let mut listings: HashMap<ConnectionAlias, Vec<TableRef>> = HashMap::new();
        let mut mappings = Vec::with_capacity(inputs.len());

        for (index, mut input) in inputs.into_iter().enumerate() {
            let row_error = |e: LineageError| -> LineageError {
                match e.kind() {
                    ErrorKind::InvalidInput | ErrorKind::NotFound => ValidationError::InvalidValue {
                        field: format!("mappings[{}]", index),
                        reason: e.to_string(),
                    }
                    .into(),
                    _ => e,
                }
            };
            self.validate_pair(input.tier, &input.from, &input.to)
                .map_err(row_error)?;
            if let Some(confidence) = input.confidence {
                validate_confidence(confidence)
                    .map_err(LineageError::from)
                    .map_err(row_error)?;
            }
            if self.config.verify_confirmed_tables {
                input.from = self.listed_table(&mut listings, &input.from).await.map_err(row_error)?;
                input.to = self.listed_table(&mut listings, &input.to).await.map_err(row_error)?;
            }
            if !seen.insert((input.tier, input.from.clone())) {
                return Err(ValidationError::InvalidValue {
                    field: format!("mappings[{}]", index),
                    reason: format!("{} appears more than once for {}", input.from, input.tier),
                }
                .into());
            }
            mappings.push(input.into_confirmed());
        }

        let summary = self.store.bulk_upsert(mappings).await?;
        tracing::info!(
            inserted = summary.inserted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            "Bulk mapping upsert"
        );
        Ok(summary)
    }

    pub async fn list_mappings(&self, tier: MappingTier) -> LineageResult<Vec<Mapping>> {
        self.store.list_confirmed(tier).await
    }

    pub async fn list_candidates(&self, tier: MappingTier) -> LineageResult<Vec<Mapping>> {
        self.store.list_candidates(tier).await
    }

    /// Remove a confirmed mapping. Returns whether one existed.
    pub async fn delete_mapping(&self, tier: MappingTier, from: &TableRef) -> LineageResult<bool> {
        let deleted = self.store.delete_confirmed(tier, from).await?;
        if deleted {
            tracing::info!(%tier, %from, "Mapping deleted");
        }
        Ok(deleted)
    }

    // ------------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------------

    fn validate_pair(&self, tier: MappingTier, from: &TableRef, to: &TableRef) -> LineageResult<()> {
        from.validate()?;
        to.validate()?;
        self.registry
            .require_tier(from.connection_alias.as_str(), tier.from_tier())?;
        self.registry
            .require_tier(to.connection_alias.as_str(), tier.to_tier())?;
        Ok(())
    }

    /// The catalog's own reference for `table`, matching schema and table
    /// case-insensitively and the database when one is given.
    async fn catalog_table(&self, table: &TableRef) -> LineageResult<TableRef> {
        let tables = self.catalog.list_tables(&table.connection_alias).await?;
        find_listed(&tables, table)
    }

    /// `catalog_table` over a per-batch cache of table listings.
    async fn listed_table(
        &self,
        listings: &mut HashMap<ConnectionAlias, Vec<TableRef>>,
        table: &TableRef,
    ) -> LineageResult<TableRef> {
        let alias = &table.connection_alias;
        if !listings.contains_key(alias) {
            let tables = self.catalog.list_tables(alias).await?;
            listings.insert(alias.clone(), tables);
        }
        find_listed(listings.get(alias).map(Vec::as_slice).unwrap_or_default(), table)
    }

    async fn load_connection(&self, alias: &ConnectionAlias) -> LineageResult<Vec<CatalogTable>> {
        let tables = self.catalog.list_tables(alias).await?;
        stream::iter(tables)
            .map(|table| async move {
                let columns = self.catalog.list_columns(alias, &table).await?;
                Ok::<_, LineageError>(CatalogTable { table, columns })
            })
            .buffered(self.config.worker_pool_size)
            .try_collect()
            .await
    }

    /// Tables on both sides of `tier`. A connection that fails to list is
    /// reported and skipped.
    async fn gather(&self, tier: MappingTier) -> (Vec<CatalogTable>, Vec<CatalogTable>, Vec<ItemFailure>) {
        let mut sources = Vec::new();
        let mut targets = Vec::new();
        let mut failures = Vec::new();

        let from_aliases = self.registry.aliases_for(tier.from_tier());
        let to_aliases = self.registry.aliases_for(tier.to_tier());
        let sides = from_aliases
            .into_iter()
            .map(|a| (true, a))
            .chain(to_aliases.into_iter().map(|a| (false, a)));

        let loaded: Vec<_> = stream::iter(sides)
            .map(|(is_source, alias)| async move {
                let result = self.load_connection(&alias).await;
                (is_source, alias, result)
            })
            .buffered(self.config.worker_pool_size)
            .collect()
            .await;

        for (is_source, alias, result) in loaded {
            match result {
                Ok(tables) if is_source => sources.extend(tables),
                Ok(tables) => targets.extend(tables),
                Err(e) => {
                    tracing::warn!(%tier, alias = %alias, error = %e, "Skipping connection");
                    failures.push(ItemFailure::from_error(alias.to_string(), &e));
                }
            }
        }
        (sources, targets, failures)
    }

    /// Stage naming convention of `source`'s connection. Only source to
    /// stage mappings have one.
    fn convention(&self, tier: MappingTier, source: &TableRef) -> StageConvention {
        match tier {
            MappingTier::SourceToStage => self
                .registry
                .resolve(source.connection_alias.as_str())
                .map(StageConvention::from_connection)
                .unwrap_or_default(),
            MappingTier::StageToBronze => StageConvention::default(),
        }
    }

    fn ranked(&self, tier: MappingTier, source: &CatalogTable, targets: &[CatalogTable]) -> Vec<RankedTable> {
        let convention = self.convention(tier, &source.table);
        let scored = targets
            .iter()
            .filter_map(|target| {
                let score = convention.score(&source.table, &target.table);
                (score > 0.0 && score >= self.config.min_candidate_score).then(|| RankedTable {
                    table: target.table.clone(),
                    score,
                    column_overlap: column_overlap(&source.columns, &target.columns),
                    exact_object: source.table.same_object_as(&target.table),
                    preferred_schema: convention.is_preferred_schema(&target.table),
                })
            })
            .collect();
        rank(scored, self.config.tie_epsilon)
    }

    fn to_mappings(&self, tier: MappingTier, source: &CatalogTable, ranked: &[RankedTable]) -> Vec<Mapping> {
        select_top(ranked, self.config.top_k, self.config.tie_epsilon)
            .iter()
            .map(|r| Mapping::candidate(tier, source.table.clone(), r.table.clone(), r.score))
            .collect()
    }

    fn top_candidates(&self, tier: MappingTier, source: &CatalogTable, targets: &[CatalogTable]) -> Vec<Mapping> {
        let ranked = self.ranked(tier, source, targets);
        self.to_mappings(tier, source, &ranked)
    }
}

fn find_listed(tables: &[TableRef], table: &TableRef) -> LineageResult<TableRef> {
    tables
        .iter()
        .find(|t| {
            t.same_object_as(table)
                && (table.database.is_empty() || t.database.eq_ignore_ascii_case(&table.database))
        })
        .cloned()
        .ok_or_else(|| {
            CatalogError::NotFound {
                alias: table.connection_alias.to_string(),
                object: table.qualified_name(),
            }
            .into()
        })
}

fn validate_confidence(confidence: f32) -> Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(ValidationError::InvalidValue {
            field: "confidence".to_string(),
            reason: format!("{} is outside [0, 1]", confidence),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use bronzeline_core::{ConnectionConfig, ErrorKind, SourceKind, Tier};
    use bronzeline_storage::InMemoryMappingStore;

    fn alias(name: &str) -> ConnectionAlias {
        ConnectionAlias::new(name).unwrap()
    }

    fn registry() -> Arc<ConnectionRegistry> {
        let conn = |name: &str, tier| ConnectionConfig {
            alias: alias(name),
            tier,
            kind: SourceKind::SqlServer,
            database: String::new(),
            default_stage_schema: None,
            stage_table_prefix: None,
        };
        Arc::new(
            ConnectionRegistry::new([
                conn("erp", Tier::Source),
                conn("stage", Tier::Stage),
                conn("bronze", Tier::Bronze),
            ])
            .unwrap(),
        )
    }

    fn catalog() -> Arc<StaticCatalog> {
        let catalog = StaticCatalog::new();
        let cols = || vec![("id", "int", false), ("name", "nvarchar", true)];
        catalog.insert_table(TableRef::new(alias("erp"), "", "orders", "customer_raw"), cols());
        catalog.insert_table(TableRef::new(alias("erp"), "", "orders", "invoices"), cols());
        catalog.insert_table(TableRef::new(alias("stage"), "", "stg", "customer"), cols());
        catalog.insert_table(TableRef::new(alias("stage"), "", "stg", "customer_raw"), cols());
        catalog.insert_table(TableRef::new(alias("stage"), "", "stg", "cust"), cols());
        catalog.add_connection(alias("bronze"));
        Arc::new(catalog)
    }

    fn resolver() -> (MappingResolver, Arc<InMemoryMappingStore>) {
        let store = Arc::new(InMemoryMappingStore::new());
        let resolver = MappingResolver::new(catalog(), store.clone(), registry(), EngineConfig::default());
        (resolver, store)
    }

    #[tokio::test]
    async fn test_discover_ranks_exact_name_first() {
        let (resolver, _) = resolver();
        let candidates = resolver.discover_candidates("erp", "stage").await.unwrap();
        let for_customer: Vec<_> = candidates
            .iter()
            .filter(|m| m.from.table == "customer_raw")
            .collect();
        assert_eq!(for_customer.len(), 1);
        assert_eq!(for_customer[0].to.table, "customer_raw");
        assert_eq!(for_customer[0].confidence, 1.0);
        assert_eq!(for_customer[0].tier, MappingTier::SourceToStage);
        assert!(!for_customer[0].is_confirmed());
    }

    #[tokio::test]
    async fn test_discover_rejects_non_adjacent_tiers() {
        let (resolver, _) = resolver();
        let err = resolver.discover_candidates("erp", "bronze").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err = resolver.discover_candidates("erp", "nowhere").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_auto_map_is_idempotent() {
        let (resolver, store) = resolver();
        let first = resolver.auto_map(MappingTier::SourceToStage).await.unwrap();
        assert_eq!(first.created_count, 1);
        assert_eq!(first.total_considered, 2);

        let second = resolver.auto_map(MappingTier::SourceToStage).await.unwrap();
        assert_eq!(second.created_count, 0);
        assert_eq!(second.updated_count, 0);
        assert_eq!(store.list_confirmed(MappingTier::SourceToStage).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_confirm_conflict_and_overwrite() {
        let (resolver, _) = resolver();
        let request = |to: &str, overwrite| ConfirmRequest {
            tier: MappingTier::SourceToStage,
            from: TableRef::new(alias("erp"), "", "orders", "invoices"),
            to: TableRef::new(alias("stage"), "", "stg", to),
            provenance: Provenance::Manual,
            confidence: None,
            notes: None,
            overwrite,
        };

        let created = resolver.confirm_mapping(request("customer", false)).await.unwrap();
        assert!(matches!(created, ConfirmOutcome::Created { .. }));
        let again = resolver.confirm_mapping(request("customer", false)).await.unwrap();
        assert!(matches!(again, ConfirmOutcome::Unchanged { .. }));
        let err = resolver.confirm_mapping(request("cust", false)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let replaced = resolver.confirm_mapping(request("cust", true)).await.unwrap();
        assert!(matches!(replaced, ConfirmOutcome::Replaced { .. }));
    }

    #[tokio::test]
    async fn test_confirm_checks_catalog_and_tiers() {
        let (resolver, _) = resolver();
        let missing = ConfirmRequest {
            tier: MappingTier::SourceToStage,
            from: TableRef::new(alias("erp"), "", "orders", "missing"),
            to: TableRef::new(alias("stage"), "", "stg", "customer"),
            provenance: Provenance::Promoted,
            confidence: Some(0.8),
            notes: None,
            overwrite: false,
        };
        let err = resolver.confirm_mapping(missing.clone()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let wrong_tier = ConfirmRequest {
            tier: MappingTier::StageToBronze,
            ..missing
        };
        let err = resolver.confirm_mapping(wrong_tier).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_bulk_upsert_rejects_whole_batch() {
        let (resolver, store) = resolver();
        let good = MappingInput {
            tier: MappingTier::SourceToStage,
            from: TableRef::new(alias("erp"), "", "orders", "invoices"),
            to: TableRef::new(alias("stage"), "", "stg", "cust"),
            confidence: None,
            provenance: None,
            notes: None,
        };
        let bad = MappingInput {
            confidence: Some(1.5),
            from: TableRef::new(alias("erp"), "", "orders", "customer_raw"),
            ..good.clone()
        };
        let err = resolver
            .bulk_upsert_mappings(vec![good.clone(), bad])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(store.list_confirmed(MappingTier::SourceToStage).await.unwrap().is_empty());

        let summary = resolver.bulk_upsert_mappings(vec![good]).await.unwrap();
        assert_eq!(summary.inserted, 1);
    }

    #[tokio::test]
    async fn test_bulk_upsert_rejects_duplicate_keys() {
        let (resolver, _) = resolver();
        let input = MappingInput {
            tier: MappingTier::SourceToStage,
            from: TableRef::new(alias("erp"), "", "orders", "invoices"),
            to: TableRef::new(alias("stage"), "", "stg", "cust"),
            confidence: None,
            provenance: None,
            notes: None,
        };
        let err = resolver
            .bulk_upsert_mappings(vec![input.clone(), input])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[tokio::test]
    async fn test_auto_map_follows_stage_convention() {
        let registry = Arc::new(
            ConnectionRegistry::new([
                ConnectionConfig {
                    alias: alias("erp"),
                    tier: Tier::Source,
                    kind: SourceKind::SqlServer,
                    database: String::new(),
                    default_stage_schema: Some("landing".to_string()),
                    stage_table_prefix: Some("sap_".to_string()),
                },
                ConnectionConfig {
                    alias: alias("stage"),
                    tier: Tier::Stage,
                    kind: SourceKind::SqlServer,
                    database: String::new(),
                    default_stage_schema: None,
                    stage_table_prefix: None,
                },
            ])
            .unwrap(),
        );
        let catalog = StaticCatalog::new();
        let cols = || vec![("id", "int", false), ("name", "nvarchar", true)];
        catalog.insert_table(TableRef::new(alias("erp"), "", "orders", "customer_raw"), cols());
        catalog.insert_table(TableRef::new(alias("erp"), "", "orders", "invoices"), cols());
        catalog.insert_table(TableRef::new(alias("stage"), "", "stg", "sap_customer_raw"), cols());
        catalog.insert_table(TableRef::new(alias("stage"), "", "stg", "sap_invoices"), cols());
        catalog.insert_table(TableRef::new(alias("stage"), "", "landing", "sap_invoices"), cols());

        let store = Arc::new(InMemoryMappingStore::new());
        let resolver = MappingResolver::new(Arc::new(catalog), store.clone(), registry, EngineConfig::default());
        let report = resolver.auto_map(MappingTier::SourceToStage).await.unwrap();
        assert_eq!(report.created_count, 2);
        assert_eq!(report.skipped_ambiguous, 0);

        let customer = store
            .get_confirmed(MappingTier::SourceToStage, &TableRef::new(alias("erp"), "", "orders", "customer_raw"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(customer.to.table, "sap_customer_raw");
        assert_eq!(customer.confidence, 1.0);

        let invoices = store
            .get_confirmed(MappingTier::SourceToStage, &TableRef::new(alias("erp"), "", "orders", "invoices"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(invoices.to.schema, "landing");
    }

    #[tokio::test]
    async fn test_delete_mapping() {
        let (resolver, _) = resolver();
        resolver.auto_map(MappingTier::SourceToStage).await.unwrap();
        let from = TableRef::new(alias("erp"), "", "orders", "customer_raw");
        assert!(resolver.delete_mapping(MappingTier::SourceToStage, &from).await.unwrap());
        assert!(!resolver.delete_mapping(MappingTier::SourceToStage, &from).await.unwrap());
    }
}
