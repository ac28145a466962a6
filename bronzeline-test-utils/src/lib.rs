//! Bronzeline Test Utilities
//!
//! Shared test infrastructure for the Bronzeline workspace:
//! - Recording analyzer and failing catalog doubles
//! - Warehouse fixtures and a ready-made pipeline harness
//! - Proptest generators for tables, mappings and procedures
//! - Assertions on error classification and lineage status

pub use bronzeline_core::{
    content_hash, AnalysisError, CatalogError, ConnectionAlias, ConnectionConfig,
    ConnectionRegistry, EngineConfig, ErrorKind, InFlightPolicy, LineageError, LineageResult,
    LineageStatus, Mapping, MappingTier, ProcedureDefinition, ProcedureIdentity, Provenance,
    SourceKind, TableRef, Tier,
};
pub use bronzeline_engine::{CatalogAdapter, LineagePipeline, StaticCatalog};
pub use bronzeline_storage::{InMemoryLineageStore, InMemoryMappingStore};

use async_trait::async_trait;
use bronzeline_core::{ColumnRef, ColumnMapping, TransformationKind};
use bronzeline_llm::{
    parse_lineage_response, AnalysisRequest, LineageAnalysis, LineageAnalyzer,
    DEFAULT_FALLBACK_SUMMARY,
};
use dashmap::{DashMap, DashSet};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// RECORDING ANALYZER
// ============================================================================

/// Analyzer double that counts calls and can be told to fail, stall or
/// return a canned raw response per procedure.
#[derive(Debug, Default)]
pub struct RecordingAnalyzer {
    calls: AtomicUsize,
    calls_by_procedure: DashMap<String, usize>,
    failing: DashSet<String>,
    responses: DashMap<String, String>,
    delay: Duration,
}

impl RecordingAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every call for `procedure_name` with a retryable provider error.
    pub fn failing_for(self, procedure_name: impl Into<String>) -> Self {
        self.failing.insert(procedure_name.into());
        self
    }

    /// Answer `procedure_name` with `raw` as the model's text, run through
    /// the real response parser.
    pub fn with_response(self, procedure_name: impl Into<String>, raw: impl Into<String>) -> Self {
        self.responses.insert(procedure_name.into(), raw.into());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, procedure_name: &str) -> usize {
        self.calls_by_procedure
            .get(procedure_name)
            .map(|c| *c)
            .unwrap_or(0)
    }

    fn default_analysis(request: &AnalysisRequest) -> LineageAnalysis {
        let alias = request.identity.connection_alias.clone();
        let source = TableRef::new(alias.clone(), "", "dbo", "source_table");
        LineageAnalysis {
            summary: format!(
                "Analyzed {} ({} chars).",
                request.identity.procedure_name,
                request.definition.len()
            ),
            target_table: Some(TableRef::new(alias, "", "stg", "target_table")),
            column_mappings: vec![ColumnMapping {
                target_column: "id".to_string(),
                source_expression: "id".to_string(),
                source_tables: BTreeSet::from([source]),
                transformation_kind: TransformationKind::Direct,
            }],
            parse_fallback: false,
        }
    }
}

#[async_trait]
impl LineageAnalyzer for RecordingAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> LineageResult<LineageAnalysis> {
        let name = request.identity.procedure_name.clone();
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.calls_by_procedure.entry(name.clone()).or_insert(0) += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.contains(&name) {
            return Err(AnalysisError::RequestFailed {
                provider: "recording".to_string(),
                status: 502,
                message: format!("analysis of {} failed", name),
            }
            .into());
        }
        if let Some(raw) = self.responses.get(&name) {
            return Ok(parse_lineage_response(
                raw.value(),
                &request.identity.connection_alias,
                DEFAULT_FALLBACK_SUMMARY,
            ));
        }
        Ok(Self::default_analysis(request))
    }

    fn provider_name(&self) -> &str {
        "recording"
    }
}

// ============================================================================
// FAILING CATALOG
// ============================================================================

/// Catalog wrapper that makes chosen connections unreachable or slow.
pub struct FailingCatalog {
    inner: Arc<dyn CatalogAdapter>,
    unreachable: DashSet<ConnectionAlias>,
    stalled: DashMap<ConnectionAlias, Duration>,
}

impl FailingCatalog {
    pub fn new(inner: Arc<dyn CatalogAdapter>) -> Self {
        Self {
            inner,
            unreachable: DashSet::new(),
            stalled: DashMap::new(),
        }
    }

    /// Every call for `alias` fails with `ConnectionFailed`.
    pub fn fail_alias(&self, alias: &ConnectionAlias) {
        self.unreachable.insert(alias.clone());
    }

    /// Every call for `alias` sleeps for `delay` first.
    pub fn stall_alias(&self, alias: &ConnectionAlias, delay: Duration) {
        self.stalled.insert(alias.clone(), delay);
    }

    pub fn heal(&self, alias: &ConnectionAlias) {
        self.unreachable.remove(alias);
        self.stalled.remove(alias);
    }

    async fn gate(&self, alias: &ConnectionAlias) -> LineageResult<()> {
        let delay = self.stalled.get(alias).map(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.contains(alias) {
            return Err(CatalogError::ConnectionFailed {
                alias: alias.to_string(),
                reason: "connection refused".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogAdapter for FailingCatalog {
    async fn list_tables(&self, alias: &ConnectionAlias) -> LineageResult<Vec<TableRef>> {
        self.gate(alias).await?;
        self.inner.list_tables(alias).await
    }

    async fn list_columns(&self, alias: &ConnectionAlias, table: &TableRef) -> LineageResult<Vec<ColumnRef>> {
        self.gate(alias).await?;
        self.inner.list_columns(alias, table).await
    }

    async fn list_procedures(
        &self,
        alias: &ConnectionAlias,
        schema: Option<&str>,
    ) -> LineageResult<Vec<ProcedureDefinition>> {
        self.gate(alias).await?;
        self.inner.list_procedures(alias, schema).await
    }

    async fn procedure_definition(&self, identity: &ProcedureIdentity) -> LineageResult<ProcedureDefinition> {
        self.gate(&identity.connection_alias).await?;
        self.inner.procedure_definition(identity).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Bronzeline types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_alias() -> impl Strategy<Value = ConnectionAlias> {
        "[a-z][a-z0-9_]{1,11}".prop_map(|s| fixtures::alias(&s))
    }

    /// Table names in the shapes warehouses actually use.
    pub fn arb_table_name() -> impl Strategy<Value = String> {
        let word = "[a-z]{2,8}";
        prop_oneof![
            prop::collection::vec(word, 1..4).prop_map(|w| w.join("_")),
            prop::collection::vec(word, 1..4).prop_map(|w| {
                w.iter()
                    .map(|part| {
                        let mut chars = part.chars();
                        match chars.next() {
                            Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                            None => String::new(),
                        }
                    })
                    .collect::<String>()
            }),
            (prop::sample::select(vec!["stg_", "src_", "brz_", ""]), word)
                .prop_map(|(prefix, w)| format!("{}{}", prefix, w)),
        ]
    }

    pub fn arb_table_ref(alias: ConnectionAlias) -> impl Strategy<Value = TableRef> {
        (prop::sample::select(vec!["dbo", "stg", "brz", "sales"]), arb_table_name())
            .prop_map(move |(schema, table)| TableRef::new(alias.clone(), "", schema, table))
    }

    pub fn arb_mapping_tier() -> impl Strategy<Value = MappingTier> {
        prop_oneof![Just(MappingTier::SourceToStage), Just(MappingTier::StageToBronze)]
    }

    pub fn arb_provenance() -> impl Strategy<Value = Provenance> {
        prop_oneof![
            Just(Provenance::Manual),
            Just(Provenance::Auto),
            Just(Provenance::Promoted),
        ]
    }

    /// A confirmed mapping between the fixture connections of its tier.
    pub fn arb_confirmed_mapping() -> impl Strategy<Value = Mapping> {
        (arb_mapping_tier(), arb_provenance(), 0.0f32..=1.0f32)
            .prop_flat_map(|(tier, provenance, confidence)| {
                let (from_alias, to_alias) = fixtures::tier_aliases(tier);
                (arb_table_ref(from_alias), arb_table_ref(to_alias)).prop_map(move |(from, to)| {
                    Mapping::confirmed(tier, from, to, confidence, provenance)
                })
            })
    }

    pub fn arb_procedure_definition(alias: ConnectionAlias) -> impl Strategy<Value = ProcedureDefinition> {
        ("usp_[a-z]{3,12}", "[ -~]{0,200}").prop_map(move |(name, body)| {
            fixtures::procedure(&alias, "dbo", &name, &format!("CREATE PROCEDURE dbo.{} AS {}", name, body))
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built warehouse fixtures.
    //!
    //! Connections: `erp` and `crm` (source), `conn1` (source, holds the
    //! procedures), `stage` (stage) and `bronze` (bronze).

    use super::*;
    use bronzeline_engine::ItemFailure;

    pub fn alias(name: &str) -> ConnectionAlias {
        ConnectionAlias::new(name).expect("fixture alias is valid")
    }

    pub fn table(alias_name: &str, schema: &str, name: &str) -> TableRef {
        TableRef::new(alias(alias_name), "", schema, name)
    }

    pub fn connection(alias_name: &str, tier: Tier) -> ConnectionConfig {
        ConnectionConfig {
            alias: alias(alias_name),
            tier,
            kind: SourceKind::SqlServer,
            database: String::new(),
            default_stage_schema: None,
            stage_table_prefix: None,
        }
    }

    /// The `from` and `to` fixture connection for a tier.
    pub fn tier_aliases(tier: MappingTier) -> (ConnectionAlias, ConnectionAlias) {
        match tier {
            MappingTier::SourceToStage => (alias("erp"), alias("stage")),
            MappingTier::StageToBronze => (alias("stage"), alias("bronze")),
        }
    }

    pub fn warehouse_registry() -> ConnectionRegistry {
        ConnectionRegistry::new([
            connection("erp", Tier::Source),
            connection("crm", Tier::Source),
            connection("conn1", Tier::Source),
            connection("stage", Tier::Stage),
            connection("bronze", Tier::Bronze),
        ])
        .expect("fixture aliases are unique")
    }

    pub fn procedure(alias: &ConnectionAlias, schema: &str, name: &str, definition: &str) -> ProcedureDefinition {
        ProcedureDefinition {
            identity: ProcedureIdentity::new(alias.clone(), name),
            schema: schema.to_string(),
            definition: definition.to_string(),
        }
    }

    /// Tables across all tiers plus five procedures `p1`..`p5` in
    /// `conn1.dbo` and one in `conn1.etl`.
    pub fn warehouse_catalog() -> StaticCatalog {
        let catalog = StaticCatalog::new();
        let key_cols = |extra: &'static str| {
            vec![
                ("customer_id", "int", false),
                ("name", "nvarchar", true),
                (extra, "nvarchar", true),
            ]
        };

        catalog.insert_table(table("erp", "orders", "customer_raw"), key_cols("region"));
        catalog.insert_table(table("erp", "orders", "invoices"), key_cols("amount"));
        catalog.insert_table(table("crm", "dbo", "Contacts"), key_cols("email"));

        catalog.insert_table(table("stage", "stg", "customer"), key_cols("load_ts"));
        catalog.insert_table(table("stage", "stg", "customer_raw"), key_cols("region"));
        catalog.insert_table(table("stage", "stg", "cust"), key_cols("load_ts"));
        catalog.insert_table(table("stage", "stg", "stg_contacts"), key_cols("email"));
        catalog.insert_table(table("stage", "stg", "invoice"), key_cols("amount"));

        catalog.insert_table(table("bronze", "brz", "customer_raw"), key_cols("region"));
        catalog.insert_table(table("bronze", "brz", "contact"), key_cols("email"));

        let conn1 = alias("conn1");
        catalog.add_connection(conn1.clone());
        for i in 1..=5 {
            let name = format!("p{}", i);
            catalog.upsert_procedure(procedure(
                &conn1,
                "dbo",
                &name,
                &format!("CREATE PROCEDURE dbo.{} AS INSERT INTO stg.t{} SELECT * FROM dbo.s{}", name, i, i),
            ));
        }
        catalog.upsert_procedure(procedure(&conn1, "etl", "usp_extract", "CREATE PROCEDURE etl.usp_extract AS SELECT 1"));
        catalog
    }

    /// Engine settings for tests: small pool and short timeouts.
    pub fn test_config() -> EngineConfig {
        EngineConfig {
            worker_pool_size: 4,
            catalog_timeout_ms: 500,
            analysis_timeout_ms: 500,
            ..EngineConfig::default()
        }
    }

    /// A pipeline over the warehouse fixtures with handles on every double.
    pub struct Harness {
        pub pipeline: LineagePipeline,
        pub catalog: Arc<StaticCatalog>,
        pub faults: Arc<FailingCatalog>,
        pub analyzer: Arc<RecordingAnalyzer>,
        pub mappings: Arc<InMemoryMappingStore>,
        pub lineage: Arc<InMemoryLineageStore>,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::with(RecordingAnalyzer::new(), test_config())
        }

        pub fn with(analyzer: RecordingAnalyzer, config: EngineConfig) -> Self {
            let catalog = Arc::new(warehouse_catalog());
            let faults = Arc::new(FailingCatalog::new(catalog.clone()));
            let analyzer = Arc::new(analyzer);
            let mappings = Arc::new(InMemoryMappingStore::new());
            let lineage = Arc::new(InMemoryLineageStore::new());
            let pipeline = LineagePipeline::new(
                faults.clone(),
                mappings.clone(),
                lineage.clone(),
                analyzer.clone(),
                warehouse_registry(),
                config,
            )
            .expect("test config is valid");
            Self {
                pipeline,
                catalog,
                faults,
                analyzer,
                mappings,
                lineage,
            }
        }

        /// Replace a `conn1` procedure's text as if it had been edited.
        pub fn edit_procedure(&self, name: &str, definition: &str) {
            self.catalog
                .upsert_procedure(procedure(&alias("conn1"), "dbo", name, definition));
        }
    }

    impl Default for Harness {
        fn default() -> Self {
            Self::new()
        }
    }

    /// The failure reported for `target`, if any.
    pub fn failure_for<'a>(failures: &'a [ItemFailure], target: &str) -> Option<&'a ItemFailure> {
        failures.iter().find(|f| f.target == target)
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on Bronzeline error classification and status.

    use super::*;
    use std::collections::BTreeMap;

    /// Assert that a result failed with the given kind.
    #[track_caller]
    pub fn assert_kind<T: std::fmt::Debug>(result: &LineageResult<T>, kind: ErrorKind) {
        match result {
            Err(e) => assert_eq!(e.kind(), kind, "wrong error kind for {:?}", e),
            Ok(v) => panic!("Expected {:?} error, got Ok: {:?}", kind, v),
        }
    }

    /// Assert that a result failed with a retryable error.
    #[track_caller]
    pub fn assert_retryable<T: std::fmt::Debug>(result: &LineageResult<T>) {
        match result {
            Err(e) => assert!(e.is_retryable(), "expected retryable error, got {:?}", e),
            Ok(v) => panic!("Expected retryable error, got Ok: {:?}", v),
        }
    }

    #[track_caller]
    pub fn assert_status(statuses: &BTreeMap<String, LineageStatus>, procedure: &str, expected: LineageStatus) {
        match statuses.get(procedure) {
            Some(status) => assert_eq!(*status, expected, "status of {}", procedure),
            None => panic!("{} missing from status map {:?}", procedure, statuses),
        }
    }

    /// Assert at most one confirmed mapping exists for `from` in `mappings`.
    #[track_caller]
    pub fn assert_single_confirmed(mappings: &[Mapping], from: &TableRef) {
        let count = mappings
            .iter()
            .filter(|m| m.is_confirmed() && &m.from == from)
            .count();
        assert!(count <= 1, "{} confirmed mappings for {}", count, from);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_recording_analyzer_counts_and_fails() {
        let analyzer = RecordingAnalyzer::new().failing_for("p2");
        let request = |name: &str| AnalysisRequest {
            identity: ProcedureIdentity::new(fixtures::alias("conn1"), name),
            definition: "SELECT 1".to_string(),
        };

        assert!(analyzer.analyze(&request("p1")).await.is_ok());
        assert!(analyzer.analyze(&request("p2")).await.is_err());
        assert_eq!(analyzer.call_count(), 2);
        assert_eq!(analyzer.calls_for("p2"), 1);
        assert_eq!(analyzer.calls_for("p3"), 0);
    }

    #[tokio::test]
    async fn test_canned_garbage_response_falls_back() {
        let analyzer = RecordingAnalyzer::new().with_response("p1", "I could not read that procedure.");
        let analysis = analyzer
            .analyze(&AnalysisRequest {
                identity: ProcedureIdentity::new(fixtures::alias("conn1"), "p1"),
                definition: "SELECT 1".to_string(),
            })
            .await
            .unwrap();
        assert!(analysis.parse_fallback);
        assert_eq!(analysis.summary, DEFAULT_FALLBACK_SUMMARY);
    }

    #[tokio::test]
    async fn test_failing_catalog_blocks_alias() {
        let faults = FailingCatalog::new(Arc::new(fixtures::warehouse_catalog()));
        let erp = fixtures::alias("erp");
        faults.fail_alias(&erp);
        assertions::assert_kind(&faults.list_tables(&erp).await, ErrorKind::CollaboratorUnavailable);
        assert!(faults.list_tables(&fixtures::alias("stage")).await.is_ok());
        faults.heal(&erp);
        assert!(faults.list_tables(&erp).await.is_ok());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_tables_validate(table in generators::arb_table_ref(fixtures::alias("erp"))) {
            prop_assert!(table.validate().is_ok());
        }

        #[test]
        fn prop_generated_mappings_are_confirmed(mapping in generators::arb_confirmed_mapping()) {
            prop_assert!(mapping.is_confirmed());
            prop_assert!((0.0..=1.0).contains(&mapping.confidence));
        }
    }
}
