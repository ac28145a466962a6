//! Catalog adapter boundary and the static snapshot catalog.

use async_trait::async_trait;
use bronzeline_core::{
    CatalogError, ColumnRef, ConfigError, ConnectionAlias, LineageError, LineageResult,
    ProcedureDefinition, ProcedureIdentity, TableRef,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// ADAPTER TRAIT
// ============================================================================

/// Read-only view of the live database catalogs, one per connection alias.
///
/// Implementations report an unreachable connection as
/// `CatalogError::ConnectionFailed` and a missing object as
/// `CatalogError::NotFound`.
#[async_trait]
pub trait CatalogAdapter: Send + Sync {
    /// Every table visible on the connection.
    async fn list_tables(&self, alias: &ConnectionAlias) -> LineageResult<Vec<TableRef>>;

    /// Columns of one table, in ordinal order.
    async fn list_columns(&self, alias: &ConnectionAlias, table: &TableRef) -> LineageResult<Vec<ColumnRef>>;

    /// Stored procedures with their current text, optionally limited to one schema.
    async fn list_procedures(
        &self,
        alias: &ConnectionAlias,
        schema: Option<&str>,
    ) -> LineageResult<Vec<ProcedureDefinition>>;

    async fn procedure_definition(&self, identity: &ProcedureIdentity) -> LineageResult<ProcedureDefinition>;
}

fn connection_failed(alias: &ConnectionAlias, reason: impl Into<String>) -> LineageError {
    CatalogError::ConnectionFailed {
        alias: alias.to_string(),
        reason: reason.into(),
    }
    .into()
}

fn not_found(alias: &ConnectionAlias, object: impl Into<String>) -> LineageError {
    CatalogError::NotFound {
        alias: alias.to_string(),
        object: object.into(),
    }
    .into()
}

// ============================================================================
// TIMEOUTS
// ============================================================================

/// Run one catalog call under `limit`, mapping expiry to `CatalogError::Timeout`.
pub async fn with_catalog_timeout<T>(
    alias: &ConnectionAlias,
    operation: &str,
    limit: Duration,
    call: impl Future<Output = LineageResult<T>>,
) -> LineageResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(alias = %alias, operation, timeout_ms = limit.as_millis() as u64, "Catalog call timed out");
            Err(CatalogError::Timeout {
                alias: alias.to_string(),
                operation: operation.to_string(),
                elapsed_ms: limit.as_millis() as u64,
            }
            .into())
        }
    }
}

/// Adapter decorator that bounds every call with the same timeout.
pub struct TimedCatalog {
    inner: Arc<dyn CatalogAdapter>,
    limit: Duration,
}

impl TimedCatalog {
    pub fn new(inner: Arc<dyn CatalogAdapter>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl CatalogAdapter for TimedCatalog {
    async fn list_tables(&self, alias: &ConnectionAlias) -> LineageResult<Vec<TableRef>> {
        with_catalog_timeout(alias, "list_tables", self.limit, self.inner.list_tables(alias)).await
    }

    async fn list_columns(&self, alias: &ConnectionAlias, table: &TableRef) -> LineageResult<Vec<ColumnRef>> {
        with_catalog_timeout(alias, "list_columns", self.limit, self.inner.list_columns(alias, table)).await
    }

    async fn list_procedures(
        &self,
        alias: &ConnectionAlias,
        schema: Option<&str>,
    ) -> LineageResult<Vec<ProcedureDefinition>> {
        with_catalog_timeout(
            alias,
            "list_procedures",
            self.limit,
            self.inner.list_procedures(alias, schema),
        )
        .await
    }

    async fn procedure_definition(&self, identity: &ProcedureIdentity) -> LineageResult<ProcedureDefinition> {
        with_catalog_timeout(
            &identity.connection_alias,
            "procedure_definition",
            self.limit,
            self.inner.procedure_definition(identity),
        )
        .await
    }
}

// ============================================================================
// SNAPSHOT FORMAT
// ============================================================================

/// On-disk JSON snapshot of one or more catalogs.
///
/// ```json
/// {"connections": {"erp": {"database": "ERP", "tables": [...], "procedures": [...]}}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    /// Database name applied to tables that do not name their own.
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub tables: Vec<TableSnapshot>,
    #[serde(default)]
    pub procedures: Vec<ProcedureSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
    #[serde(default)]
    pub database: Option<String>,
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub columns: Vec<ColumnSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSnapshot {
    pub name: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureSnapshot {
    pub schema: String,
    pub name: String,
    pub definition: String,
}

// ============================================================================
// STATIC CATALOG
// ============================================================================

#[derive(Debug, Default)]
struct ConnectionCatalog {
    tables: BTreeMap<TableRef, Vec<ColumnRef>>,
    procedures: BTreeMap<String, ProcedureDefinition>,
}

/// In-memory catalog, loaded from a snapshot or populated directly.
///
/// Procedures can be replaced at runtime so edited definitions show up on
/// the next read, which is how staleness is exercised without a database.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    connections: DashMap<ConnectionAlias, ConnectionCatalog>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: CatalogSnapshot) -> LineageResult<Self> {
        let catalog = Self::new();
        for (alias, connection) in snapshot.connections {
            let alias = ConnectionAlias::new(alias)?;
            catalog.add_connection(alias.clone());
            for table in connection.tables {
                let database = table.database.unwrap_or_else(|| connection.database.clone());
                let table_ref = TableRef::new(alias.clone(), database, table.schema, table.table);
                table_ref.validate()?;
                let columns = table
                    .columns
                    .into_iter()
                    .map(|c| (c.name, c.data_type, c.nullable))
                    .collect::<Vec<_>>();
                catalog.insert_table(table_ref, columns);
            }
            for procedure in connection.procedures {
                catalog.upsert_procedure(ProcedureDefinition {
                    identity: ProcedureIdentity::new(alias.clone(), procedure.name),
                    schema: procedure.schema,
                    definition: procedure.definition,
                });
            }
        }
        Ok(catalog)
    }

    /// Load a JSON snapshot file.
    pub fn load(path: impl AsRef<Path>) -> LineageResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let snapshot: CatalogSnapshot = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let catalog = Self::from_snapshot(snapshot)?;
        tracing::info!(path = %path.display(), connections = catalog.connections.len(), "Loaded catalog snapshot");
        Ok(catalog)
    }

    /// Register an empty catalog for `alias`.
    pub fn add_connection(&self, alias: ConnectionAlias) {
        self.connections.entry(alias).or_default();
    }

    /// Add or replace a table and its columns `(name, data_type, nullable)`.
    pub fn insert_table<N, T>(&self, table: TableRef, columns: impl IntoIterator<Item = (N, T, bool)>)
    where
        N: Into<String>,
        T: Into<String>,
    {
        let columns = columns
            .into_iter()
            .map(|(name, data_type, nullable)| ColumnRef {
                table: table.clone(),
                column_name: name.into(),
                data_type: data_type.into(),
                nullable,
            })
            .collect();
        self.connections
            .entry(table.connection_alias.clone())
            .or_default()
            .tables
            .insert(table, columns);
    }

    /// Add or replace a procedure's current text.
    pub fn upsert_procedure(&self, procedure: ProcedureDefinition) {
        self.connections
            .entry(procedure.identity.connection_alias.clone())
            .or_default()
            .procedures
            .insert(procedure.identity.procedure_name.clone(), procedure);
    }

    pub fn remove_procedure(&self, identity: &ProcedureIdentity) -> bool {
        self.connections
            .get_mut(&identity.connection_alias)
            .map(|mut c| c.procedures.remove(&identity.procedure_name).is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl CatalogAdapter for StaticCatalog {
    async fn list_tables(&self, alias: &ConnectionAlias) -> LineageResult<Vec<TableRef>> {
        let connection = self
            .connections
            .get(alias)
            .ok_or_else(|| connection_failed(alias, "no catalog registered for connection"))?;
        Ok(connection.tables.keys().cloned().collect())
    }

    async fn list_columns(&self, alias: &ConnectionAlias, table: &TableRef) -> LineageResult<Vec<ColumnRef>> {
        let connection = self
            .connections
            .get(alias)
            .ok_or_else(|| connection_failed(alias, "no catalog registered for connection"))?;
        connection
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| not_found(alias, table.qualified_name()))
    }

    async fn list_procedures(
        &self,
        alias: &ConnectionAlias,
        schema: Option<&str>,
    ) -> LineageResult<Vec<ProcedureDefinition>> {
        let connection = self
            .connections
            .get(alias)
            .ok_or_else(|| connection_failed(alias, "no catalog registered for connection"))?;
        Ok(connection
            .procedures
            .values()
            .filter(|p| schema.map_or(true, |s| p.schema.eq_ignore_ascii_case(s)))
            .cloned()
            .collect())
    }

    async fn procedure_definition(&self, identity: &ProcedureIdentity) -> LineageResult<ProcedureDefinition> {
        let alias = &identity.connection_alias;
        let connection = self
            .connections
            .get(alias)
            .ok_or_else(|| connection_failed(alias, "no catalog registered for connection"))?;
        connection
            .procedures
            .get(&identity.procedure_name)
            .cloned()
            .ok_or_else(|| not_found(alias, format!("procedure {}", identity.procedure_name)))
    }
}
