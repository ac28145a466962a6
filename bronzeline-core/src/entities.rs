//! Entity types for Bronzeline

use crate::{
    new_entity_id, EntityId, MappingState, MappingTier, Provenance, Timestamp,
    TransformationKind, ValidationError,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// CONNECTIONS & TABLES
// ============================================================================

/// Opaque, non-empty name of a configured database endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConnectionAlias(String);

impl ConnectionAlias {
    pub fn new(alias: impl Into<String>) -> Result<Self, ValidationError> {
        let alias = alias.into();
        let trimmed = alias.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "connection_alias".to_string(),
            });
        }
        if trimmed.contains(char::is_whitespace) || trimmed.contains('\0') {
            return Err(ValidationError::InvalidValue {
                field: "connection_alias".to_string(),
                reason: format!("'{}' contains whitespace or control characters", alias),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ConnectionAlias {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl Borrow<str> for ConnectionAlias {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<ConnectionAlias> for String {
    fn from(alias: ConnectionAlias) -> Self {
        alias.0
    }
}

impl fmt::Display for ConnectionAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A table on a specific connection. Identity is the full 4-tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub connection_alias: ConnectionAlias,
    #[serde(default)]
    pub database: String,
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        connection_alias: ConnectionAlias,
        database: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            connection_alias,
            database: database.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Parse a dotted `database.schema.table`, `schema.table` or `table`
    /// name as written in SQL, stripping bracket and quote delimiters.
    pub fn parse_qualified(connection_alias: ConnectionAlias, qualified: &str) -> Self {
        let parts: Vec<String> = qualified
            .split('.')
            .map(strip_identifier_quotes)
            .filter(|p| !p.is_empty())
            .collect();
        let (database, schema, table) = match parts.as_slice() {
            [] => (String::new(), String::new(), String::new()),
            [table] => (String::new(), String::new(), table.clone()),
            [schema, table] => (String::new(), schema.clone(), table.clone()),
            [.., database, schema, table] => (database.clone(), schema.clone(), table.clone()),
        };
        Self {
            connection_alias,
            database,
            schema,
            table,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.table.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "table".to_string(),
            });
        }
        if self.schema.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "schema".to_string(),
            });
        }
        Ok(())
    }

    /// `database.schema.table`, omitting an empty database.
    pub fn qualified_name(&self) -> String {
        if self.database.is_empty() {
            format!("{}.{}", self.schema, self.table)
        } else {
            format!("{}.{}.{}", self.database, self.schema, self.table)
        }
    }

    /// Case-insensitive comparison of schema and table only.
    pub fn same_object_as(&self, other: &TableRef) -> bool {
        self.schema.eq_ignore_ascii_case(&other.schema)
            && self.table.eq_ignore_ascii_case(&other.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.connection_alias, self.qualified_name())
    }
}

fn strip_identifier_quotes(part: &str) -> String {
    part.trim()
        .trim_matches(|c| matches!(c, '[' | ']' | '"' | '`'))
        .trim()
        .to_string()
}

/// A column of a table as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: TableRef,
    pub column_name: String,
    pub data_type: String,
    pub nullable: bool,
}

// ============================================================================
// MAPPINGS
// ============================================================================

/// A structural link between a table and its counterpart one tier down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub mapping_id: EntityId,
    pub tier: MappingTier,
    pub from: TableRef,
    pub to: TableRef,
    pub confidence: f32,
    pub provenance: Provenance,
    pub state: MappingState,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Mapping {
    /// An unconfirmed, scored proposal produced by the resolver.
    pub fn candidate(tier: MappingTier, from: TableRef, to: TableRef, confidence: f32) -> Self {
        Self {
            mapping_id: new_entity_id(),
            tier,
            from,
            to,
            confidence: confidence.clamp(0.0, 1.0),
            provenance: Provenance::Auto,
            state: MappingState::Candidate,
            created_at: Utc::now(),
            notes: None,
        }
    }

    pub fn confirmed(
        tier: MappingTier,
        from: TableRef,
        to: TableRef,
        confidence: f32,
        provenance: Provenance,
    ) -> Self {
        Self {
            provenance,
            state: MappingState::Confirmed,
            ..Self::candidate(tier, from, to, confidence)
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == MappingState::Confirmed
    }

    /// Same tier, endpoints, provenance and confidence.
    pub fn same_content(&self, other: &Mapping) -> bool {
        self.tier == other.tier
            && self.from == other.from
            && self.to == other.to
            && self.provenance == other.provenance
            && (self.confidence - other.confidence).abs() < f32::EPSILON
            && self.notes == other.notes
    }
}

/// A mapping row as supplied by a caller for bulk import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingInput {
    pub tier: MappingTier,
    pub from: TableRef,
    pub to: TableRef,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub provenance: Option<Provenance>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl MappingInput {
    pub fn into_confirmed(self) -> Mapping {
        let mapping = Mapping::confirmed(
            self.tier,
            self.from,
            self.to,
            self.confidence.unwrap_or(1.0),
            self.provenance.unwrap_or_default(),
        );
        match self.notes {
            Some(notes) => mapping.with_notes(notes),
            None => mapping,
        }
    }
}

// ============================================================================
// PROCEDURES & LINEAGE
// ============================================================================

/// Identity of a stored procedure on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcedureIdentity {
    pub connection_alias: ConnectionAlias,
    pub procedure_name: String,
}

impl ProcedureIdentity {
    pub fn new(connection_alias: ConnectionAlias, procedure_name: impl Into<String>) -> Self {
        Self {
            connection_alias,
            procedure_name: procedure_name.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.procedure_name.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "procedure_name".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ProcedureIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.connection_alias, self.procedure_name)
    }
}

/// Procedure text as currently held by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureDefinition {
    pub identity: ProcedureIdentity,
    pub schema: String,
    pub definition: String,
}

/// Column-level lineage for one target column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub target_column: String,
    pub source_expression: String,
    #[serde(default)]
    pub source_tables: BTreeSet<TableRef>,
    #[serde(default)]
    pub transformation_kind: TransformationKind,
}

/// Cached result of analyzing one version of a procedure.
///
/// A new analysis replaces the record wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageRecord {
    pub procedure_identity: ProcedureIdentity,
    pub source_definition_hash: String,
    pub summary: String,
    #[serde(default)]
    pub target_table: Option<TableRef>,
    #[serde(default)]
    pub column_mappings: Vec<ColumnMapping>,
    pub computed_at: Timestamp,
    /// Set when the analysis response could not be parsed and the
    /// fallback summary was stored instead.
    #[serde(default)]
    pub parse_fallback: bool,
}

/// Result of a single analyze call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub record: LineageRecord,
    pub cached: bool,
}
