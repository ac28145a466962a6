//! Parsing of lineage analysis responses.
//!
//! Models usually answer with a fenced ```json block, sometimes with bare
//! JSON, and occasionally with prose. Anything that does not yield a JSON
//! object becomes a flagged fallback rather than an error.

use crate::LineageAnalysis;
use bronzeline_core::{ColumnMapping, ConnectionAlias, TableRef, TransformationKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;

/// Summary stored when the response cannot be parsed.
pub const DEFAULT_FALLBACK_SUMMARY: &str =
    "Lineage could not be extracted: the analysis response was not valid JSON.";

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").expect("valid regex"));

static AGGREGATE_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(sum|count|count_big|avg|min|max|string_agg|stdev|var)\s*\(")
        .expect("valid regex")
});

static CAST_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(cast|try_cast|convert|try_convert|to_date|to_char|to_number)\s*\(")
        .expect("valid regex")
});

static PLAIN_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:[\[\]"`\w]+\.){0,3}[\[\]"`\w]+$"#).expect("valid regex")
});

static NUMERIC_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-+]?\d+(\.\d+)?$").expect("valid regex"));

// ============================================================================
// WIRE SHAPE
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawLineage {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    source_tables: Vec<String>,
    #[serde(default)]
    target_table: Option<String>,
    #[serde(default)]
    column_mappings: Vec<RawColumnMapping>,
}

#[derive(Debug, Deserialize)]
struct RawColumnMapping {
    #[serde(default)]
    source: Option<String>,
    target: String,
    #[serde(default)]
    source_table: Option<String>,
    #[serde(default)]
    transformation: Option<String>,
}

// ============================================================================
// PARSING
// ============================================================================

/// Pull the JSON payload out of a model response: the first fenced block
/// if there is one, otherwise the outermost `{...}` span.
pub fn extract_json_payload(raw: &str) -> Option<&str> {
    if let Some(captures) = FENCED_BLOCK.captures(raw) {
        return captures.get(1).map(|m| m.as_str().trim());
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Parse a model response into a `LineageAnalysis`.
///
/// Table names in the response are resolved against `alias`, the
/// connection the procedure lives on.
pub fn parse_lineage_response(raw: &str, alias: &ConnectionAlias, fallback_summary: &str) -> LineageAnalysis {
    let parsed = extract_json_payload(raw).and_then(|payload| serde_json::from_str::<RawLineage>(payload).ok());

    match parsed {
        Some(lineage) => build_analysis(lineage, alias),
        None => {
            tracing::warn!(alias = %alias, "Analysis response was not parseable; storing fallback summary");
            LineageAnalysis {
                summary: fallback_summary.to_string(),
                target_table: None,
                column_mappings: Vec::new(),
                parse_fallback: true,
            }
        }
    }
}

fn build_analysis(lineage: RawLineage, alias: &ConnectionAlias) -> LineageAnalysis {
    let target_table = lineage
        .target_table
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| TableRef::parse_qualified(alias.clone(), t));

    let sources: Vec<TableRef> = lineage
        .source_tables
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| TableRef::parse_qualified(alias.clone(), t))
        .collect();

    let column_mappings = lineage
        .column_mappings
        .into_iter()
        .filter(|m| !m.target.trim().is_empty())
        .map(|m| build_column_mapping(m, &sources, alias))
        .collect();

    let summary = lineage
        .summary
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| describe(&sources, target_table.as_ref()));

    LineageAnalysis {
        summary,
        target_table,
        column_mappings,
        parse_fallback: false,
    }
}

fn build_column_mapping(raw: RawColumnMapping, sources: &[TableRef], alias: &ConnectionAlias) -> ColumnMapping {
    let target_column = raw.target.trim().to_string();
    let source_expression = raw.source.unwrap_or_default().trim().to_string();

    let transformation_kind = raw
        .transformation
        .as_deref()
        .and_then(|t| TransformationKind::from_db_str(t).ok())
        .unwrap_or_else(|| infer_transformation(&source_expression, &target_column));

    let source_tables: BTreeSet<TableRef> = match raw.source_table.as_deref().map(str::trim) {
        Some(table) if !table.is_empty() => {
            let named = TableRef::parse_qualified(alias.clone(), table);
            // Prefer the fully qualified entry from source_tables when the
            // mapping only names the bare table.
            let resolved = sources
                .iter()
                .find(|s| named.schema.is_empty() && s.table.eq_ignore_ascii_case(&named.table))
                .cloned()
                .unwrap_or(named);
            BTreeSet::from([resolved])
        }
        _ if transformation_kind == TransformationKind::Constant => BTreeSet::new(),
        _ if sources.len() == 1 => sources.iter().cloned().collect(),
        _ => BTreeSet::new(),
    };

    ColumnMapping {
        target_column,
        source_expression,
        source_tables,
        transformation_kind,
    }
}

fn describe(sources: &[TableRef], target: Option<&TableRef>) -> String {
    let source_names: Vec<String> = sources.iter().map(TableRef::qualified_name).collect();
    match (target, source_names.is_empty()) {
        (Some(target), false) => format!(
            "Loads {} from {}.",
            target.qualified_name(),
            source_names.join(", ")
        ),
        (Some(target), true) => format!("Loads {}.", target.qualified_name()),
        (None, false) => format!("Reads {}.", source_names.join(", ")),
        (None, true) => "No data movement identified.".to_string(),
    }
}

/// Classify how `target` is derived from `source_expression`.
pub fn infer_transformation(source_expression: &str, target: &str) -> TransformationKind {
    let expr = source_expression.trim();
    if expr.is_empty() || expr == "*" {
        return TransformationKind::Direct;
    }
    if is_literal(expr) {
        return TransformationKind::Constant;
    }
    if AGGREGATE_CALL.is_match(expr) {
        return TransformationKind::Aggregate;
    }
    if CAST_CALL.is_match(expr) {
        return TransformationKind::Cast;
    }
    if PLAIN_COLUMN.is_match(expr) {
        let column = expr
            .rsplit('.')
            .next()
            .unwrap_or(expr)
            .trim_matches(|c| matches!(c, '[' | ']' | '"' | '`'));
        let target = target.trim_matches(|c| matches!(c, '[' | ']' | '"' | '`'));
        return if column.eq_ignore_ascii_case(target) {
            TransformationKind::Direct
        } else {
            TransformationKind::Rename
        };
    }
    TransformationKind::Expression
}

fn is_literal(expr: &str) -> bool {
    let quoted = (expr.starts_with('\'') || expr.starts_with("N'")) && expr.ends_with('\'');
    quoted || NUMERIC_LITERAL.is_match(expr) || expr.eq_ignore_ascii_case("null")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alias() -> ConnectionAlias {
        ConnectionAlias::new("conn1").unwrap()
    }

    const FENCED: &str = r#"Here is the lineage:

```json
{
  "summary": "Loads customers into stage.",
  "source_tables": ["erp.dbo.customer"],
  "target_table": "stg.customer",
  "column_mappings": [
    { "source": "cust_id", "target": "customer_id", "source_table": "customer" },
    { "source": "name", "target": "name" },
    { "source": "CAST(created AS DATE)", "target": "created_date" },
    { "source": "'ERP'", "target": "source_system" }
  ]
}
```
"#;

    #[test]
    fn test_extract_fenced_block() {
        let payload = extract_json_payload(FENCED).unwrap();
        assert!(payload.starts_with('{'));
        assert!(payload.ends_with('}'));
    }

    #[test]
    fn test_extract_bare_json() {
        let payload = extract_json_payload("sure: {\"target_table\": \"x.y\"} done").unwrap();
        assert_eq!(payload, "{\"target_table\": \"x.y\"}");
        assert!(extract_json_payload("no json here").is_none());
    }

    #[test]
    fn test_parse_fenced_response() {
        let analysis = parse_lineage_response(FENCED, &alias(), DEFAULT_FALLBACK_SUMMARY);
        assert!(!analysis.parse_fallback);
        assert_eq!(analysis.summary, "Loads customers into stage.");

        let target = analysis.target_table.unwrap();
        assert_eq!(target.schema, "stg");
        assert_eq!(target.table, "customer");

        let mappings = &analysis.column_mappings;
        assert_eq!(mappings.len(), 4);
        assert_eq!(mappings[0].transformation_kind, TransformationKind::Rename);
        let source = mappings[0].source_tables.iter().next().unwrap();
        assert_eq!(source.qualified_name(), "erp.dbo.customer");

        assert_eq!(mappings[1].transformation_kind, TransformationKind::Direct);
        assert_eq!(mappings[1].source_tables.len(), 1);
        assert_eq!(mappings[2].transformation_kind, TransformationKind::Cast);
        assert_eq!(mappings[3].transformation_kind, TransformationKind::Constant);
        assert!(mappings[3].source_tables.is_empty());
    }

    #[test]
    fn test_malformed_response_falls_back_flagged() {
        let analysis = parse_lineage_response("```json\n{ not json ```", &alias(), "fallback text");
        assert!(analysis.parse_fallback);
        assert_eq!(analysis.summary, "fallback text");
        assert!(analysis.column_mappings.is_empty());

        let prose = parse_lineage_response("This procedure loads orders.", &alias(), "fb");
        assert!(prose.parse_fallback);
    }

    #[test]
    fn test_missing_summary_is_described() {
        let raw = r#"{"source_tables": ["dbo.orders"], "target_table": "stg.orders"}"#;
        let analysis = parse_lineage_response(raw, &alias(), DEFAULT_FALLBACK_SUMMARY);
        assert!(!analysis.parse_fallback);
        assert_eq!(analysis.summary, "Loads stg.orders from dbo.orders.");
    }

    #[test]
    fn test_explicit_transformation_wins() {
        let raw = r#"{"column_mappings": [{"source": "a", "target": "a", "transformation": "cast"}]}"#;
        let analysis = parse_lineage_response(raw, &alias(), DEFAULT_FALLBACK_SUMMARY);
        assert_eq!(
            analysis.column_mappings[0].transformation_kind,
            TransformationKind::Cast
        );
    }

    #[test]
    fn test_infer_transformation() {
        assert_eq!(infer_transformation("*", "*"), TransformationKind::Direct);
        assert_eq!(infer_transformation("c.[Name]", "name"), TransformationKind::Direct);
        assert_eq!(infer_transformation("cust_nm", "customer_name"), TransformationKind::Rename);
        assert_eq!(
            infer_transformation("SUM(CAST(amount AS money))", "total"),
            TransformationKind::Aggregate
        );
        assert_eq!(
            infer_transformation("CONVERT(varchar(10), d, 120)", "d"),
            TransformationKind::Cast
        );
        assert_eq!(infer_transformation("N'ERP'", "src"), TransformationKind::Constant);
        assert_eq!(infer_transformation("42", "n"), TransformationKind::Constant);
        assert_eq!(
            infer_transformation("first_name + ' ' + last_name", "full_name"),
            TransformationKind::Expression
        );
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_parse_never_panics(raw in ".{0,200}") {
            let alias = ConnectionAlias::new("conn1").unwrap();
            let analysis = parse_lineage_response(&raw, &alias, "fb");
            if analysis.parse_fallback {
                prop_assert_eq!(analysis.summary, "fb");
            }
        }
    }
}
