//! Prompt construction for lineage analysis.

use crate::AnalysisRequest;

pub const SYSTEM_PROMPT: &str =
    "You are a SQL data engineer assistant. You extract data lineage from stored procedures.";

/// Build the user message for one procedure.
pub fn lineage_prompt(request: &AnalysisRequest) -> String {
    format!(
        r#"Analyze the following stored procedure named `{name}` on connection `{alias}`.

Return a JSON object describing its source-to-target lineage, formatted like this:

{{
  "summary": "One or two sentences on what the procedure does.",
  "source_tables": ["source_db.schema.table"],
  "target_table": "target_schema.table",
  "column_mappings": [
    {{ "source": "source_col or expression", "target": "target_col", "source_table": "table_name" }}
  ]
}}

Only include tables that directly participate in data movement. Do not infer beyond joins if it is unclear.

SQL Procedure:
```
{definition}
```"#,
        name = request.identity.procedure_name,
        alias = request.identity.connection_alias,
        definition = request.definition,
    )
}
