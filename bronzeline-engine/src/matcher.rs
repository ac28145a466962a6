//! Name-similarity scoring between tables and columns across tiers.
//!
//! Names are normalized into tokens (lowercased, split on separators and
//! camelCase, tier markers trimmed, singularized). Identical token sequences
//! score 1.0; everything else blends token Jaccard with a character edit
//! ratio and is capped below 1.0.

use bronzeline_core::{ColumnRef, ConnectionConfig, TableRef};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Tokens that only say which tier a name belongs to.
const TIER_MARKERS: &[&str] = &["stg", "stage", "staging", "src", "source", "brz", "bronze", "tmp"];

const JACCARD_WEIGHT: f32 = 0.7;
const EDIT_WEIGHT: f32 = 0.3;

/// Highest score a non-identical pair can reach.
pub const MAX_FUZZY_SCORE: f32 = 0.99;

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Normalize a table or column name into comparable tokens.
pub fn normalize(name: &str) -> Vec<String> {
    let tokens: Vec<String> = split_words(name)
        .into_iter()
        .map(|t| singularize(&t.to_lowercase()))
        .filter(|t| !t.is_empty())
        .collect();

    let is_marker = |t: &String| TIER_MARKERS.contains(&t.as_str());
    let start = tokens.iter().position(|t| !is_marker(t));
    let end = tokens.iter().rposition(|t| !is_marker(t));
    match (start, end) {
        (Some(start), Some(end)) => tokens[start..=end].to_vec(),
        _ => tokens,
    }
}

fn split_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = name.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            // "customerId" and the "I" in "XMLId" both start a word
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower) {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn singularize(token: &str) -> String {
    if token.len() > 3 {
        if let Some(stem) = token.strip_suffix("ies") {
            return format!("{}y", stem);
        }
        if let Some(stem) = token.strip_suffix("ses") {
            return format!("{}s", stem);
        }
    }
    if token.len() > 2
        && token.ends_with('s')
        && !token.ends_with("ss")
        && !token.ends_with("us")
        && !token.ends_with("is")
    {
        return token[..token.len() - 1].to_string();
    }
    token.to_string()
}

// ============================================================================
// SCORING
// ============================================================================

/// Similarity of two raw names in `[0, 1]`.
pub fn score_names(a: &str, b: &str) -> f32 {
    score_tokens(&normalize(a), &normalize(b))
}

fn score_tokens(a: &[String], b: &[String]) -> f32 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let set_a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let set_b: HashSet<&str> = b.iter().map(String::as_str).collect();
    let intersection = set_a.intersection(&set_b).count() as f32;
    let union = set_a.union(&set_b).count() as f32;
    let jaccard = if union == 0.0 { 0.0 } else { intersection / union };

    let edit = levenshtein_ratio(&a.join(" "), &b.join(" "));
    (JACCARD_WEIGHT * jaccard + EDIT_WEIGHT * edit).clamp(0.0, MAX_FUZZY_SCORE)
}

/// Table-name similarity. Schema and database are not compared.
pub fn score_tables(a: &TableRef, b: &TableRef) -> f32 {
    score_names(&a.table, &b.table)
}

pub fn score_columns(a: &ColumnRef, b: &ColumnRef) -> f32 {
    score_names(&a.column_name, &b.column_name)
}

/// How a source connection names its stage tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageConvention {
    /// Prefix stage tables carry in front of the source table name.
    pub table_prefix: Option<String>,
    /// Schema stage tables land in.
    pub schema: Option<String>,
}

impl StageConvention {
    pub fn from_connection(connection: &ConnectionConfig) -> Self {
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            table_prefix: non_empty(&connection.stage_table_prefix),
            schema: non_empty(&connection.default_stage_schema),
        }
    }

    /// Stage table name with the configured prefix removed, ignoring case.
    /// A name that is only the prefix is returned unchanged.
    pub fn strip_prefix<'a>(&self, stage_table: &'a str) -> &'a str {
        let Some(prefix) = self.table_prefix.as_deref() else {
            return stage_table;
        };
        match stage_table.get(..prefix.len()) {
            Some(head) if head.eq_ignore_ascii_case(prefix) && stage_table.len() > prefix.len() => {
                &stage_table[prefix.len()..]
            }
            _ => stage_table,
        }
    }

    /// `score_tables` with the stage prefix removed from `stage`.
    pub fn score(&self, source: &TableRef, stage: &TableRef) -> f32 {
        score_names(&source.table, self.strip_prefix(&stage.table))
    }

    pub fn is_preferred_schema(&self, stage: &TableRef) -> bool {
        self.schema
            .as_deref()
            .is_some_and(|schema| schema.eq_ignore_ascii_case(&stage.schema))
    }
}

/// Number of columns in `from` whose normalized name matches some column of `to`.
pub fn column_overlap(from: &[ColumnRef], to: &[ColumnRef]) -> usize {
    let targets: HashSet<Vec<String>> = to.iter().map(|c| normalize(&c.column_name)).collect();
    from.iter()
        .filter(|c| targets.contains(&normalize(&c.column_name)))
        .count()
}

fn levenshtein_ratio(a: &str, b: &str) -> f32 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(a, b) as f32 / longest as f32
}

fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();
    let (m, n) = (s1_chars.len(), s2_chars.len());
    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0; n + 1];
    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(s1_chars[i - 1] != s2_chars[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[n]
}

// ============================================================================
// RANKING
// ============================================================================

/// One scored target for a `from` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedTable {
    pub table: TableRef,
    pub score: f32,
    pub column_overlap: usize,
    /// Same schema and table name, ignoring case.
    pub exact_object: bool,
    /// Lives in the source connection's default stage schema.
    #[serde(default)]
    pub preferred_schema: bool,
}

impl RankedTable {
    fn tied_with(&self, other: &RankedTable) -> bool {
        self.exact_object == other.exact_object
            && self.preferred_schema == other.preferred_schema
            && self.column_overlap == other.column_overlap
    }
}

/// Order candidates best first.
///
/// Scores within `epsilon` of a cluster's best score are treated as equal
/// and ordered by exact schema/table match, then the default stage schema,
/// then column overlap, then score, then name.
pub fn rank(mut candidates: Vec<RankedTable>, epsilon: f32) -> Vec<RankedTable> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut ranked = Vec::with_capacity(candidates.len());
    let mut cluster: Vec<RankedTable> = Vec::new();
    for candidate in candidates {
        let starts_new = cluster
            .first()
            .is_some_and(|head| head.score - candidate.score > epsilon);
        if starts_new {
            flush_cluster(&mut cluster, &mut ranked);
        }
        cluster.push(candidate);
    }
    flush_cluster(&mut cluster, &mut ranked);
    ranked
}

fn flush_cluster(cluster: &mut Vec<RankedTable>, ranked: &mut Vec<RankedTable>) {
    cluster.sort_by(|a, b| {
        b.exact_object
            .cmp(&a.exact_object)
            .then(b.preferred_schema.cmp(&a.preferred_schema))
            .then(b.column_overlap.cmp(&a.column_overlap))
            .then(b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
            .then_with(|| a.table.cmp(&b.table))
    });
    ranked.append(cluster);
}

/// The first `top_k` of an already ranked list plus anything tied with the
/// `top_k`-th.
pub fn select_top(ranked: &[RankedTable], top_k: usize, epsilon: f32) -> &[RankedTable] {
    if ranked.len() <= top_k || top_k == 0 {
        return &ranked[..ranked.len().min(top_k)];
    }
    let last = &ranked[top_k - 1];
    let extra = ranked[top_k..]
        .iter()
        .take_while(|c| (last.score - c.score).abs() <= epsilon && c.tied_with(last))
        .count();
    &ranked[..top_k + extra]
}

#[cfg(test)]
mod tests {
    use super::*;
    use bronzeline_core::ConnectionAlias;

    fn table(schema: &str, name: &str) -> TableRef {
        TableRef::new(ConnectionAlias::new("stage").unwrap(), "", schema, name)
    }

    fn ranked(schema: &str, name: &str, score: f32, overlap: usize) -> RankedTable {
        RankedTable {
            table: table(schema, name),
            score,
            column_overlap: overlap,
            exact_object: false,
            preferred_schema: false,
        }
    }

    #[test]
    fn test_normalize_strips_tier_markers() {
        assert_eq!(normalize("stg_customer"), vec!["customer"]);
        assert_eq!(normalize("customer_stg"), vec!["customer"]);
        assert_eq!(normalize("brz_customers"), vec!["customer"]);
        assert_eq!(normalize("StgCustomerOrders"), vec!["customer", "order"]);
    }

    #[test]
    fn test_normalize_keeps_raw_and_inner_markers() {
        assert_eq!(normalize("customer_raw"), vec!["customer", "raw"]);
        assert_eq!(normalize("customer_source_map"), vec!["customer", "source", "map"]);
        assert_eq!(normalize("stg"), vec!["stg"]);
    }

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("addresses"), "address");
        assert_eq!(singularize("orders"), "order");
        assert_eq!(singularize("status"), "status");
        assert_eq!(singularize("analysis"), "analysis");
        assert_eq!(singularize("class"), "class");
    }

    #[test]
    fn test_split_camel_case() {
        assert_eq!(split_words("CustomerID"), vec!["Customer", "ID"]);
        assert_eq!(split_words("XMLPayload"), vec!["XML", "Payload"]);
        assert_eq!(split_words("order-line.item"), vec!["order", "line", "item"]);
    }

    #[test]
    fn test_exact_normalized_match_scores_one() {
        assert_eq!(score_names("stg_customer", "Customers"), 1.0);
        assert_eq!(score_names("customer_raw", "CustomerRaw"), 1.0);
    }

    #[test]
    fn test_fuzzy_scores_below_one() {
        let partial = score_names("customer_raw", "customer");
        assert!(partial > 0.5 && partial < 1.0, "{}", partial);
        let abbreviated = score_names("customer", "cust");
        assert!(abbreviated < partial);
        assert!(score_names("orders", "invoice_lines") < 0.3);
    }

    #[test]
    fn test_customer_raw_ranks_first() {
        let source = TableRef::new(ConnectionAlias::new("erp").unwrap(), "", "orders", "customer_raw");
        let candidates = ["customer", "customer_raw", "cust"]
            .iter()
            .map(|name| {
                let target = table("stg", name);
                RankedTable {
                    score: score_tables(&source, &target),
                    column_overlap: 0,
                    exact_object: source.same_object_as(&target),
                    preferred_schema: false,
                    table: target,
                }
            })
            .collect();
        let ranked = rank(candidates, 0.02);
        assert_eq!(ranked[0].table.table, "customer_raw");
        assert_eq!(ranked[0].score, 1.0);
        assert_eq!(select_top(&ranked, 1, 0.02).len(), 1);
    }

    #[test]
    fn test_overlap_breaks_near_ties() {
        let ranked = rank(
            vec![ranked("stg", "a", 0.80, 1), ranked("stg", "b", 0.79, 4), ranked("stg", "c", 0.70, 9)],
            0.02,
        );
        let names: Vec<_> = ranked.iter().map(|r| r.table.table.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_select_top_includes_ties() {
        let ranked = rank(
            vec![ranked("stg", "a", 0.90, 2), ranked("stg", "b", 0.89, 2), ranked("stg", "c", 0.50, 2)],
            0.02,
        );
        assert_eq!(select_top(&ranked, 1, 0.02).len(), 2);
        assert_eq!(select_top(&ranked, 3, 0.02).len(), 3);
        assert!(select_top(&ranked, 0, 0.02).is_empty());
    }

    fn convention(prefix: Option<&str>, schema: Option<&str>) -> StageConvention {
        StageConvention {
            table_prefix: prefix.map(str::to_string),
            schema: schema.map(str::to_string),
        }
    }

    #[test]
    fn test_stage_prefix_stripped_before_scoring() {
        let source = TableRef::new(ConnectionAlias::new("erp").unwrap(), "", "orders", "customer_raw");
        let prefixed = table("stg", "sap_customer_raw");
        assert!(score_tables(&source, &prefixed) < 1.0);

        let sap = convention(Some("SAP_"), None);
        assert_eq!(sap.score(&source, &prefixed), 1.0);
        assert_eq!(sap.strip_prefix("sap_"), "sap_");
        assert_eq!(sap.strip_prefix("customer"), "customer");
        assert_eq!(StageConvention::default().score(&source, &prefixed), score_tables(&source, &prefixed));
    }

    #[test]
    fn test_default_stage_schema_breaks_ties() {
        let preferred = convention(None, Some("landing"));
        let mut in_stg = ranked("stg", "customer_raw", 1.0, 3);
        let mut in_landing = ranked("landing", "customer_raw", 1.0, 3);
        in_stg.preferred_schema = preferred.is_preferred_schema(&in_stg.table);
        in_landing.preferred_schema = preferred.is_preferred_schema(&in_landing.table);

        let ranked = rank(vec![in_stg, in_landing], 0.02);
        assert_eq!(ranked[0].table.schema, "landing");
        assert_eq!(select_top(&ranked, 1, 0.02).len(), 1);
    }

    #[test]
    fn test_column_overlap_uses_normalized_names() {
        let a = table("dbo", "customers");
        let b = table("stg", "customer");
        let col = |t: &TableRef, n: &str| ColumnRef {
            table: t.clone(),
            column_name: n.to_string(),
            data_type: "int".to_string(),
            nullable: true,
        };
        let from = vec![col(&a, "CustomerId"), col(&a, "Name"), col(&a, "Region")];
        let to = vec![col(&b, "customer_id"), col(&b, "name"), col(&b, "load_ts")];
        assert_eq!(column_overlap(&from, &to), 2);
        assert_eq!(score_columns(&from[0], &to[0]), 1.0);
    }
}
