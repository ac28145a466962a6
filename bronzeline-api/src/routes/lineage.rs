//! Procedure Lineage REST API Routes

use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use bronzeline_core::{AnalysisOutcome, ConnectionAlias, LineageRecord, LineageStatus, ProcedureIdentity};
use bronzeline_engine::{BulkAnalyzeReport, ProcedureStatus};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// REQUEST/RESPONSE TYPES
// ============================================================================

/// Analyze caller-supplied procedure text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub procedure_name: String,
    pub definition: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaQuery {
    #[serde(default)]
    pub schema: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BulkAnalyzeRequest {
    #[serde(default)]
    pub schema: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListProceduresResponse {
    pub procedures: Vec<ProcedureStatus>,
    pub total: usize,
}

fn identity(alias: String, procedure_name: impl Into<String>) -> ApiResult<ProcedureIdentity> {
    Ok(ProcedureIdentity::new(ConnectionAlias::new(alias)?, procedure_name))
}

// ============================================================================
// HANDLERS
// ============================================================================

/// POST /api/v1/lineage/:alias/analyze
pub async fn analyze(
    State(state): State<AppState>,
    Path(alias): Path<String>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> ApiResult<Json<AnalysisOutcome>> {
    let Json(req) = payload?;
    if req.definition.trim().is_empty() {
        return Err(ApiError::missing_field("definition"));
    }
    let identity = identity(alias, req.procedure_name)?;
    Ok(Json(state.pipeline.analyze(&identity, &req.definition).await?))
}

/// POST /api/v1/lineage/:alias/procedures/:name/analyze - analyze the catalog's current text
pub async fn analyze_procedure(
    State(state): State<AppState>,
    Path((alias, name)): Path<(String, String)>,
) -> ApiResult<Json<AnalysisOutcome>> {
    let identity = identity(alias, name)?;
    Ok(Json(state.pipeline.analyze_procedure(&identity).await?))
}

/// GET /api/v1/lineage/:alias/status - procedure name to lineage status
pub async fn status_map(
    State(state): State<AppState>,
    Path(alias): Path<String>,
) -> ApiResult<Json<BTreeMap<String, LineageStatus>>> {
    Ok(Json(state.pipeline.status_map(&alias).await?))
}

/// GET /api/v1/lineage/:alias/procedures?schema=..
pub async fn list_procedures(
    State(state): State<AppState>,
    Path(alias): Path<String>,
    Query(query): Query<SchemaQuery>,
) -> ApiResult<Json<ListProceduresResponse>> {
    let procedures = state
        .pipeline
        .list_procedures(&alias, query.schema.as_deref())
        .await?;
    Ok(Json(ListProceduresResponse {
        total: procedures.len(),
        procedures,
    }))
}

/// GET /api/v1/lineage/:alias/procedures/:name - the stored lineage record
pub async fn get_record(
    State(state): State<AppState>,
    Path((alias, name)): Path<(String, String)>,
) -> ApiResult<Json<LineageRecord>> {
    let identity = identity(alias, name)?;
    state
        .pipeline
        .lineage_record(&identity)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("No lineage recorded for {}", identity)))
}

/// POST /api/v1/lineage/:alias/bulk-analyze - analyze every procedure of a schema
///
/// An empty body analyzes every schema. Any other body must be a valid
/// JSON `BulkAnalyzeRequest`.
pub async fn bulk_analyze(
    State(state): State<AppState>,
    Path(alias): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<BulkAnalyzeReport>> {
    let req = parse_bulk_request(&headers, &body)?;
    Ok(Json(state.pipeline.bulk_analyze(&alias, req.schema.as_deref()).await?))
}

fn parse_bulk_request(headers: &HeaderMap, body: &[u8]) -> ApiResult<BulkAnalyzeRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(BulkAnalyzeRequest::default());
    }
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().starts_with("application/json"));
    if !is_json {
        return Err(ApiError::invalid_input(
            "Expected request with `Content-Type: application/json`",
        ));
    }
    let Json(req) = Json::<BulkAnalyzeRequest>::from_bytes(body)?;
    Ok(req)
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/:alias/analyze", post(analyze))
        .route("/:alias/status", get(status_map))
        .route("/:alias/procedures", get(list_procedures))
        .route("/:alias/procedures/:name", get(get_record))
        .route("/:alias/procedures/:name/analyze", post(analyze_procedure))
        .route("/:alias/bulk-analyze", post(bulk_analyze))
}
