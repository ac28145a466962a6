//! Mapping REST API Routes

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bronzeline_core::{ConnectionAlias, Mapping, MappingInput, TableRef};
use bronzeline_engine::{AutoMapReport, ConfirmRequest, SuggestReport};
use bronzeline_storage::{BulkUpsertSummary, ConfirmOutcome};
use serde::{Deserialize, Serialize};

use super::parse_tier;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// REQUEST/RESPONSE TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverRequest {
    pub from_alias: String,
    pub to_alias: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMappingsResponse {
    pub mappings: Vec<Mapping>,
    pub total: usize,
}

/// Identifies the `from` table of a mapping to delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMappingQuery {
    pub alias: String,
    /// `schema.table` or `database.schema.table`
    pub table: String,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// POST /api/v1/mappings/discover - ranked candidates between two aliases
pub async fn discover(
    State(state): State<AppState>,
    payload: Result<Json<DiscoverRequest>, JsonRejection>,
) -> ApiResult<Json<ListMappingsResponse>> {
    let Json(req) = payload?;
    let mappings = state
        .pipeline
        .discover_candidates(&req.from_alias, &req.to_alias)
        .await?;
    Ok(Json(ListMappingsResponse {
        total: mappings.len(),
        mappings,
    }))
}

/// POST /api/v1/mappings/:tier/suggest - candidates across every alias of a tier
pub async fn suggest(State(state): State<AppState>, Path(tier): Path<String>) -> ApiResult<Json<SuggestReport>> {
    let tier = parse_tier(&tier)?;
    Ok(Json(state.pipeline.suggest(tier).await?))
}

/// POST /api/v1/mappings/:tier/auto-map - confirm candidates above the threshold
pub async fn auto_map(State(state): State<AppState>, Path(tier): Path<String>) -> ApiResult<Json<AutoMapReport>> {
    let tier = parse_tier(&tier)?;
    Ok(Json(state.pipeline.auto_map(tier).await?))
}

/// POST /api/v1/mappings/confirm - confirm or promote one mapping
pub async fn confirm(
    State(state): State<AppState>,
    payload: Result<Json<ConfirmRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    let outcome = state.pipeline.confirm_mapping(req).await?;
    let status = match outcome {
        ConfirmOutcome::Created { .. } => StatusCode::CREATED,
        ConfirmOutcome::Replaced { .. } | ConfirmOutcome::Unchanged { .. } => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

/// POST /api/v1/mappings/bulk - import confirmed mappings
pub async fn bulk_upsert(
    State(state): State<AppState>,
    payload: Result<Json<Vec<MappingInput>>, JsonRejection>,
) -> ApiResult<Json<BulkUpsertSummary>> {
    let Json(inputs) = payload?;
    Ok(Json(state.pipeline.bulk_upsert_mappings(inputs).await?))
}

/// GET /api/v1/mappings/:tier - confirmed mappings
pub async fn list_mappings(
    State(state): State<AppState>,
    Path(tier): Path<String>,
) -> ApiResult<Json<ListMappingsResponse>> {
    let tier = parse_tier(&tier)?;
    let mappings = state.pipeline.list_mappings(tier).await?;
    Ok(Json(ListMappingsResponse {
        total: mappings.len(),
        mappings,
    }))
}

/// GET /api/v1/mappings/:tier/candidates - recorded, unconfirmed candidates
pub async fn list_candidates(
    State(state): State<AppState>,
    Path(tier): Path<String>,
) -> ApiResult<Json<ListMappingsResponse>> {
    let tier = parse_tier(&tier)?;
    let mappings = state.pipeline.list_candidates(tier).await?;
    Ok(Json(ListMappingsResponse {
        total: mappings.len(),
        mappings,
    }))
}

/// DELETE /api/v1/mappings/:tier?alias=..&table=.. - remove a confirmed mapping
pub async fn delete_mapping(
    State(state): State<AppState>,
    Path(tier): Path<String>,
    Query(query): Query<DeleteMappingQuery>,
) -> ApiResult<StatusCode> {
    let tier = parse_tier(&tier)?;
    let from = TableRef::parse_qualified(ConnectionAlias::new(query.alias)?, &query.table);
    if state.pipeline.delete_mapping(tier, &from).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("No {} mapping for {}", tier, from)))
    }
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/discover", post(discover))
        .route("/confirm", post(confirm))
        .route("/bulk", post(bulk_upsert))
        .route("/:tier", get(list_mappings).delete(delete_mapping))
        .route("/:tier/candidates", get(list_candidates))
        .route("/:tier/suggest", post(suggest))
        .route("/:tier/auto-map", post(auto_map))
}
