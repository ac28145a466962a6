//! Catalog Exploration REST API Routes
//!
//! Read-only views of the registered connections and what their catalogs
//! report. Used by the mapping UI to browse before confirming.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use bronzeline_core::{ColumnRef, ConnectionConfig, TableRef};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::state::AppState;

// ============================================================================
// RESPONSE TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListConnectionsResponse {
    pub connections: Vec<ConnectionConfig>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTablesResponse {
    pub tables: Vec<TableRef>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListColumnsResponse {
    pub columns: Vec<ColumnRef>,
    pub total: usize,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /api/v1/connections
pub async fn list_connections(State(state): State<AppState>) -> Json<ListConnectionsResponse> {
    let connections = state.pipeline.connections();
    Json(ListConnectionsResponse {
        total: connections.len(),
        connections,
    })
}

/// GET /api/v1/tables/:alias
pub async fn list_tables(
    State(state): State<AppState>,
    Path(alias): Path<String>,
) -> ApiResult<Json<ListTablesResponse>> {
    let tables = state.pipeline.list_tables(&alias).await?;
    Ok(Json(ListTablesResponse {
        total: tables.len(),
        tables,
    }))
}

/// GET /api/v1/tables/:alias/:schema/:table/columns
pub async fn list_columns(
    State(state): State<AppState>,
    Path((alias, schema, table)): Path<(String, String, String)>,
) -> ApiResult<Json<ListColumnsResponse>> {
    let columns = state.pipeline.list_columns(&alias, &schema, &table).await?;
    Ok(Json(ListColumnsResponse {
        total: columns.len(),
        columns,
    }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/connections", get(list_connections))
        .route("/tables/:alias", get(list_tables))
        .route("/tables/:alias/:schema/:table/columns", get(list_columns))
}
