//! REST API Routes Module
//!
//! - Health check endpoints under `/health`
//! - Connection and table browsing under `/api/v1/connections` and `/api/v1/tables`
//! - Mapping discovery and confirmation under `/api/v1/mappings`
//! - Procedure lineage under `/api/v1/lineage`
//! - CORS support for the browser-based mapping UI

pub mod catalog;
pub mod health;
pub mod lineage;
pub mod mappings;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use bronzeline_core::MappingTier;
use bronzeline_llm::UsageSnapshot;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Build the complete router: health checks, the v1 API, request tracing
/// and CORS.
pub fn create_api_router(state: AppState, cors_origins: &[String]) -> Router {
    let api = Router::new()
        .merge(catalog::create_router())
        .nest("/mappings", mappings::create_router())
        .nest("/lineage", lineage::create_router())
        .route("/usage", get(usage));

    Router::new()
        .nest("/health", health::create_router())
        .nest("/api/v1", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(cors_origins))
}

/// GET /api/v1/usage - analyzer request and token counters
async fn usage(State(state): State<AppState>) -> Json<UsageSnapshot> {
    Json(state.usage.snapshot())
}

/// Empty origins allow any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    if origins.is_empty() {
        tracing::info!("CORS: allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(?origins, "CORS: allowing configured origins");
        let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(origins)
    }
}

/// Parse a tier path segment (`source_to_stage` or `source-to-stage`).
pub(crate) fn parse_tier(raw: &str) -> ApiResult<MappingTier> {
    MappingTier::from_db_str(raw).map_err(|e| ApiError::invalid_input(e.to_string()))
}
