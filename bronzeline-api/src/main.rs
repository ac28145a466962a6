//! Bronzeline API Server Entry Point
//!
//! Loads the TOML configuration, wires the pipeline and serves the router.

use bronzeline_api::telemetry::{init_tracing, LogFormat};
use bronzeline_api::{create_api_router, ApiError, ApiResult, AppState, ServerConfig};

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(LogFormat::from_env())?;

    let config = ServerConfig::load().map_err(|e| ApiError::invalid_input(e.to_string()))?;
    let addr = config
        .bind_addr()
        .map_err(|e| ApiError::invalid_input(e.to_string()))?;

    let state = AppState::from_config(&config)?;
    let app = create_api_router(state, &config.server.cors_origins);

    tracing::info!(%addr, "Starting Bronzeline API server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
