//! Bronzeline API - HTTP Surface
//!
//! Exposes the mapping and lineage pipeline over REST:
//!
//! - `/health/*` - liveness and readiness
//! - `/api/v1/mappings/*` - discovery, suggestion, auto-mapping, confirmation
//! - `/api/v1/lineage/*` - procedure analysis, status and bulk analysis
//! - `/api/v1/usage` - analyzer token counters

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::{ConfigError, ServerConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::create_api_router;
pub use state::AppState;
