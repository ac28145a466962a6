//! Error Types for the Bronzeline API
//!
//! Every handler returns `ApiResult<T>`. Engine errors are classified by
//! `LineageError::kind()` and rendered as a JSON body:
//!
//! ```json
//! {"code": "SERVICE_UNAVAILABLE", "message": "...", "details": {"retryable": true}}
//! ```

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bronzeline_core::{ConflictError, ErrorKind, LineageError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request contains invalid input data
    InvalidInput,

    /// Required field is missing from request
    MissingField,

    /// Connection alias is not registered
    UnknownAlias,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested entity does not exist
    EntityNotFound,

    // ========================================================================
    // Conflict Errors (409)
    // ========================================================================
    /// A different mapping is already confirmed for the same table
    MappingConflict,

    /// An analysis of the same procedure is already running
    AnalysisInFlight,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// A catalog or analysis collaborator is unreachable or timed out
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput | ErrorCode::MissingField | ErrorCode::UnknownAlias => {
                StatusCode::BAD_REQUEST
            }

            ErrorCode::EntityNotFound => StatusCode::NOT_FOUND,

            ErrorCode::MappingConflict | ErrorCode::AnalysisInFlight => StatusCode::CONFLICT,

            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "Invalid input",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::UnknownAlias => "Unknown connection alias",
            ErrorCode::EntityNotFound => "Entity not found",
            ErrorCode::MappingConflict => "Mapping already confirmed",
            ErrorCode::AnalysisInFlight => "Analysis already in progress",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (retryability, offending row, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingField,
            format!("Required field '{}' is missing", field),
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EntityNotFound, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Whether a client may retry the request unchanged.
    pub fn is_retryable(&self) -> bool {
        self.details
            .as_ref()
            .and_then(|d| d.get("retryable"))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<LineageError> for ApiError {
    fn from(err: LineageError) -> Self {
        let code = match (&err, err.kind()) {
            (LineageError::Validation(ValidationError::UnknownAlias { .. }), _) => ErrorCode::UnknownAlias,
            (LineageError::Validation(ValidationError::RequiredFieldMissing { .. }), _) => {
                ErrorCode::MissingField
            }
            (LineageError::Conflict(ConflictError::AnalysisInFlight { .. }), _) => ErrorCode::AnalysisInFlight,
            (_, ErrorKind::InvalidInput) => ErrorCode::InvalidInput,
            (_, ErrorKind::NotFound) => ErrorCode::EntityNotFound,
            (_, ErrorKind::Conflict) => ErrorCode::MappingConflict,
            (_, ErrorKind::CollaboratorUnavailable) => ErrorCode::ServiceUnavailable,
            (_, ErrorKind::Internal) => ErrorCode::InternalError,
        };

        if code == ErrorCode::InternalError {
            tracing::error!(error = %err, "Internal error");
        }

        ApiError::new(code, err.to_string()).with_details(serde_json::json!({
            "retryable": err.is_retryable(),
        }))
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        LineageError::from(err).into()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::invalid_input(format!("Invalid JSON body: {}", rejection.body_text()))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

pub type ApiResult<T> = Result<T, ApiError>;
