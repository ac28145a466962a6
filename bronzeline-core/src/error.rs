//! Error types for Bronzeline operations

use crate::MappingTier;
use thiserror::Error;

/// Input validation errors. Always raised before any effect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown connection alias: {alias}")]
    UnknownAlias { alias: String },

    #[error("Connection {alias} is a {actual} connection, expected {expected}")]
    TierMismatch {
        alias: String,
        expected: String,
        actual: String,
    },
}

/// Catalog adapter errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Connection {alias} unavailable: {reason}")]
    ConnectionFailed { alias: String, reason: String },

    #[error("Not found on {alias}: {object}")]
    NotFound { alias: String, object: String },

    #[error("Catalog call {operation} on {alias} timed out after {elapsed_ms}ms")]
    Timeout {
        alias: String,
        operation: String,
        elapsed_ms: u64,
    },
}

/// AI analysis service errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("No analysis provider configured")]
    ProviderNotConfigured,

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: i32,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: i64,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Analysis of {procedure} timed out after {timeout_ms}ms")]
    Timeout { procedure: String, timeout_ms: u64 },
}

/// Persistence errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Concurrent-modification errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConflictError {
    #[error("{tier} mapping for {from} already confirmed to {existing_to}")]
    MappingAlreadyConfirmed {
        tier: MappingTier,
        from: String,
        existing_to: String,
    },

    #[error("Analysis already in flight for {identity}")]
    AnalysisInFlight { identity: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Coarse classification used by every caller-facing surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    CollaboratorUnavailable,
    Internal,
}

impl ErrorKind {
    /// HTTP status class for this kind.
    pub fn status_class(&self) -> u16 {
        match self {
            ErrorKind::InvalidInput => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::CollaboratorUnavailable => 503,
            ErrorKind::Internal => 500,
        }
    }
}

/// Master error type for all Bronzeline errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LineageError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl LineageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LineageError::Validation(_) => ErrorKind::InvalidInput,
            LineageError::Catalog(CatalogError::NotFound { .. }) => ErrorKind::NotFound,
            LineageError::Catalog(_) => ErrorKind::CollaboratorUnavailable,
            LineageError::Analysis(AnalysisError::InvalidResponse { .. }) => ErrorKind::Internal,
            LineageError::Analysis(_) => ErrorKind::CollaboratorUnavailable,
            LineageError::Storage(_) => ErrorKind::Internal,
            LineageError::Conflict(_) => ErrorKind::Conflict,
            LineageError::Config(_) => ErrorKind::InvalidInput,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            LineageError::Conflict(ConflictError::AnalysisInFlight { .. }) => true,
            // Unavailable until the server is reconfigured.
            LineageError::Analysis(AnalysisError::ProviderNotConfigured) => false,
            other => other.kind() == ErrorKind::CollaboratorUnavailable,
        }
    }

    pub fn status_class(&self) -> u16 {
        self.kind().status_class()
    }
}

/// Result type alias for Bronzeline operations.
pub type LineageResult<T> = Result<T, LineageError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_error_display_connection_failed() {
        let err = CatalogError::ConnectionFailed {
            alias: "erp_prod".to_string(),
            reason: "login timeout".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("erp_prod"));
        assert!(msg.contains("login timeout"));
    }

    #[test]
    fn test_conflict_error_display() {
        let err = ConflictError::MappingAlreadyConfirmed {
            tier: MappingTier::SourceToStage,
            from: "erp.dbo.customer".to_string(),
            existing_to: "stage.stg.customer".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("source_to_stage"));
        assert!(msg.contains("stage.stg.customer"));
    }

    #[test]
    fn test_analysis_error_display_rate_limited() {
        let err = AnalysisError::RateLimited {
            provider: "openai".to_string(),
            retry_after_ms: 1500,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("openai"));
        assert!(msg.contains("1500"));
    }

    #[test]
    fn test_kind_classification() {
        let invalid = LineageError::from(ValidationError::RequiredFieldMissing {
            field: "table".to_string(),
        });
        assert_eq!(invalid.kind(), ErrorKind::InvalidInput);
        assert_eq!(invalid.status_class(), 400);
        assert!(!invalid.is_retryable());

        let missing = LineageError::from(CatalogError::NotFound {
            alias: "erp".to_string(),
            object: "dbo.nope".to_string(),
        });
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert!(!missing.is_retryable());

        let down = LineageError::from(CatalogError::Timeout {
            alias: "erp".to_string(),
            operation: "list_tables".to_string(),
            elapsed_ms: 30_000,
        });
        assert_eq!(down.status_class(), 503);
        assert!(down.is_retryable());

        let unconfigured = LineageError::from(AnalysisError::ProviderNotConfigured);
        assert_eq!(unconfigured.status_class(), 503);
        assert!(!unconfigured.is_retryable());

        let throttled = LineageError::from(AnalysisError::RateLimited {
            provider: "openai".to_string(),
            retry_after_ms: 1000,
        });
        assert!(throttled.is_retryable());

        let busy = LineageError::from(ConflictError::AnalysisInFlight {
            identity: "erp/usp_load".to_string(),
        });
        assert_eq!(busy.status_class(), 409);
        assert!(busy.is_retryable());
    }

    #[test]
    fn test_storage_errors_are_internal() {
        let err = LineageError::from(StorageError::LockPoisoned);
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.status_class(), 500);
    }
}
