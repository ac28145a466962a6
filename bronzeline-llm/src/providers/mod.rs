//! Lineage analysis provider implementations

pub mod openai;

pub use openai::{OpenAIClient, OpenAILineageAnalyzer};

use bronzeline_core::{AnalysisError, LineageError};

pub(crate) fn request_failed(provider: &str, status: i32, message: impl Into<String>) -> LineageError {
    AnalysisError::RequestFailed {
        provider: provider.to_string(),
        status,
        message: message.into(),
    }
    .into()
}

pub(crate) fn rate_limited(provider: &str, retry_after_ms: i64) -> LineageError {
    AnalysisError::RateLimited {
        provider: provider.to_string(),
        retry_after_ms,
    }
    .into()
}

pub(crate) fn invalid_response(provider: &str, reason: impl Into<String>) -> LineageError {
    AnalysisError::InvalidResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    }
    .into()
}
