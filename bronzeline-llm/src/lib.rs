//! Bronzeline LLM - Lineage Analysis Providers
//!
//! The AI analysis service is an external collaborator: given a stored
//! procedure's text it returns a summary plus column-level lineage. This
//! crate defines that boundary (`LineageAnalyzer`), the prompt, the response
//! parser, and a concrete OpenAI / Azure OpenAI chat-completions provider.

pub mod prompt;
pub mod providers;
pub mod response;

pub use providers::{OpenAIClient, OpenAILineageAnalyzer};
pub use response::{parse_lineage_response, DEFAULT_FALLBACK_SUMMARY};

use async_trait::async_trait;
use bronzeline_core::{
    AnalysisError, ColumnMapping, ConfigError, LineageError, LineageResult, ProcedureIdentity,
    TableRef,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

// ============================================================================
// ANALYZER TRAIT
// ============================================================================

/// One procedure version to analyze.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub identity: ProcedureIdentity,
    pub definition: String,
}

/// What the analysis service returned for one procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageAnalysis {
    pub summary: String,
    pub target_table: Option<TableRef>,
    pub column_mappings: Vec<ColumnMapping>,
    /// True when the response was unparseable and `summary` is the
    /// configured fallback text.
    pub parse_fallback: bool,
}

/// Trait for services that extract lineage from procedure text.
#[async_trait]
pub trait LineageAnalyzer: Send + Sync {
    /// Analyze one procedure.
    ///
    /// Transport and provider failures are errors. A response that arrives
    /// but cannot be parsed is NOT an error: it yields a flagged fallback.
    async fn analyze(&self, request: &AnalysisRequest) -> LineageResult<LineageAnalysis>;

    /// Provider name used in logs and errors.
    fn provider_name(&self) -> &str;
}

/// Analyzer used when no provider is configured. Every call fails with
/// `ProviderNotConfigured`, which retrying cannot fix.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledAnalyzer;

#[async_trait]
impl LineageAnalyzer for DisabledAnalyzer {
    async fn analyze(&self, _request: &AnalysisRequest) -> LineageResult<LineageAnalysis> {
        Err(AnalysisError::ProviderNotConfigured.into())
    }

    fn provider_name(&self) -> &str {
        "disabled"
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Which analysis backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerProvider {
    #[default]
    Disabled,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "azure_openai")]
    AzureOpenAi,
}

/// Analyzer settings. The API key itself is read from the environment
/// variable named by `api_key_env`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerConfig {
    pub provider: AnalyzerProvider,
    /// Model name (OpenAI) or deployment name (Azure).
    pub model: String,
    pub api_key_env: String,
    /// Base URL (OpenAI) or resource endpoint (Azure).
    pub endpoint: Option<String>,
    pub api_version: String,
    pub requests_per_minute: u32,
    pub max_tokens: i32,
    pub fallback_summary: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            provider: AnalyzerProvider::Disabled,
            model: "model-router".to_string(),
            api_key_env: "AZURE_OPENAI_API_KEY".to_string(),
            endpoint: None,
            api_version: "2024-12-01-preview".to_string(),
            requests_per_minute: 60,
            max_tokens: 2000,
            fallback_summary: DEFAULT_FALLBACK_SUMMARY.to_string(),
        }
    }
}

impl AnalyzerConfig {
    /// Overlay `AZURE_OPENAI_ENDPOINT`, `AZURE_OPENAI_DEPLOYMENT` and
    /// `AZURE_OPENAI_API_VERSION` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("AZURE_OPENAI_ENDPOINT") {
            self.endpoint = Some(endpoint);
        }
        if let Ok(deployment) = std::env::var("AZURE_OPENAI_DEPLOYMENT") {
            self.model = deployment;
        }
        if let Ok(version) = std::env::var("AZURE_OPENAI_API_VERSION") {
            self.api_version = version;
        }
        self
    }
}

fn missing(field: &str) -> LineageError {
    LineageError::Config(ConfigError::MissingRequired {
        field: field.to_string(),
    })
}

/// Build the configured analyzer.
pub fn build_analyzer(
    config: &AnalyzerConfig,
    usage: Arc<UsageTracker>,
) -> LineageResult<Arc<dyn LineageAnalyzer>> {
    let api_key = || std::env::var(&config.api_key_env).map_err(|_| missing(&config.api_key_env));
    let client = match config.provider {
        AnalyzerProvider::Disabled => {
            tracing::warn!("No analysis provider configured; analyze calls will fail");
            return Ok(Arc::new(DisabledAnalyzer));
        }
        AnalyzerProvider::OpenAi => {
            let api_key = api_key()?;
            let client = OpenAIClient::new(api_key, config.requests_per_minute);
            match &config.endpoint {
                Some(base_url) => client.with_base_url(base_url.clone()),
                None => client,
            }
        }
        AnalyzerProvider::AzureOpenAi => {
            let api_key = api_key()?;
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| missing("analyzer.endpoint"))?;
            OpenAIClient::azure(
                api_key,
                endpoint,
                config.model.clone(),
                config.api_version.clone(),
                config.requests_per_minute,
            )
        }
    };

    Ok(Arc::new(
        OpenAILineageAnalyzer::new(client, config.model.clone(), usage)
            .with_max_tokens(config.max_tokens)
            .with_fallback_summary(config.fallback_summary.clone()),
    ))
}

// ============================================================================
// USAGE TRACKING
// ============================================================================

/// Token and request counters for the analysis provider.
pub struct UsageTracker {
    requests: AtomicI64,
    prompt_tokens: AtomicI64,
    completion_tokens: AtomicI64,
    parse_fallbacks: AtomicI64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub requests: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub parse_fallbacks: i64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            requests: AtomicI64::new(0),
            prompt_tokens: AtomicI64::new(0),
            completion_tokens: AtomicI64::new(0),
            parse_fallbacks: AtomicI64::new(0),
        }
    }

    /// Record one completed request.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Add the token counts a provider reported for a request.
    pub fn record_tokens(&self, prompt_tokens: i64, completion_tokens: i64) {
        self.prompt_tokens.fetch_add(prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(completion_tokens, Ordering::Relaxed);
    }

    pub fn record_parse_fallback(&self) {
        self.parse_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            parse_fallbacks: self.parse_fallbacks.load(Ordering::Relaxed),
        }
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UsageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("UsageTracker")
            .field("requests", &snapshot.requests)
            .field("prompt_tokens", &snapshot.prompt_tokens)
            .field("completion_tokens", &snapshot.completion_tokens)
            .field("parse_fallbacks", &snapshot.parse_fallbacks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bronzeline_core::ConnectionAlias;

    #[tokio::test]
    async fn test_disabled_analyzer_is_not_retryable() {
        let request = AnalysisRequest {
            identity: ProcedureIdentity::new(ConnectionAlias::new("conn1").unwrap(), "p1"),
            definition: "CREATE PROCEDURE p1 AS SELECT 1".to_string(),
        };
        let err = DisabledAnalyzer.analyze(&request).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.status_class(), 503);
    }

    #[test]
    fn test_usage_tracker_counts() {
        let tracker = UsageTracker::new();
        tracker.record_request();
        tracker.record_tokens(100, 20);
        tracker.record_request();
        tracker.record_tokens(50, 5);
        tracker.record_request();
        tracker.record_parse_fallback();
        assert_eq!(
            tracker.snapshot(),
            UsageSnapshot {
                requests: 3,
                prompt_tokens: 150,
                completion_tokens: 25,
                parse_fallbacks: 1,
            }
        );
    }

    #[test]
    fn test_build_disabled_analyzer() {
        let analyzer = build_analyzer(&AnalyzerConfig::default(), Arc::new(UsageTracker::new()))
            .unwrap();
        assert_eq!(analyzer.provider_name(), "disabled");
    }

    #[test]
    fn test_build_requires_api_key() {
        let config = AnalyzerConfig {
            provider: AnalyzerProvider::OpenAi,
            api_key_env: "BRONZELINE_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..AnalyzerConfig::default()
        };
        let err = build_analyzer(&config, Arc::new(UsageTracker::new())).err().expect("expected build_analyzer to fail");
        assert!(err.to_string().contains("BRONZELINE_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn test_analyzer_config_from_toml_like_json() {
        let config: AnalyzerConfig =
            serde_json::from_str(r#"{"provider": "azure_openai", "endpoint": "https://x.openai.azure.com"}"#)
                .unwrap();
        assert_eq!(config.provider, AnalyzerProvider::AzureOpenAi);
        assert_eq!(config.api_version, "2024-12-01-preview");
    }
}
