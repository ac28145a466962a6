//! OpenAI lineage analyzer

use super::client::OpenAIClient;
use super::types::{CompletionRequest, CompletionResponse, Message, Usage};
use crate::prompt::{lineage_prompt, SYSTEM_PROMPT};
use crate::providers::invalid_response;
use crate::response::{parse_lineage_response, DEFAULT_FALLBACK_SUMMARY};
use crate::{AnalysisRequest, LineageAnalysis, LineageAnalyzer, UsageTracker};
use async_trait::async_trait;
use bronzeline_core::LineageResult;
use std::sync::Arc;

/// Lineage analyzer backed by a chat-completions model.
pub struct OpenAILineageAnalyzer {
    client: OpenAIClient,
    model: String,
    max_tokens: i32,
    fallback_summary: String,
    usage: Arc<UsageTracker>,
}

impl OpenAILineageAnalyzer {
    pub fn new(client: OpenAIClient, model: impl Into<String>, usage: Arc<UsageTracker>) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens: 2000,
            fallback_summary: DEFAULT_FALLBACK_SUMMARY.to_string(),
            usage,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: i32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_fallback_summary(mut self, fallback_summary: impl Into<String>) -> Self {
        self.fallback_summary = fallback_summary.into();
        self
    }

    /// Count the request, and its tokens when the provider reported them.
    fn record_usage(&self, usage: Option<&Usage>) {
        self.usage.record_request();
        if let Some(usage) = usage {
            self.usage
                .record_tokens(usage.prompt_tokens, usage.completion_tokens.unwrap_or(0));
        }
    }

    fn build_request(&self, request: &AnalysisRequest) -> CompletionRequest {
        CompletionRequest {
            model: self.client.routes_by_model().then(|| self.model.clone()),
            messages: vec![
                Message::system(SYSTEM_PROMPT),
                Message::user(lineage_prompt(request)),
            ],
            max_tokens: Some(self.max_tokens),
            temperature: Some(0.0),
        }
    }
}

#[async_trait]
impl LineageAnalyzer for OpenAILineageAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> LineageResult<LineageAnalysis> {
        let body = self.build_request(request);
        let response: CompletionResponse = self.client.request("chat/completions", body).await?;

        self.record_usage(response.usage.as_ref());

        let raw = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| invalid_response(self.client.provider(), "No completion in response"))?;

        let analysis = parse_lineage_response(&raw, &request.identity.connection_alias, &self.fallback_summary);
        if analysis.parse_fallback {
            self.usage.record_parse_fallback();
            tracing::debug!(procedure = %request.identity, raw = %raw, "Unparseable analysis response");
        }
        Ok(analysis)
    }

    fn provider_name(&self) -> &str {
        self.client.provider()
    }
}
