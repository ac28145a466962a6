//! OpenAI / Azure OpenAI HTTP client with rate limiting

use super::types::ApiError;
use crate::providers::{invalid_response, rate_limited, request_failed};
use bronzeline_core::LineageResult;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Where requests go and how they authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    /// `Authorization: Bearer` against `{base_url}/{endpoint}`.
    OpenAI { base_url: String },
    /// `api-key` header against the deployment-scoped Azure URL.
    Azure {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
}

/// Chat-completions client with rate limiting.
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    target: Target,
    provider: &'static str,
    rate_limiter: Arc<Semaphore>,
    last_request: Arc<AtomicU64>,
    min_request_interval_ms: u64,
    start_time: Instant,
}

impl OpenAIClient {
    /// Create a client for api.openai.com.
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API key
    /// * `requests_per_minute` - Maximum requests per minute
    pub fn new(api_key: impl Into<String>, requests_per_minute: u32) -> Self {
        Self::with_target(
            api_key,
            Target::OpenAI {
                base_url: "https://api.openai.com/v1".to_string(),
            },
            "openai",
            requests_per_minute,
        )
    }

    /// Create a client for an Azure OpenAI deployment.
    pub fn azure(
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
        requests_per_minute: u32,
    ) -> Self {
        Self::with_target(
            api_key,
            Target::Azure {
                endpoint: endpoint.into().trim_end_matches('/').to_string(),
                deployment: deployment.into(),
                api_version: api_version.into(),
            },
            "azure_openai",
            requests_per_minute,
        )
    }

    fn with_target(
        api_key: impl Into<String>,
        target: Target,
        provider: &'static str,
        requests_per_minute: u32,
    ) -> Self {
        let rpm = requests_per_minute.max(1);
        let permits = rpm as usize;
        let min_interval_ms = (60_000 / rpm as u64).max(10);

        Self {
            client: Client::new(),
            api_key: api_key.into(),
            target,
            provider,
            rate_limiter: Arc::new(Semaphore::new(permits)),
            last_request: Arc::new(AtomicU64::new(0)),
            min_request_interval_ms: min_interval_ms,
            start_time: Instant::now(),
        }
    }

    /// Point an OpenAI-style client at a compatible server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        if let Target::OpenAI { .. } = self.target {
            self.target = Target::OpenAI {
                base_url: base_url.into().trim_end_matches('/').to_string(),
            };
        }
        self
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    /// Whether requests carry the model name in the body.
    pub fn routes_by_model(&self) -> bool {
        matches!(self.target, Target::OpenAI { .. })
    }

    pub(crate) fn url(&self, endpoint: &str) -> String {
        match &self.target {
            Target::OpenAI { base_url } => format!("{}/{}", base_url, endpoint),
            Target::Azure {
                endpoint: resource,
                deployment,
                api_version,
            } => format!(
                "{}/openai/deployments/{}/{}?api-version={}",
                resource, deployment, endpoint, api_version
            ),
        }
    }

    /// Make an API request with automatic rate limiting.
    pub async fn request<Req: Serialize, Res: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Req,
    ) -> LineageResult<Res> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| request_failed(self.provider, 0, format!("Rate limiter error: {}", e)))?;

        // Enforce minimum interval between requests
        let now_ms = self.start_time.elapsed().as_millis() as u64;
        let last_ms = self.last_request.load(Ordering::Relaxed);
        let elapsed = now_ms.saturating_sub(last_ms);

        if last_ms > 0 && elapsed < self.min_request_interval_ms {
            let wait_ms = self.min_request_interval_ms - elapsed;
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }

        self.last_request.store(now_ms.max(1), Ordering::Relaxed);

        let request = self
            .client
            .post(self.url(endpoint))
            .header("Content-Type", "application/json");
        let request = match self.target {
            Target::OpenAI { .. } => request.header("Authorization", format!("Bearer {}", self.api_key)),
            Target::Azure { .. } => request.header("api-key", &self.api_key),
        };

        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| request_failed(self.provider, 0, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let retry_after_ms = parse_retry_after_ms(response.headers()).unwrap_or(0);

        if status.is_success() {
            response.json().await.map_err(|e| {
                invalid_response(self.provider, format!("Failed to parse response: {}", e))
            })
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            let error_msg = match serde_json::from_str::<ApiError>(&error_text) {
                Ok(api_error) => api_error.error.message,
                Err(_) => error_text,
            };

            tracing::warn!(provider = self.provider, status = status.as_u16(), "Analysis request failed");
            Err(match status {
                StatusCode::TOO_MANY_REQUESTS => rate_limited(self.provider, retry_after_ms),
                _ => request_failed(self.provider, status.as_u16() as i32, error_msg),
            })
        }
    }
}

fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<i64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<f64>().ok())
        .map(|seconds| (seconds * 1000.0) as i64)
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("target", &self.target)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn test_openai_url() {
        let client = OpenAIClient::new("sk-test", 60);
        assert_eq!(
            client.url("chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert!(client.routes_by_model());

        let local = OpenAIClient::new("sk-test", 60).with_base_url("http://localhost:8080/v1/");
        assert_eq!(local.url("chat/completions"), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_azure_url() {
        let client = OpenAIClient::azure(
            "key",
            "https://contoso.openai.azure.com/",
            "model-router",
            "2024-12-01-preview",
            60,
        );
        assert_eq!(
            client.url("chat/completions"),
            "https://contoso.openai.azure.com/openai/deployments/model-router/chat/completions?api-version=2024-12-01-preview"
        );
        assert!(!client.routes_by_model());
        assert_eq!(client.provider(), "azure_openai");
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = OpenAIClient::new("sk-very-secret", 60);
        let debug = format!("{:?}", client);
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after_ms(&headers), None);
        headers.insert("retry-after", HeaderValue::from_static("1.5"));
        assert_eq!(parse_retry_after_ms(&headers), Some(1500));
    }
}
