//! OpenRouter provider.
//!
//! OpenRouter exposes many hosted models behind one OpenAI-compatible
//! endpoint. Transient failures are retried here with exponential backoff;
//! callers only see the final error.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::LlmError;
use crate::llm::litellm::{http_client, read_response, ApiRequest, REQUEST_TIMEOUT};
use crate::llm::{GenerationRequest, GenerationResponse, LlmProvider};

/// Default OpenRouter API endpoint.
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default model to use if none specified.
const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

/// Maximum number of attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// OpenRouter provider for LLM requests.
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
    base_delay: Duration,
}

impl OpenRouterProvider {
    /// Creates a provider using the default model and endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self, LlmError> {
        Self::with_custom_url(api_key, OPENROUTER_BASE_URL, DEFAULT_MODEL)
    }

    /// Creates a provider with a specific default model.
    pub fn with_model(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, LlmError> {
        Self::with_custom_url(api_key, OPENROUTER_BASE_URL, model)
    }

    /// Creates a provider against an OpenRouter-compatible endpoint.
    pub fn with_custom_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        Ok(Self {
            client: http_client(REQUEST_TIMEOUT)?,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: model.into(),
            base_delay: Duration::from_millis(BASE_RETRY_DELAY_MS),
        })
    }

    /// Overrides the first backoff delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Masked API key for logs.
    pub fn api_key_masked(&self) -> String {
        if self.api_key.len() <= 8 {
            "*".repeat(self.api_key.len())
        } else {
            format!(
                "{}...{}",
                &self.api_key[..4],
                &self.api_key[self.api_key.len() - 4..]
            )
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn execute_with_retry(&self, request: &ApiRequest) -> Result<GenerationResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut attempt = 0;
        loop {
            match self.execute_request(&url, request).await {
                Ok(response) => return Ok(response),
                Err(err) if is_transient_error(&err) && attempt + 1 < MAX_RETRIES => {
                    // 1s, 2s, 4s with the default base delay.
                    let delay = self.base_delay * (1 << attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = MAX_RETRIES,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient error, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn execute_request(
        &self,
        url: &str,
        request: &ApiRequest,
    ) -> Result<GenerationResponse, LlmError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", "https://github.com/drupal-bench")
            .header("X-Title", "drupal-bench")
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;
        read_response(response).await
    }
}

/// Whether an error is worth retrying.
fn is_transient_error(error: &LlmError) -> bool {
    match error {
        LlmError::RequestFailed(msg) => {
            let msg = msg.to_lowercase();
            msg.contains("timeout")
                || msg.contains("timed out")
                || msg.contains("connection")
                || msg.contains("temporarily")
        }
        LlmError::RateLimited(_) => true,
        LlmError::ApiError { code, .. } => *code >= 500 || *code == 429,
        _ => false,
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let body = request.into_wire(&self.default_model);
        self.execute_with_retry(&body).await
    }
}
