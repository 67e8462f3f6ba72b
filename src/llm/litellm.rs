//! Client for OpenAI-compatible chat completion APIs (LiteLLM proxies,
//! vLLM, OpenAI itself).

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::LlmError;

/// Request timeout for a single completion. Patches can be long.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender ("system", "user" or "assistant").
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request for text generation from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier. Empty means the provider default.
    pub model: String,
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Nucleus sampling parameter (0.0 - 1.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            top_p: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Wire body with the model resolved against `default_model`.
    pub(crate) fn into_wire(self, default_model: &str) -> ApiRequest {
        let model = if self.model.is_empty() {
            default_model.to_string()
        } else {
            self.model
        };
        ApiRequest {
            model,
            messages: self.messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        }
    }
}

/// Response from an LLM generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub id: String,
    /// Model that generated this response.
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl GenerationResponse {
    /// Content of the first choice, if available.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// A single generated choice from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    /// Why generation stopped ("stop", "length", ...).
    pub finish_reason: String,
}

/// Token usage statistics for a generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Something that can answer a chat completion request.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Builds the shared HTTP client.
pub(crate) fn http_client(timeout: Duration) -> Result<Client, LlmError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LlmError::RequestFailed(format!("failed to build HTTP client: {e}")))
}

/// Wire request body for `/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ApiRequest {
    pub(crate) model: String,
    pub(crate) messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) top_p: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    index: u32,
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default = "assistant_role")]
    role: String,
    /// Null when the model only produced tool calls or was filtered.
    content: Option<String>,
}

fn assistant_role() -> String {
    "assistant".to_string()
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Maps a non-success status and body to an error.
pub(crate) fn error_from_status(status_code: u16, body: String) -> LlmError {
    let message = serde_json::from_str::<ApiErrorResponse>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    if status_code == 429 {
        LlmError::RateLimited(message)
    } else {
        LlmError::ApiError {
            code: status_code,
            message,
        }
    }
}

/// Parses a completion body.
pub(crate) fn parse_response(body: &str) -> Result<GenerationResponse, LlmError> {
    let api: ApiResponse = serde_json::from_str(body)
        .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {e}")))?;
    let usage = api.usage.map_or_else(Usage::default, |u| Usage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });
    let choices = api
        .choices
        .into_iter()
        .map(|choice| Choice {
            index: choice.index,
            message: Message {
                role: choice.message.role,
                content: choice.message.content.unwrap_or_default(),
            },
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
        })
        .collect();
    Ok(GenerationResponse {
        id: api.id,
        model: api.model,
        choices,
        usage,
    })
}

/// Reads a response, turning HTTP errors into [`LlmError`].
pub(crate) async fn read_response(response: Response) -> Result<GenerationResponse, LlmError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| LlmError::RequestFailed(format!("failed to read response body: {e}")))?;
    if !status.is_success() {
        return Err(error_from_status(status.as_u16(), body));
    }
    parse_response(&body)
}

/// Client for LiteLLM-compatible APIs.
pub struct LiteLlmClient {
    api_base: String,
    api_key: Option<String>,
    default_model: String,
    http_client: Client,
}

impl LiteLlmClient {
    /// Creates a client for `api_base` (e.g. "http://localhost:4000").
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
            http_client: http_client(REQUEST_TIMEOUT)?,
        })
    }

    /// Creates a client from the environment.
    ///
    /// - `LITELLM_API_BASE`: base URL (required)
    /// - `LITELLM_API_KEY`: API key (optional)
    /// - `LITELLM_DEFAULT_MODEL`: default model
    pub fn from_env() -> Result<Self, LlmError> {
        let api_base = env::var("LITELLM_API_BASE").map_err(|_| LlmError::MissingApiBase)?;
        let api_key = env::var("LITELLM_API_KEY").ok();
        let default_model =
            env::var("LITELLM_DEFAULT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        Self::new(api_base, api_key, default_model)
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl LlmProvider for LiteLlmClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let body = request.into_wire(&self.default_model);
        let url = format!("{}/chat/completions", self.api_base);

        let mut http_request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-Title", "drupal-bench");
        if let Some(ref api_key) = self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = http_request
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;
        read_response(response).await
    }
}
