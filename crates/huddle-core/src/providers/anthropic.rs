//! Anthropic Messages API provider

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::types::{ChatRequest, ChatResponse, ChatUsage, LlmProvider, Part, StopReason, ToolDefinition, Turn};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    max_retries: u32,
    base_retry_delay: Duration,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, base_url: String, max_tokens: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            max_tokens,
            max_retries: 2,
            base_retry_delay: Duration::from_millis(500),
        })
    }

    /// Retries for rate limits and overloaded or failing servers, with
    /// exponential backoff starting at `base_delay`
    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_retry_delay = base_delay;
        self
    }

    async fn send_once(&self, body: &MessagesRequest<'_>) -> Result<MessagesResponse, CallError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CallError::Status(status, api_error_message(&text)));
        }
        response
            .json()
            .await
            .map_err(|e| CallError::Decode(e.to_string()))
    }
}

/// Why a single request failed
#[derive(Debug)]
enum CallError {
    Transport(String),
    Status(StatusCode, String),
    Decode(String),
}

impl CallError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            // 529 (overloaded) is a server error
            Self::Status(status, _) => *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
            Self::Decode(_) => false,
        }
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "request failed: {}", e),
            Self::Status(status, message) => write!(f, "status {}: {}", status, message),
            Self::Decode(e) => write!(f, "invalid response: {}", e),
        }
    }
}

/// The `error.message` field of an API error body, or the raw body
fn api_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) if body.trim().is_empty() => "no error details".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest<'_>) -> Result<ChatResponse> {
        let body = MessagesRequest {
            model: request.model,
            max_tokens: self.max_tokens,
            system: request.system,
            messages: request.turns,
            tools: request.tools,
        };
        debug!("Anthropic request: model={}, turns={}", request.model, request.turns.len());

        let mut attempt = 0;
        loop {
            match self.send_once(&body).await {
                Ok(resp) => {
                    debug!(
                        "Anthropic response: parts={}, stop_reason={:?}",
                        resp.content.len(),
                        resp.stop_reason
                    );
                    return Ok(resp.into());
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.base_retry_delay * 2u32.pow(attempt);
                    attempt += 1;
                    warn!("Anthropic {} (retry {} in {:?})", e, attempt, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(anyhow!("Anthropic API {}", e)),
            }
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [Turn],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<Part>,
    #[serde(default)]
    stop_reason: Option<StopReason>,
    usage: ChatUsage,
}

impl From<MessagesResponse> for ChatResponse {
    fn from(resp: MessagesResponse) -> Self {
        Self {
            parts: resp.content,
            stop_reason: resp.stop_reason.unwrap_or_default(),
            usage: resp.usage,
        }
    }
}
