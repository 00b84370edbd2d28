//! OpenRouter (OpenAI-compatible) chat completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, CompletionResponse, LlmProvider};

const PROVIDER: &str = "openrouter";

/// Default chat completions endpoint.
pub const DEFAULT_OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Configuration for [`OpenRouterProvider`].
#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    pub api_key: SecretString,
    pub model: String,
    pub url: String,
    /// Per-request timeout covering connect, send and body read.
    pub timeout: Duration,
    /// Ask reasoning-capable models to reason before answering.
    pub reasoning: bool,
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningFlag>,
}

#[derive(Serialize)]
struct ReasoningFlag {
    enabled: bool,
}

#[derive(Deserialize)]
struct ChatResponseBody {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Chat completions over HTTP with a bearer token.
pub struct OpenRouterProvider {
    config: OpenRouterConfig,
    client: reqwest::Client,
}

impl OpenRouterProvider {
    pub fn new(config: OpenRouterConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { config, client })
    }

    fn request_body<'a>(&'a self, request: &'a CompletionRequest) -> ChatRequestBody<'a> {
        ChatRequestBody {
            model: &self.config.model,
            messages: &request.messages,
            reasoning: self.config.reasoning.then_some(ReasoningFlag { enabled: true }),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.request_body(&request);

        let resp = self
            .client
            .post(&self.config.url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.config.timeout))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| transport_error(e, self.config.timeout))?;

        if !status.is_success() {
            return Err(status_error(status, &text));
        }

        let parsed: ChatResponseBody =
            serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: format!("malformed body: {e}"),
            })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "missing choices[0].message.content".to_string(),
            })?;

        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(CompletionResponse {
            content,
            input_tokens,
            output_tokens,
        })
    }
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout {
            provider: PROVIDER.to_string(),
            timeout,
        }
    } else {
        LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Map a non-success status to a typed error, keeping a bounded body excerpt.
fn status_error(status: StatusCode, body: &str) -> LlmError {
    let excerpt: String = body.chars().take(300).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthFailed {
            provider: PROVIDER.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
            provider: PROVIDER.to_string(),
            reason: excerpt,
        },
        _ => LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: format!("HTTP {status}: {excerpt}"),
        },
    }
}
