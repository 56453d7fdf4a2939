//! Chat-completion capability: the seam to the LLM collaborator.
//!
//! The extraction core needs exactly one thing from an LLM: text in, text
//! out, at a caller-chosen temperature and output budget. That contract is
//! [`ChatCompletion`]; the orchestrator owns retry policy and JSON repair,
//! so implementations stay thin.
//!
//! [`ChatApiClient`] is the built-in implementation, speaking the
//! OpenAI-compatible `/v1/chat/completions` shape that local inference
//! servers (Ollama, LM Studio, vLLM) and the hosted providers all accept.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LlmError;

/// Sampling knobs for a single completion call.
#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    /// Low values keep the model faithful to the OCR text; extraction runs
    /// at 0.1 for near-deterministic output.
    pub temperature: f32,
    /// Output token cap; protects against runaway completions.
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 4096,
        }
    }
}

/// Chat-completion collaborator contract.
///
/// Implementations must be `Send + Sync`; one client serves all concurrent
/// extraction requests.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Run one completion. An `Ok` with an empty string means the endpoint
    /// answered but produced no content — the orchestrator treats that as a
    /// retryable failure.
    async fn complete(
        &self,
        system_prompt: &str,
        user_text: &str,
        options: &CompletionOptions,
    ) -> Result<String, LlmError>;
}

/// Configuration for [`ChatApiClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatApiConfig {
    /// Endpoint base, e.g. `http://localhost:11434/v1` or
    /// `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    /// Bearer token; omitted from the request when `None` (local servers).
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Reqwest-based client for OpenAI-compatible chat endpoints.
pub struct ChatApiClient {
    config: ChatApiConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatApiClient {
    pub fn new(config: ChatApiConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::Connection(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl ChatCompletion for ChatApiClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_text: &str,
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_text,
                },
            ],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        debug!(
            "chat completion: model={} temperature={} max_tokens={}",
            self.config.model, options.temperature, options.max_tokens
        );

        let mut builder = self.client.post(&url).json(&request);
        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(content)
    }
}
