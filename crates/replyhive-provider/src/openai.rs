use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{LlmProvider, LlmRequest, LlmResponse};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure talking to a chat-completions endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("chat request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("chat endpoint unreachable: {0}")]
    Connect(String),
    #[error("chat endpoint returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("chat endpoint returned no choices")]
    NoChoices,
    #[error("chat transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ChatError {
    /// Whether the same request may succeed if sent again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connect(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::NoChoices | Self::Transport(_) => false,
        }
    }
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
///
/// Local servers (ollama, llama.cpp) work without a key.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn post(&self, url: String) -> reqwest::RequestBuilder {
        let builder = self.client.post(url).timeout(self.timeout);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, ChatError> {
        let body = CompletionBody::from(request);
        let resp = self
            .post(format!("{}/chat/completions", self.api_base))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChatError::Timeout(self.timeout)
                } else if e.is_connect() {
                    ChatError::Connect(e.to_string())
                } else {
                    ChatError::Transport(e)
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let raw = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&raw)
                .map(|env| env.error.message)
                .unwrap_or(raw);
            return Err(ChatError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let completion: Completion = resp.json().await?;
        let usage = completion.usage;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or(ChatError::NoChoices)?;

        Ok(LlmResponse {
            text: choice.message.content.unwrap_or_default(),
            input_tokens: usage.map(|u| u.prompt_tokens),
            output_tokens: usage.map(|u| u.completion_tokens),
            stop_reason: choice.finish_reason,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let model = request.model.clone();
        match self.complete(request).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                tracing::warn!(%model, retryable = e.is_retryable(), error = %e, "chat completion failed");
                Err(e.into())
            }
        }
    }

    async fn health(&self) -> Result<()> {
        let mut builder = self
            .client
            .get(format!("{}/models", self.api_base))
            .timeout(self.timeout);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let status = builder.send().await?.status();
        if !status.is_success() {
            return Err(ChatError::Status {
                status: status.as_u16(),
                message: "model listing failed".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

// ───────────────────────────── Wire format ─────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionBody {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

impl From<LlmRequest> for CompletionBody {
    fn from(request: LlmRequest) -> Self {
        let system = request.system.map(|content| WireMessage {
            role: "system".to_string(),
            content,
        });
        let messages = system
            .into_iter()
            .chain(
                request
                    .messages
                    .into_iter()
                    .filter(|m| !m.content.is_empty())
                    .map(|m| WireMessage {
                        role: m.role,
                        content: m.content,
                    }),
            )
            .collect();
        Self {
            model: request.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}
