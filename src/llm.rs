//! Chat-completion collaborator seam and the OpenAI-compatible provider.
//!
//! The provider speaks the `/chat/completions` wire format used by OpenAI
//! and DeepSeek. The response body is validated against a strict serde
//! schema at the boundary; anything that does not match is a
//! [`ModelError::MalformedResponse`] rather than a panic three layers up.
//!
//! [`ChatSession`] is the per-question conversation state: it owns its
//! message history and token-usage counter, so nothing leaks between
//! unrelated questions and there is no process-wide client state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ModelConfig;
use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A completed model turn.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    /// Total tokens the provider billed for this call, when reported.
    pub total_tokens: Option<u64>,
}

/// Chat-completion collaborator.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<ChatCompletion, ModelError>;
}

/// Provider for any OpenAI-compatible chat completions endpoint.
///
/// DeepSeek is the default target. The provider does not retry; rate-limit
/// and transport errors are classified so a caller can decide to.
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiChat {
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| ModelError::AuthFailed(format!("{} not set", config.api_key_env)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u64,
}

#[async_trait]
impl ChatClient for OpenAiChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<ChatCompletion, ModelError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body_text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::MalformedResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ModelError::MalformedResponse("no choices in response".to_string()))?;

        Ok(ChatCompletion {
            content,
            total_tokens: parsed.usage.map(|u| u.total_tokens),
        })
    }
}

/// Map an HTTP error status to a typed model error.
fn classify_status(status: u16, body: String) -> ModelError {
    match status {
        429 => ModelError::RateLimited(body),
        401 | 403 => ModelError::AuthFailed(body),
        402 => ModelError::InsufficientQuota(body),
        _ => ModelError::Transport(format!("HTTP {}: {}", status, body)),
    }
}

/// Conversation state for one question.
///
/// Constructed per request; carries the system instruction, the message
/// history, and a token-usage counter. Discarded with the session.
pub struct ChatSession<'a> {
    client: &'a dyn ChatClient,
    options: CompletionOptions,
    history: Vec<ChatMessage>,
    system: ChatMessage,
    total_tokens: u64,
}

impl<'a> ChatSession<'a> {
    pub fn new(client: &'a dyn ChatClient, system: impl Into<String>, options: CompletionOptions) -> Self {
        Self {
            client,
            options,
            history: Vec::new(),
            system: ChatMessage::system(system),
            total_tokens: 0,
        }
    }

    /// Send a user turn and return the assistant's reply.
    ///
    /// The system instruction always leads, followed by the full history of
    /// this session. Both sides of the exchange are appended to the history.
    pub async fn send(&mut self, content: impl Into<String>) -> Result<String, ModelError> {
        self.history.push(ChatMessage::user(content));

        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(self.system.clone());
        messages.extend(self.history.iter().cloned());

        let completion = self.client.complete(&messages, &self.options).await?;

        if let Some(tokens) = completion.total_tokens {
            self.total_tokens += tokens;
        }
        self.history.push(ChatMessage::assistant(completion.content.clone()));
        Ok(completion.content)
    }

    /// Tokens billed across all calls of this session.
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }
}
