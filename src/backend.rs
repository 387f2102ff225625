//! Language-model backend client
//!
//! One logical backend per agent role: the HTTP client is shared, but each
//! call carries the role's configured model identifier and temperature.
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::config::{AgentSettings, BackendConfig};
use crate::error::AssistantError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info};

const MAX_OUTPUT_TOKENS: u32 = 1024;

/// A single completion call: system + user prompt, executed with the
/// configured model and temperature of the calling agent role.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub model: String,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(settings: &AgentSettings, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            model: settings.model.clone(),
            temperature: settings.temperature,
        }
    }
}

/// Stateless request/response text-completion backend.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Reusable chat-completions client (connection-pooled)
pub struct HttpCompletionBackend {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpCompletionBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(AssistantError::Backend(
                "OPENROUTER_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}/chat/completions", self.base_url);

        let payload = ChatRequest {
            model: request.model.clone(),
            temperature: request.temperature,
            max_tokens: MAX_OUTPUT_TOKENS,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.user.clone(),
                },
            ],
        };

        info!(model = %request.model, "Calling completion backend");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!("Completion request failed: {}", e);
                if e.is_timeout() {
                    AssistantError::Backend(format!("backend timed out: {}", e))
                } else {
                    AssistantError::Backend(format!("backend request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Backend error response ({}): {}", status, error_text);
            return Err(AssistantError::Backend(format!(
                "backend returned {}: {}",
                status, error_text
            )));
        }

        let completion: ChatResponse = response.json().await.map_err(|e| {
            error!("Failed to parse backend response: {}", e);
            AssistantError::MalformedResponse(format!("backend parse error: {}", e))
        })?;

        let text = completion
            .choices
            .first()
            .map(|choice| choice.message.content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| {
                AssistantError::MalformedResponse("backend returned no choices".to_string())
            })?;

        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Scripted backend for development and testing.
///
/// Replays canned replies in order and records every request it receives,
/// which keeps the full pipeline runnable without network access and lets
/// tests assert on the exact prompts agents produced.
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
    fallback: String,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(String::from).collect()),
            requests: Mutex::new(Vec::new()),
            fallback: "I do not have enough information to answer that.".to_string(),
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// All requests seen so far, in call order.
    pub fn recorded(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("request log poisoned").clone()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests
            .lock()
            .expect("request log poisoned")
            .push(request.clone());

        let reply = self
            .replies
            .lock()
            .expect("reply queue poisoned")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        Ok(reply)
    }
}

/// Backend that always fails; used to exercise degraded paths in tests.
#[cfg(test)]
pub struct FailingBackend;

#[cfg(test)]
#[async_trait]
impl CompletionBackend for FailingBackend {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        Err(AssistantError::MalformedResponse(
            "scripted failure".to_string(),
        ))
    }
}
