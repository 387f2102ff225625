//! Speech collaborator interface
//!
//! Consumed only through its contract: audio in, text out and back again.
//! Invoked before/after the core pipeline, never inside it.

use crate::error::AssistantError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[async_trait]
pub trait SpeechService: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String>;
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// HTTP client for a hosted speech service.
pub struct HttpSpeechService {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpSpeechService {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
}

#[async_trait]
impl SpeechService for HttpSpeechService {
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        let url = format!("{}/v1/transcribe", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| AssistantError::Speech(format!("transcription request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AssistantError::Speech(format!(
                "transcription returned {}",
                response.status()
            )));
        }

        let body: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| AssistantError::Speech(format!("invalid transcription response: {}", e)))?;

        Ok(body.text)
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let url = format!("{}/v1/synthesize", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&SynthesizeRequest { text })
            .send()
            .await
            .map_err(|e| AssistantError::Speech(format!("synthesis request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AssistantError::Speech(format!(
                "synthesis returned {}",
                response.status()
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| AssistantError::Speech(format!("failed to read audio body: {}", e)))?;

        Ok(audio.to_vec())
    }
}
