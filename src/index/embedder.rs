//! Embedding backend clients
//!
//! The HTTP client talks to a hosted embedding service; the hash-based
//! backend is a deterministic stand-in for development and tests.

use crate::config::EmbeddingConfig;
use crate::error::AssistantError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::warn;

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Produces fixed-dimension embeddings for batches of texts.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;
}

/// HTTP embedding client with bounded retries.
pub struct HttpEmbeddingClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    retry_attempts: u32,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let payload = EmbedRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                AssistantError::EmbeddingBackend(format!("embedding request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::EmbeddingBackend(format!(
                "embedding backend returned {}: {}",
                status, body
            )));
        }

        let envelope: EmbedResponse = response.json().await.map_err(|e| {
            AssistantError::EmbeddingBackend(format!("embedding parse error: {}", e))
        })?;

        let vectors: Vec<Vec<f32>> = envelope
            .data
            .into_iter()
            .map(|item| item.embedding)
            .collect();

        for vector in &vectors {
            if vector.len() != self.dimension {
                return Err(AssistantError::EmbeddingBackend(format!(
                    "expected dimension {}, backend returned {}",
                    self.dimension,
                    vector.len()
                )));
            }
        }

        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut backoff = Duration::from_millis(500);
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            match self.request_embeddings(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    warn!(attempt, "Embedding request failed: {}", e);
                    last_error = Some(e);
                    if attempt < self.retry_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AssistantError::EmbeddingBackend("embedding request failed".to_string())
        }))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedItem>,
}

#[derive(Debug, Deserialize)]
struct EmbedItem {
    embedding: Vec<f32>,
}

/// Deterministic token-hash embedder for development and tests.
///
/// Each token is hashed into a bucket of the output vector, so texts that
/// share words produce vectors with high cosine similarity. No network, no
/// model weights, same output for the same input on every run.
pub struct HashEmbeddingBackend {
    dimension: usize,
}

impl HashEmbeddingBackend {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = Sha256::digest(token.as_bytes());
            let bucket = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]) as usize
                % self.dimension;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingBackend for HashEmbeddingBackend {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embeddings_are_deterministic() {
        let backend = HashEmbeddingBackend::new(64);
        let a = backend.embed(&["sector concentration".to_string()]).await.unwrap();
        let b = backend.embed(&["sector concentration".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[tokio::test]
    async fn test_shared_tokens_raise_similarity() {
        let backend = HashEmbeddingBackend::new(256);
        let vectors = backend
            .embed(&[
                "portfolio sector allocation".to_string(),
                "portfolio sector exposure".to_string(),
                "migratory bird patterns".to_string(),
            ])
            .await
            .unwrap();

        let dot = |a: &[f32], b: &[f32]| -> f32 {
            a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
        };

        assert!(dot(&vectors[0], &vectors[1]) > dot(&vectors[0], &vectors[2]));
    }
}
