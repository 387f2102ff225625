//! Vector index backends
//!
//! The hosted index is the production path; the in-memory index backs
//! development and tests. Both enforce the configured dimension and break
//! similarity ties by insertion recency.

use crate::config::VectorIndexConfig;
use crate::error::AssistantError;
use crate::models::{DocumentChunk, ScoredChunk};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Nearest-neighbor index over fixed-dimension embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, chunks: Vec<DocumentChunk>) -> Result<()>;
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>>;
    async fn delete_document(&self, source_doc_id: &str) -> Result<()>;
    fn dimension(&self) -> usize;
}

struct IndexEntry {
    chunk: DocumentChunk,
    seq: u64,
}

/// In-memory index for development and tests.
pub struct InMemoryVectorIndex {
    entries: Arc<RwLock<Vec<IndexEntry>>>,
    next_seq: AtomicU64,
    dimension: usize,
}

impl InMemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            next_seq: AtomicU64::new(0),
            dimension,
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, chunks: Vec<DocumentChunk>) -> Result<()> {
        let mut entries = self.entries.write().await;

        for chunk in chunks {
            if chunk.embedding.len() != self.dimension {
                return Err(AssistantError::Index(format!(
                    "chunk {} has dimension {}, index expects {}",
                    chunk.id,
                    chunk.embedding.len(),
                    self.dimension
                )));
            }

            entries.retain(|entry| entry.chunk.id != chunk.id);
            let seq = self.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
            entries.push(IndexEntry { chunk, seq });
        }

        Ok(())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        if embedding.len() != self.dimension {
            return Err(AssistantError::Index(format!(
                "query dimension {} does not match index dimension {}",
                embedding.len(),
                self.dimension
            )));
        }

        let entries = self.entries.read().await;
        if entries.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, u64, DocumentChunk)> = entries
            .iter()
            .map(|entry| {
                (
                    cosine_similarity(embedding, &entry.chunk.embedding),
                    entry.seq,
                    entry.chunk.clone(),
                )
            })
            .collect();

        // Descending by score; ties broken by insertion recency.
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then(b.1.cmp(&a.1))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, _, chunk)| ScoredChunk { chunk, score })
            .collect())
    }

    async fn delete_document(&self, source_doc_id: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.retain(|entry| entry.chunk.source_doc_id != source_doc_id);
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Client for the hosted nearest-neighbor index service.
pub struct HostedVectorIndex {
    client: Client,
    base_url: String,
    api_key: String,
    namespace: String,
    dimension: usize,
}

impl HostedVectorIndex {
    pub fn new(config: &VectorIndexConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(AssistantError::Configuration(
                "VECTOR_INDEX_BASE_URL is not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            namespace: config.index_name.clone(),
            dimension: config.dimension,
        })
    }

    async fn post<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .header("Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AssistantError::Index(format!("index request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::Index(format!(
                "index returned {} for {}: {}",
                status, path, body
            )));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| AssistantError::Index(format!("invalid index response: {}", e)))
    }
}

#[derive(Debug, Serialize)]
struct UpsertRequest {
    vectors: Vec<VectorRecord>,
    namespace: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorRecord {
    id: String,
    values: Vec<f32>,
    metadata: VectorMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorMetadata {
    source_doc_id: String,
    text: String,
    position: usize,
    #[serde(default)]
    extra: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct QueryRequest {
    vector: Vec<f32>,
    top_k: usize,
    namespace: String,
    include_values: bool,
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    score: f32,
    #[serde(default)]
    values: Vec<f32>,
    metadata: VectorMetadata,
}

#[derive(Debug, Serialize)]
struct DeleteRequest {
    filter: HashMap<String, String>,
    namespace: String,
}

#[async_trait]
impl VectorIndex for HostedVectorIndex {
    async fn upsert(&self, chunks: Vec<DocumentChunk>) -> Result<()> {
        let vectors = chunks
            .into_iter()
            .map(|chunk| VectorRecord {
                id: chunk.id,
                values: chunk.embedding,
                metadata: VectorMetadata {
                    source_doc_id: chunk.source_doc_id,
                    text: chunk.text,
                    position: chunk.position,
                    extra: chunk.metadata,
                },
            })
            .collect();

        let request = UpsertRequest {
            vectors,
            namespace: self.namespace.clone(),
        };
        let _: serde_json::Value = self.post("/vectors/upsert", &request).await?;
        Ok(())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        if embedding.len() != self.dimension {
            return Err(AssistantError::Index(format!(
                "query dimension {} does not match index dimension {}",
                embedding.len(),
                self.dimension
            )));
        }

        let request = QueryRequest {
            vector: embedding.to_vec(),
            top_k,
            namespace: self.namespace.clone(),
            include_values: true,
            include_metadata: true,
        };
        let response: QueryResponse = self.post("/query", &request).await?;

        Ok(response
            .matches
            .into_iter()
            .take(top_k)
            .map(|m| ScoredChunk {
                chunk: DocumentChunk {
                    id: m.id,
                    source_doc_id: m.metadata.source_doc_id,
                    text: m.metadata.text,
                    position: m.metadata.position,
                    embedding: m.values,
                    metadata: m.metadata.extra,
                },
                score: m.score,
            })
            .collect())
    }

    async fn delete_document(&self, source_doc_id: &str) -> Result<()> {
        let mut filter = HashMap::new();
        filter.insert("source_doc_id".to_string(), source_doc_id.to_string());

        let request = DeleteRequest {
            filter,
            namespace: self.namespace.clone(),
        };
        let _: serde_json::Value = self.post("/vectors/delete", &request).await?;
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
