//! Embedding indexer and retrieval pipeline
//!
//! Documents are split into overlapping character windows, embedded in
//! bounded batches, and upserted into the vector index under stable
//! content-derived chunk ids so re-ingestion replaces rather than appends.

pub mod embedder;
pub mod retriever;
pub mod store;

pub use embedder::{EmbeddingBackend, HashEmbeddingBackend, HttpEmbeddingClient};
pub use retriever::Retriever;
pub use store::{HostedVectorIndex, InMemoryVectorIndex, VectorIndex};

use crate::config::EmbeddingConfig;
use crate::error::AssistantError;
use crate::models::DocumentChunk;
use crate::Result;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Split text into ordered, overlapping character windows. Consecutive
/// chunks share exactly `chunk_overlap` characters, so content at a chunk
/// boundary stays retrievable from either neighbor.
pub fn chunk_document(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    // chunk_overlap < chunk_size is validated at startup
    let stride = chunk_size - chunk_overlap;
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }

    chunks
}

/// Stable chunk id derived from `(doc_id, position)`. Re-ingesting the same
/// document always maps onto the same id space.
pub fn chunk_id(doc_id: &str, position: usize) -> String {
    let hash = Sha256::digest(format!("{}:{}", doc_id, position).as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes).to_string()
}

/// Splits, embeds and upserts source documents.
pub struct Indexer {
    embedder: Arc<dyn EmbeddingBackend>,
    index: Arc<dyn VectorIndex>,
    batch_size: usize,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Indexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingBackend>,
        index: Arc<dyn VectorIndex>,
        config: &EmbeddingConfig,
    ) -> Result<Self> {
        if embedder.dimension() != index.dimension() {
            return Err(AssistantError::Configuration(format!(
                "embedder dimension {} does not match index dimension {}",
                embedder.dimension(),
                index.dimension()
            )));
        }

        Ok(Self {
            embedder,
            index,
            batch_size: config.batch_size,
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        })
    }

    /// Ingest a document, replacing any chunks from a previous ingestion of
    /// the same id. Batches are embedded and upserted all-or-nothing: a
    /// failed batch aborts ingestion but leaves prior batches intact.
    pub async fn ingest(
        &self,
        doc_id: &str,
        text: &str,
        metadata: HashMap<String, String>,
    ) -> Result<Vec<String>> {
        let pieces = chunk_document(text, self.chunk_size, self.chunk_overlap);

        // Replace, not append: stale chunks must not remain retrievable.
        self.index.delete_document(doc_id).await?;

        let mut ids = Vec::with_capacity(pieces.len());

        for (batch_index, batch) in pieces.chunks(self.batch_size).enumerate() {
            let embeddings = self.embedder.embed(batch).await?;

            if embeddings.len() != batch.len() {
                return Err(AssistantError::EmbeddingBackend(format!(
                    "requested {} embeddings, received {}",
                    batch.len(),
                    embeddings.len()
                )));
            }

            let mut chunks = Vec::with_capacity(batch.len());
            for (offset, (chunk_text, embedding)) in
                batch.iter().zip(embeddings.into_iter()).enumerate()
            {
                let position = batch_index * self.batch_size + offset;
                let id = chunk_id(doc_id, position);
                ids.push(id.clone());
                chunks.push(DocumentChunk {
                    id,
                    source_doc_id: doc_id.to_string(),
                    text: chunk_text.clone(),
                    position,
                    embedding,
                    metadata: metadata.clone(),
                });
            }

            self.index.upsert(chunks).await?;

            debug!(doc_id, batch_index, batch_len = batch.len(), "Batch upserted");
        }

        info!(doc_id, chunk_count = ids.len(), "Document ingested");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EMBEDDING_DIMENSION;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn embedding_config(chunk_size: usize, chunk_overlap: usize, batch_size: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: String::new(),
            api_key: String::new(),
            model: "multilingual-e5-large".to_string(),
            dimension: EMBEDDING_DIMENSION,
            batch_size,
            chunk_size,
            chunk_overlap,
        }
    }

    #[test]
    fn test_chunks_share_exact_overlap() {
        let text: String = ('a'..='z').cycle().take(100).collect();
        let size = 30;
        let overlap = 10;
        let chunks = chunk_document(&text, size, overlap);

        assert!(chunks.len() > 1);
        for window in chunks.windows(2) {
            let prev: Vec<char> = window[0].chars().collect();
            let next: Vec<char> = window[1].chars().collect();
            let tail: String = prev[prev.len() - overlap..].iter().collect();
            let head: String = next[..overlap].iter().collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn test_non_overlapping_parts_reconstruct_document() {
        let text = "The portfolio holds technology and healthcare positions across \
                    several regions, with concentration building in Asian chipmakers.";
        let overlap = 12;
        let chunks = chunk_document(text, 40, overlap);

        let mut rebuilt = chunks[0].clone();
        for chunk in &chunks[1..] {
            let chars: Vec<char> = chunk.chars().collect();
            let suffix: String = chars[overlap..].iter().collect();
            rebuilt.push_str(&suffix);
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_short_document_is_single_chunk() {
        let chunks = chunk_document("tiny", 100, 20);
        assert_eq!(chunks, vec!["tiny".to_string()]);
        assert!(chunk_document("", 100, 20).is_empty());
    }

    #[test]
    fn test_chunk_ids_are_stable() {
        assert_eq!(chunk_id("doc-1", 0), chunk_id("doc-1", 0));
        assert_ne!(chunk_id("doc-1", 0), chunk_id("doc-1", 1));
        assert_ne!(chunk_id("doc-1", 0), chunk_id("doc-2", 0));
    }

    #[tokio::test]
    async fn test_reingest_replaces_previous_chunks() {
        let embedder = Arc::new(HashEmbeddingBackend::new(EMBEDDING_DIMENSION));
        let index = Arc::new(InMemoryVectorIndex::new(EMBEDDING_DIMENSION));
        let indexer = Indexer::new(
            embedder.clone(),
            index.clone(),
            &embedding_config(200, 20, 16),
        )
        .unwrap();

        indexer
            .ingest("doc-1", "zebra zebra zebra migration patterns", HashMap::new())
            .await
            .unwrap();

        let retriever = Retriever::new(embedder.clone(), index.clone()).unwrap();
        let hits = retriever.retrieve("zebra migration", 3).await.unwrap();
        assert!(!hits.is_empty());

        // Replace the document with unrelated content.
        indexer
            .ingest("doc-1", "quarterly bond ladder maturity schedule", HashMap::new())
            .await
            .unwrap();

        let hits = retriever.retrieve("zebra migration", 3).await.unwrap();
        assert!(
            hits.iter().all(|hit| !hit.chunk.text.contains("zebra")),
            "stale chunks must be unretrievable after re-ingestion"
        );
    }

    /// Embedder that fails from the second call onward.
    struct FlakyEmbedder {
        calls: AtomicUsize,
        inner: HashEmbeddingBackend,
    }

    #[async_trait]
    impl EmbeddingBackend for FlakyEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= 1 {
                return Err(AssistantError::EmbeddingBackend(
                    "embedding backend unavailable".to_string(),
                ));
            }
            self.inner.embed(texts).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    #[tokio::test]
    async fn test_failed_batch_aborts_but_keeps_prior_batches() {
        let embedder = Arc::new(FlakyEmbedder {
            calls: AtomicUsize::new(0),
            inner: HashEmbeddingBackend::new(EMBEDDING_DIMENSION),
        });
        let index = Arc::new(InMemoryVectorIndex::new(EMBEDDING_DIMENSION));
        // chunk_size 10 / overlap 2 over ~40 chars with batch_size 2 forces
        // several batches.
        let indexer = Indexer::new(
            embedder,
            index.clone(),
            &embedding_config(10, 2, 2),
        )
        .unwrap();

        let err = indexer
            .ingest("doc-1", "alpha beta gamma delta epsilon zeta eta", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::EmbeddingBackend(_)));

        // The first batch made it in before the failure; it stays intact.
        let query_embedding = HashEmbeddingBackend::new(EMBEDDING_DIMENSION)
            .embed(&["alpha beta".to_string()])
            .await
            .unwrap()
            .pop()
            .unwrap();
        let hits = index.query(&query_embedding, 10).await.unwrap();
        assert_eq!(hits.len(), 2);
    }
}
