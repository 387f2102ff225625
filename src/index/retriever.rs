//! Retriever
//!
//! Embeds a query with the same backend as the indexer and fetches the
//! top-k most similar chunks. "No context" is a valid, common result.

use crate::error::AssistantError;
use crate::index::embedder::EmbeddingBackend;
use crate::index::store::VectorIndex;
use crate::models::ScoredChunk;
use crate::Result;
use std::sync::Arc;
use tracing::debug;

pub struct Retriever {
    embedder: Arc<dyn EmbeddingBackend>,
    index: Arc<dyn VectorIndex>,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever").finish_non_exhaustive()
    }
}

impl Retriever {
    /// A dimension mismatch between embedder and index is a configuration
    /// mistake; it fails construction rather than surfacing mid-query.
    pub fn new(embedder: Arc<dyn EmbeddingBackend>, index: Arc<dyn VectorIndex>) -> Result<Self> {
        if embedder.dimension() != index.dimension() {
            return Err(AssistantError::Configuration(format!(
                "embedder dimension {} does not match index dimension {}",
                embedder.dimension(),
                index.dimension()
            )));
        }
        Ok(Self { embedder, index })
    }

    pub async fn retrieve(&self, query_text: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut vectors = self.embedder.embed(&[query_text.to_string()]).await?;
        let embedding = vectors.pop().ok_or_else(|| {
            AssistantError::EmbeddingBackend("backend returned no query embedding".to_string())
        })?;

        let hits = self.index.query(&embedding, top_k).await?;
        debug!(top_k, hit_count = hits.len(), "Retrieval complete");
        Ok(hits)
    }
}
