//! Top-k semantic retrieval against a cached index.
//!
//! The query is embedded by the collaborator, every index entry is ranked by
//! cosine similarity, and the best `k` chunks come back in descending score
//! order with ties broken by ascending `sequence_index` so results are
//! deterministic. The index is never mutated.

use crate::embedding::{cosine_similarity, EmbeddingClient};
use crate::error::{CoragError, Result};
use crate::index::CachedIndex;

/// One ranked retrieval hit.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: crate::chunk::Chunk,
    pub score: f32,
}

/// Ranked hits, highest similarity first, length ≤ requested k.
pub type RetrievalResult = Vec<ScoredChunk>;

/// Performs semantic lookups for query strings.
pub struct Retriever<'a> {
    embeddings: &'a dyn EmbeddingClient,
}

impl<'a> Retriever<'a> {
    pub fn new(embeddings: &'a dyn EmbeddingClient) -> Self {
        Self { embeddings }
    }

    /// Rank all entries of `index` against `query` and return the top `k`.
    ///
    /// An empty index yields an empty result, not an error. An embedding
    /// failure propagates as a retrieval error.
    pub async fn search(
        &self,
        index: &CachedIndex,
        query: &str,
        k: usize,
    ) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(CoragError::Config("retrieval k must be >= 1".to_string()));
        }
        if index.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = self.embeddings.embed(&[query.to_string()]).await?;
        let query_vec = vectors.pop().ok_or_else(|| {
            CoragError::Embedding(crate::error::EmbeddingError::MalformedResponse(
                "empty embedding batch for query".to_string(),
            ))
        })?;

        Ok(rank(index, &query_vec, k))
    }
}

/// Pure ranking step, separated so it can be tested without a collaborator.
fn rank(index: &CachedIndex, query_vec: &[f32], k: usize) -> RetrievalResult {
    let mut scored: Vec<ScoredChunk> = index
        .entries()
        .iter()
        .map(|entry| ScoredChunk {
            chunk: entry.chunk.clone(),
            score: cosine_similarity(query_vec, &entry.embedding),
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk.sequence_index.cmp(&b.chunk.sequence_index))
    });
    scored.truncate(k);
    scored
}
