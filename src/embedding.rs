//! Embedding collaborator seam and the OpenAI-compatible HTTP provider.
//!
//! All vectors inside one index must come from the same model/version; the
//! index stores the model id so a mismatch forces a rebuild instead of
//! silently mixing vector spaces.
//!
//! Also provides vector utilities shared with the index storage layer:
//! - [`cosine_similarity`] — the ranking metric used by retrieval
//! - [`vec_to_blob`] / [`blob_to_vec`] — little-endian f32 codec for
//!   SQLite BLOB columns
//!
//! # Retry strategy
//!
//! The HTTP provider retries transient failures with exponential backoff:
//! HTTP 429 and 5xx and network errors retry (1s, 2s, 4s, ... capped at
//! 2^5); other 4xx fail immediately. Retrying here rather than in the
//! retrieval loop keeps the loop itself free of retry policy.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;

/// Produces fixed-length vectors for text.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Model identifier recorded in every index built with this client.
    fn model_id(&self) -> &str;

    /// Vector dimensionality the model produces.
    fn dims(&self) -> usize;
}

/// Embedding provider for any OpenAI-compatible `/v1/embeddings` endpoint.
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
}

impl OpenAiEmbeddings {
    /// Build a provider from configuration. The API key is read from the
    /// configured environment variable; a missing key is reported as an
    /// authentication failure up front rather than on the first request.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            EmbeddingError::AuthFailed(format!("{} not set", config.api_key_env))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims: config.dims,
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/v1/embeddings", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: EmbeddingsResponse = response.json().await.map_err(|e| {
                            EmbeddingError::MalformedResponse(e.to_string())
                        })?;
                        return order_embeddings(parsed, texts.len());
                    }

                    let body_text = response.text().await.unwrap_or_default();

                    if status.as_u16() == 429 {
                        last_err = Some(EmbeddingError::RateLimited(body_text));
                        continue;
                    }
                    if status.is_server_error() {
                        last_err = Some(EmbeddingError::Transport(format!(
                            "HTTP {}: {}",
                            status, body_text
                        )));
                        continue;
                    }
                    if status.as_u16() == 401 || status.as_u16() == 403 {
                        return Err(EmbeddingError::AuthFailed(body_text));
                    }
                    return Err(EmbeddingError::Transport(format!(
                        "HTTP {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(EmbeddingError::Transport(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| EmbeddingError::Transport("retries exhausted".to_string())))
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Reorder response items by their reported index and check the count
/// matches the request. The API documents in-order delivery but the index
/// field is authoritative.
fn order_embeddings(
    parsed: EmbeddingsResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if parsed.data.len() != expected {
        return Err(EmbeddingError::MalformedResponse(format!(
            "expected {} embeddings, got {}",
            expected,
            parsed.data.len()
        )));
    }

    let mut items = parsed.data;
    items.sort_by_key(|item| item.index);
    Ok(items.into_iter().map(|item| item.embedding).collect())
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors, in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_or_empty_is_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn order_embeddings_sorts_by_index() {
        let parsed = EmbeddingsResponse {
            data: vec![
                EmbeddingItem {
                    index: 1,
                    embedding: vec![1.0],
                },
                EmbeddingItem {
                    index: 0,
                    embedding: vec![0.0],
                },
            ],
        };
        let out = order_embeddings(parsed, 2).unwrap();
        assert_eq!(out, vec![vec![0.0], vec![1.0]]);
    }

    #[test]
    fn order_embeddings_rejects_count_mismatch() {
        let parsed = EmbeddingsResponse {
            data: vec![EmbeddingItem {
                index: 0,
                embedding: vec![0.0],
            }],
        };
        let err = order_embeddings(parsed, 2).unwrap_err();
        assert!(matches!(err, EmbeddingError::MalformedResponse(_)));
    }
}
