//! End-to-end orchestration: document bytes + question → answer.
//!
//! Ties the pieces together in the order the data flows: fingerprint →
//! index cache (build or load) → seed retrieval → iterative retrieval loop
//! → answer synthesis. Collaborators are injected as trait objects so the
//! pipeline itself never knows which provider is behind them.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::answer::{AnswerSynthesizer, SYSTEM_INSTRUCTION};
use crate::cache::IndexCache;
use crate::chunk::chunk_text;
use crate::config::Config;
use crate::controller::{cancellable, ControllerConfig, IterativeRetrieval, TerminationReason};
use crate::embedding::EmbeddingClient;
use crate::error::{CoragError, EmbeddingError, Result};
use crate::extract::extract_text;
use crate::fingerprint::{fingerprint, DocumentFingerprint};
use crate::index::{CachedIndex, IndexEntry, IndexMetadata};
use crate::llm::{ChatClient, ChatSession, CompletionOptions};

/// Everything a caller learns from one answered question.
#[derive(Debug)]
pub struct QaOutcome {
    pub answer: String,
    /// Context segments the answer was synthesized from.
    pub aggregated_context: Vec<String>,
    /// Follow-up iterations the retrieval loop executed.
    pub iterations: usize,
    pub termination: TerminationReason,
    /// Tokens billed across the question's model calls.
    pub total_tokens: u64,
}

/// Document question-answering pipeline with a persistent index cache.
pub struct QaPipeline {
    config: Config,
    embeddings: Arc<dyn EmbeddingClient>,
    chat: Arc<dyn ChatClient>,
    cache: IndexCache,
}

impl QaPipeline {
    pub fn new(
        config: Config,
        embeddings: Arc<dyn EmbeddingClient>,
        chat: Arc<dyn ChatClient>,
    ) -> Self {
        let cache = IndexCache::new(config.cache.root.clone());
        Self {
            config,
            embeddings,
            chat,
            cache,
        }
    }

    /// Convert document bytes into a searchable index, reusing the cached
    /// one when these exact bytes were processed before.
    pub async fn process_document(
        &self,
        bytes: &[u8],
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<CachedIndex> {
        let fp = fingerprint(bytes);
        let expected = self.expected_metadata(&fp);
        let index = self
            .cache
            .get_or_build(&fp, &expected, || {
                self.build_entries(bytes, content_type, cancel)
            })
            .await?;
        info!(fingerprint = %fp, entries = index.len(), "document ready");
        Ok(index)
    }

    /// Answer a question about a document.
    pub async fn ask(
        &self,
        bytes: &[u8],
        content_type: &str,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<QaOutcome> {
        if question.trim().is_empty() {
            return Err(CoragError::Config("question must not be empty".to_string()));
        }

        let index = self.process_document(bytes, content_type, cancel).await?;

        let mut chat = ChatSession::new(
            self.chat.as_ref(),
            SYSTEM_INSTRUCTION,
            CompletionOptions {
                temperature: self.config.model.temperature,
                max_tokens: self.config.model.max_tokens,
            },
        );

        let controller = IterativeRetrieval::new(
            self.embeddings.as_ref(),
            ControllerConfig {
                top_k: self.config.retrieval.top_k,
                max_iterations: self.config.retrieval.max_iterations,
            },
        );
        let session = controller.run(&index, &mut chat, question, cancel).await?;
        info!(
            iterations = session.iterations,
            segments = session.aggregated_context.len(),
            "retrieval loop finished"
        );

        let synthesizer = AnswerSynthesizer::new(self.config.model.input_char_limit);
        let answer = synthesizer
            .answer(&mut chat, question, &session.context_text(), cancel)
            .await?;

        Ok(QaOutcome {
            answer,
            aggregated_context: session.aggregated_context,
            iterations: session.iterations,
            termination: session.termination,
            total_tokens: chat.total_tokens(),
        })
    }

    /// The metadata any cached index for `fp` must match under the current
    /// configuration.
    fn expected_metadata(&self, fp: &DocumentFingerprint) -> IndexMetadata {
        IndexMetadata {
            fingerprint: fp.as_str().to_string(),
            embedding_model: self.embeddings.model_id().to_string(),
            dims: self.embeddings.dims(),
            chunk_size: self.config.chunking.chunk_size,
            overlap: self.config.chunking.overlap,
        }
    }

    /// Cache-miss path: extract, chunk, embed.
    async fn build_entries(
        &self,
        bytes: &[u8],
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<IndexEntry>> {
        let text = extract_text(bytes, content_type)?;
        let chunks = chunk_text(
            &text,
            self.config.chunking.chunk_size,
            self.config.chunking.overlap,
        )?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = cancellable(cancel, self.embeddings.embed(&texts)).await??;

        if vectors.len() != chunks.len() {
            return Err(CoragError::Embedding(EmbeddingError::MalformedResponse(
                format!("embedded {} of {} chunks", vectors.len(), chunks.len()),
            )));
        }

        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
            .collect())
    }
}
