//! Iterative retrieval loop: the model decides whether to fetch more.
//!
//! One question runs as `SEEDED → ITERATING → DONE` (or fails). The seed
//! step retrieves against the original question; each iteration then shows
//! the model everything aggregated so far and asks for either a follow-up
//! search query or the literal stop signal `"Enough"`. Follow-up queries are
//! retrieved and any chunk text not yet aggregated is appended, in the order
//! it was first retrieved, never twice.
//!
//! The loop is bounded by `max_iterations` and strictly sequential: every
//! follow-up query is derived from the model's read of all prior context,
//! so no fan-out across iterations is possible. Collaborator failures are
//! never swallowed; they terminate the session with the cause. The
//! caller-supplied cancellation token is observed at every suspension point.

use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::embedding::EmbeddingClient;
use crate::error::{CoragError, Result};
use crate::index::CachedIndex;
use crate::llm::ChatSession;
use crate::retrieve::{RetrievalResult, Retriever};

/// Reply that ends the loop, compared case-insensitively after trimming.
const STOP_SIGNAL: &str = "enough";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The model replied with the stop signal.
    ModelSatisfied,
    /// The iteration budget ran out before the model was satisfied.
    IterationBudgetExhausted,
}

/// Final state of one question's retrieval loop.
#[derive(Debug)]
pub struct RetrievalSession {
    pub question: String,
    /// De-duplicated chunk texts in the order they were first retrieved.
    pub aggregated_context: Vec<String>,
    /// Follow-up iterations actually executed (model consultations).
    pub iterations: usize,
    pub termination: TerminationReason,
}

impl RetrievalSession {
    /// The aggregated context as one block, ready for answer synthesis.
    pub fn context_text(&self) -> String {
        self.aggregated_context.join("\n")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    /// Chunks fetched per retrieval.
    pub top_k: usize,
    /// Follow-up budget. The seed retrieval is not counted.
    pub max_iterations: usize,
}

/// Drives the retrieval loop for one index.
pub struct IterativeRetrieval<'a> {
    retriever: Retriever<'a>,
    config: ControllerConfig,
}

impl<'a> IterativeRetrieval<'a> {
    pub fn new(embeddings: &'a dyn EmbeddingClient, config: ControllerConfig) -> Self {
        Self {
            retriever: Retriever::new(embeddings),
            config,
        }
    }

    /// Run the loop to completion and return the terminal session.
    ///
    /// Errors are the FAILED state: the underlying collaborator failure (or
    /// [`CoragError::Cancelled`]) comes back unchanged, with no automatic
    /// retry.
    pub async fn run(
        &self,
        index: &CachedIndex,
        chat: &mut ChatSession<'_>,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<RetrievalSession> {
        let mut aggregated: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        // Seed from the original question.
        let results = cancellable(cancel, self.retriever.search(index, question, self.config.top_k))
            .await??;
        aggregate(&mut aggregated, &mut seen, &results);
        debug!(segments = aggregated.len(), "seeded context");

        for iteration in 1..=self.config.max_iterations {
            let prompt = follow_up_prompt(question, &aggregated);
            let reply = cancellable(cancel, chat.send(prompt)).await??;

            if is_stop_signal(&reply) {
                debug!(iteration, "model signalled enough context");
                return Ok(RetrievalSession {
                    question: question.to_string(),
                    aggregated_context: aggregated,
                    iterations: iteration,
                    termination: TerminationReason::ModelSatisfied,
                });
            }

            debug!(iteration, query = %reply.trim(), "follow-up retrieval");
            let results = cancellable(
                cancel,
                self.retriever.search(index, reply.trim(), self.config.top_k),
            )
            .await??;
            let added = aggregate(&mut aggregated, &mut seen, &results);
            debug!(iteration, added, total = aggregated.len(), "aggregated follow-up context");
        }

        Ok(RetrievalSession {
            question: question.to_string(),
            aggregated_context: aggregated,
            iterations: self.config.max_iterations,
            termination: TerminationReason::IterationBudgetExhausted,
        })
    }
}

/// Append chunk texts that have not been aggregated yet, preserving result
/// order. Returns how many were new.
fn aggregate(
    aggregated: &mut Vec<String>,
    seen: &mut HashSet<String>,
    results: &RetrievalResult,
) -> usize {
    let mut added = 0;
    for hit in results {
        if seen.insert(hit.chunk.content.clone()) {
            aggregated.push(hit.chunk.content.clone());
            added += 1;
        }
    }
    added
}

fn is_stop_signal(reply: &str) -> bool {
    reply.trim().eq_ignore_ascii_case(STOP_SIGNAL)
}

fn follow_up_prompt(question: &str, aggregated: &[String]) -> String {
    format!(
        "Context:\n{}\n\nQuestion: {}\n\nIf the context above is sufficient to answer the \
         question, reply with exactly \"Enough\". Otherwise reply with one short search query \
         for the missing information, and nothing else.",
        aggregated.join("\n"),
        question
    )
}

/// Race a collaborator call against the cancellation token. Cancellation
/// wins deterministically when both are ready.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = T>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CoragError::Cancelled),
        out = fut => Ok(out),
    }
}
