//! Typed error taxonomy for the question-answering pipeline.
//!
//! Collaborator failures (embedding, chat model) carry a classification so
//! callers can branch on error kind instead of string-matching messages.
//! Cache load failures are recoverable (the cache falls back to a rebuild);
//! everything else propagates to the caller.

use thiserror::Error;

/// Main error type for corag operations.
#[derive(Error, Debug)]
pub enum CoragError {
    /// Invalid chunking parameters, bad config file, missing credentials.
    /// Fatal, never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// The document could not be read or parsed. No partial cache is written.
    #[error("document extraction failed: {0}")]
    Extraction(String),

    /// The embedding collaborator failed.
    #[error("embedding request failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// The chat-completion collaborator failed.
    #[error("model request failed: {0}")]
    Model(#[from] ModelError),

    /// A persisted index could not be loaded (corruption, schema or
    /// configuration mismatch). Recovered internally by rebuilding.
    #[error("cache load failed: {0}")]
    CacheLoad(String),

    /// Building a new index failed. No partial cache artifact remains.
    #[error("cache build failed: {0}")]
    CacheBuild(String),

    /// The caller cancelled the operation via its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Classified failure from the chat-completion API.
#[derive(Error, Debug)]
pub enum ModelError {
    /// HTTP 429. A candidate for caller-driven retry with backoff.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// HTTP 401/403. Fatal for the session.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// HTTP 402 or a quota/balance rejection. Fatal for the session.
    #[error("insufficient quota: {0}")]
    InsufficientQuota(String),

    /// Network failure, timeout, or an unexpected HTTP status.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body did not match the expected schema.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Classified failure from the embedding API.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Result type for corag operations.
pub type Result<T> = std::result::Result<T, CoragError>;
