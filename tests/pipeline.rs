//! End-to-end pipeline tests with in-process collaborator doubles.
//!
//! The embedding and chat collaborators are replaced by deterministic
//! stubs implementing the public traits, so the full flow — fingerprint,
//! cache build, retrieval loop, synthesis — runs without any network.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use corag::config::Config;
use corag::controller::TerminationReason;
use corag::embedding::EmbeddingClient;
use corag::error::{CoragError, EmbeddingError, ModelError};
use corag::extract::{MIME_PDF, MIME_TEXT};
use corag::llm::{ChatClient, ChatCompletion, ChatMessage, CompletionOptions};
use corag::pipeline::QaPipeline;

/// Deterministic pseudo-embeddings: the vector is a function of the text
/// bytes only, so identical text always lands in the same place.
struct HashEmbeddings {
    batch_sizes: Mutex<Vec<usize>>,
}

impl HashEmbeddings {
    fn new() -> Self {
        Self {
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    fn embed_one(text: &str) -> Vec<f32> {
        let mut v = [0.0f32; 4];
        for (i, b) in text.bytes().enumerate() {
            v[i % 4] += f32::from(b) / 255.0;
        }
        v.to_vec()
    }

    /// Batches larger than one are chunk embeddings from an index build;
    /// single-text batches are query embeddings.
    fn build_batches(&self) -> usize {
        self.batch_sizes
            .lock()
            .unwrap()
            .iter()
            .filter(|&&n| n > 1)
            .count()
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.batch_sizes.lock().unwrap().push(texts.len());
        Ok(texts.iter().map(|t| Self::embed_one(t)).collect())
    }

    fn model_id(&self) -> &str {
        "hash-stub-v1"
    }

    fn dims(&self) -> usize {
        4
    }
}

struct ScriptedChat {
    replies: Mutex<Vec<&'static str>>,
    calls: AtomicUsize,
}

impl ScriptedChat {
    fn new(replies: Vec<&'static str>) -> Self {
        Self {
            replies: Mutex::new(replies),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ChatClient for ScriptedChat {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<ChatCompletion, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            return Err(ModelError::Transport("script exhausted".to_string()));
        }
        Ok(ChatCompletion {
            content: replies.remove(0).to_string(),
            total_tokens: Some(7),
        })
    }
}

const DOCUMENT: &str = "The aurora project started in March. Its budget was twelve thousand \
euros and the team counted five people. The rollout finished in November after a pilot in \
two regions. Customer feedback praised the onboarding flow but flagged slow exports.";

fn test_config(cache_root: &TempDir) -> Config {
    let mut config = Config::default();
    config.cache.root = cache_root.path().to_path_buf();
    config.chunking.chunk_size = 60;
    config.chunking.overlap = 10;
    config.retrieval.top_k = 2;
    config.retrieval.max_iterations = 2;
    config
}

fn pipeline_with(
    cache_root: &TempDir,
    replies: Vec<&'static str>,
) -> (QaPipeline, Arc<HashEmbeddings>, Arc<ScriptedChat>) {
    let embeddings = Arc::new(HashEmbeddings::new());
    let chat = Arc::new(ScriptedChat::new(replies));
    let pipeline = QaPipeline::new(
        test_config(cache_root),
        Arc::clone(&embeddings) as Arc<dyn EmbeddingClient>,
        Arc::clone(&chat) as Arc<dyn ChatClient>,
    );
    (pipeline, embeddings, chat)
}

#[tokio::test]
async fn ask_runs_the_full_flow() {
    let cache_root = TempDir::new().unwrap();
    let (pipeline, _embeddings, chat) = pipeline_with(
        &cache_root,
        vec!["budget details", "Enough", "The budget was twelve thousand euros."],
    );

    let outcome = pipeline
        .ask(
            DOCUMENT.as_bytes(),
            MIME_TEXT,
            "What was the budget?",
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.answer, "The budget was twelve thousand euros.");
    assert_eq!(outcome.termination, TerminationReason::ModelSatisfied);
    assert_eq!(outcome.iterations, 2);
    assert!(!outcome.aggregated_context.is_empty());
    // Two loop consultations plus the synthesis call.
    assert_eq!(chat.calls.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.total_tokens, 21);
}

#[tokio::test]
async fn stop_signal_on_first_iteration_skips_follow_up_retrieval() {
    let cache_root = TempDir::new().unwrap();
    let (pipeline, _embeddings, _chat) =
        pipeline_with(&cache_root, vec!["  ENOUGH  ", "Answer from seed context."]);

    let outcome = pipeline
        .ask(
            DOCUMENT.as_bytes(),
            MIME_TEXT,
            "When did the rollout finish?",
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.termination, TerminationReason::ModelSatisfied);
    assert_eq!(outcome.answer, "Answer from seed context.");
}

#[tokio::test]
async fn identical_bytes_build_the_index_once() {
    let cache_root = TempDir::new().unwrap();
    let (pipeline, embeddings, _chat) = pipeline_with(&cache_root, vec![]);

    let first = pipeline
        .process_document(DOCUMENT.as_bytes(), MIME_TEXT, &CancellationToken::new())
        .await
        .unwrap();
    let second = pipeline
        .process_document(DOCUMENT.as_bytes(), MIME_TEXT, &CancellationToken::new())
        .await
        .unwrap();

    // One chunk-embedding batch: the second call was a cache hit and did
    // not re-extract or re-embed.
    assert_eq!(embeddings.build_batches(), 1);
    assert_eq!(first.len(), second.len());
    for (a, b) in first.entries().iter().zip(second.entries()) {
        assert_eq!(a.chunk.content, b.chunk.content);
        assert_eq!(a.chunk.sequence_index, b.chunk.sequence_index);
    }
}

#[tokio::test]
async fn cache_persists_across_pipeline_instances() {
    let cache_root = TempDir::new().unwrap();

    {
        let (pipeline, embeddings, _chat) = pipeline_with(&cache_root, vec![]);
        pipeline
            .process_document(DOCUMENT.as_bytes(), MIME_TEXT, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(embeddings.build_batches(), 1);
    }

    // A fresh pipeline over the same cache root hits the persisted index.
    let (pipeline, embeddings, _chat) = pipeline_with(&cache_root, vec![]);
    let index = pipeline
        .process_document(DOCUMENT.as_bytes(), MIME_TEXT, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(embeddings.build_batches(), 0);
    assert!(!index.is_empty());
}

#[tokio::test]
async fn distinct_bytes_get_distinct_indexes() {
    let cache_root = TempDir::new().unwrap();
    let (pipeline, embeddings, _chat) = pipeline_with(&cache_root, vec![]);

    pipeline
        .process_document(DOCUMENT.as_bytes(), MIME_TEXT, &CancellationToken::new())
        .await
        .unwrap();
    pipeline
        .process_document(b"a completely different document body", MIME_TEXT, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(embeddings.build_batches(), 1);
    // The second document fits one chunk, so its build batch has size 1;
    // count directories instead to confirm both were cached.
    let entries = std::fs::read_dir(cache_root.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .count();
    assert_eq!(entries, 2);
}

#[tokio::test]
async fn extraction_failure_leaves_no_cache_entry() {
    let cache_root = TempDir::new().unwrap();
    let (pipeline, _embeddings, _chat) = pipeline_with(&cache_root, vec![]);

    let err = pipeline
        .process_document(b"definitely not a pdf", MIME_PDF, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CoragError::Extraction(_)));

    let entries = std::fs::read_dir(cache_root.path())
        .map(|it| it.count())
        .unwrap_or(0);
    assert_eq!(entries, 0, "no partial cache artifact may remain");
}

#[tokio::test]
async fn empty_question_is_rejected() {
    let cache_root = TempDir::new().unwrap();
    let (pipeline, _embeddings, _chat) = pipeline_with(&cache_root, vec![]);

    let err = pipeline
        .ask(
            DOCUMENT.as_bytes(),
            MIME_TEXT,
            "   ",
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoragError::Config(_)));
}

#[tokio::test]
async fn model_failure_surfaces_typed_error() {
    let cache_root = TempDir::new().unwrap();
    // Empty script: the first loop consultation fails.
    let (pipeline, _embeddings, _chat) = pipeline_with(&cache_root, vec![]);

    let err = pipeline
        .ask(
            DOCUMENT.as_bytes(),
            MIME_TEXT,
            "anything?",
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoragError::Model(ModelError::Transport(_))));
}

#[tokio::test]
async fn cancellation_aborts_the_question() {
    let cache_root = TempDir::new().unwrap();
    let (pipeline, _embeddings, _chat) = pipeline_with(&cache_root, vec!["Enough", "answer"]);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = pipeline
        .ask(DOCUMENT.as_bytes(), MIME_TEXT, "q", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CoragError::Cancelled));
}
