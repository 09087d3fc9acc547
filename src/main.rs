//! # corag CLI
//!
//! Ask questions about a local document. The first run on a document
//! chunks and embeds it into a fingerprint-keyed cache; later runs on the
//! same bytes reuse the persisted index.
//!
//! ## Usage
//!
//! ```bash
//! # Build (or reuse) the index for a document
//! corag index report.pdf
//!
//! # Ask a question; retrieval and answering use the configured providers
//! corag ask report.pdf "What were the Q3 revenue drivers?"
//! ```
//!
//! Provider credentials come from the environment (`OPENAI_API_KEY` for
//! embeddings, `DEEPSEEK_API_KEY` for chat by default); endpoints, models,
//! chunking, and retrieval budgets come from the TOML config.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use corag::config::load_config;
use corag::embedding::OpenAiEmbeddings;
use corag::extract::content_type_for_path;
use corag::fingerprint::fingerprint;
use corag::llm::OpenAiChat;
use corag::pipeline::QaPipeline;

/// Document question answering with a content-addressed index cache.
#[derive(Parser)]
#[command(
    name = "corag",
    about = "Ask questions about a document using chain-of-retrieval augmented generation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when the file
    /// does not exist.
    #[arg(long, global = true, default_value = "./config/corag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the searchable index for a document (no question asked).
    ///
    /// Prints the document fingerprint. Running it again on identical
    /// bytes is a cache hit and does no embedding work.
    Index {
        /// Document to ingest (.pdf, .md, .txt).
        file: PathBuf,
    },

    /// Answer a question about a document.
    ///
    /// Ensures the document is indexed, runs the iterative retrieval loop,
    /// and prints the synthesized answer.
    Ask {
        /// Document to query (.pdf, .md, .txt).
        file: PathBuf,

        /// The question to answer.
        question: String,

        /// Print the aggregated context segments before the answer.
        #[arg(long)]
        show_context: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let embeddings = Arc::new(OpenAiEmbeddings::new(&config.embedding)?);
    let chat = Arc::new(OpenAiChat::new(&config.model)?);
    let pipeline = QaPipeline::new(config, embeddings, chat);

    // Ctrl-C cancels in-flight collaborator calls instead of killing the
    // process mid-write.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    match cli.command {
        Commands::Index { file } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let content_type = content_type_for_path(&file);
            let index = pipeline
                .process_document(&bytes, content_type, &cancel)
                .await?;
            println!("fingerprint: {}", fingerprint(&bytes));
            println!("chunks indexed: {}", index.len());
        }
        Commands::Ask {
            file,
            question,
            show_context,
        } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let content_type = content_type_for_path(&file);
            let outcome = pipeline
                .ask(&bytes, content_type, &question, &cancel)
                .await?;

            if show_context {
                for (i, segment) in outcome.aggregated_context.iter().enumerate() {
                    println!("--- context {} ---", i + 1);
                    println!("{}", segment.trim());
                }
                println!();
            }
            println!("{}", outcome.answer.trim());
            eprintln!(
                "({} follow-up iteration(s), {} token(s))",
                outcome.iterations, outcome.total_tokens
            );
        }
    }

    Ok(())
}
