//! # corag
//!
//! Cache-backed document question answering with chain-of-retrieval.
//!
//! A document is fingerprinted, chunked, embedded, and persisted as a
//! searchable index exactly once; questions then run an iterative retrieval
//! loop where the language model itself decides whether more context is
//! needed before the final answer is synthesized.
//!
//! ## Architecture
//!
//! ```text
//! bytes ──▶ fingerprint ──▶ index cache ──▶ retrieval loop ──▶ answer
//!                            │  build:           │
//!                            │  extract          ├─ retriever (embed + rank)
//!                            │  chunk            └─ chat model ("Enough"?)
//!                            │  embed
//!                            └─ SQLite per fingerprint
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed error taxonomy |
//! | [`fingerprint`] | Content-addressed document identity |
//! | [`extract`] | PDF / plain-text extraction |
//! | [`chunk`] | Overlapping character chunker |
//! | [`embedding`] | Embedding collaborator seam |
//! | [`index`] | Persisted per-document vector index |
//! | [`cache`] | Fingerprint-keyed index cache |
//! | [`retrieve`] | Top-k semantic retrieval |
//! | [`llm`] | Chat collaborator seam and per-question sessions |
//! | [`controller`] | Iterative retrieval loop |
//! | [`answer`] | Final answer synthesis |
//! | [`pipeline`] | End-to-end orchestration |

pub mod answer;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod controller;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod index;
pub mod llm;
pub mod pipeline;
pub mod retrieve;
