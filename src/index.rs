//! Persisted per-document vector index.
//!
//! Each fingerprint owns one SQLite file holding the document's chunks and
//! their embeddings, plus a `meta` table describing how the index was built
//! (embedding model, dims, chunking parameters). The metadata lets the cache
//! detect a configuration mismatch on load and force a rebuild instead of
//! silently reusing vectors from a different model or chunking.
//!
//! Entries are loaded fully into memory; ranking happens in
//! [`crate::retrieve`], never against the database. A loaded index is
//! read-only.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::chunk::Chunk;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{CoragError, Result};

const SCHEMA_VERSION: &str = "1";

/// Build-time parameters recorded inside every index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetadata {
    /// Fingerprint of the document this index was built from.
    pub fingerprint: String,
    /// Embedding model identifier used for every entry.
    pub embedding_model: String,
    /// Vector dimensionality.
    pub dims: usize,
    /// Chunk size the document was split with.
    pub chunk_size: usize,
    /// Chunk overlap the document was split with.
    pub overlap: usize,
}

/// One embedded chunk, owned by the index of its fingerprint.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// In-memory form of a persisted document index.
#[derive(Debug, Clone)]
pub struct CachedIndex {
    metadata: IndexMetadata,
    entries: Vec<IndexEntry>,
}

impl CachedIndex {
    /// Assemble an index from freshly built entries. Entries are kept in
    /// `sequence_index` order regardless of input order.
    pub fn new(metadata: IndexMetadata, mut entries: Vec<IndexEntry>) -> Self {
        entries.sort_by_key(|e| e.chunk.sequence_index);
        Self { metadata, entries }
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the index to a SQLite file at `db_path`.
    ///
    /// The caller is responsible for atomicity: this writes into a staging
    /// location that is renamed into the cache only once persist returns.
    pub async fn persist(&self, db_path: &Path) -> Result<()> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let pool = connect(db_path, true).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                seq INTEGER PRIMARY KEY,
                content TEXT NOT NULL,
                source_offset INTEGER NOT NULL,
                overlap INTEGER NOT NULL,
                embedding BLOB NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await?;

        let mut tx = pool.begin().await?;

        let meta_rows = [
            ("schema_version", SCHEMA_VERSION.to_string()),
            ("fingerprint", self.metadata.fingerprint.clone()),
            ("embedding_model", self.metadata.embedding_model.clone()),
            ("dims", self.metadata.dims.to_string()),
            ("chunk_size", self.metadata.chunk_size.to_string()),
            ("overlap", self.metadata.overlap.to_string()),
            ("created_at", chrono::Utc::now().timestamp().to_string()),
        ];
        for (key, value) in meta_rows {
            sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        for entry in &self.entries {
            sqlx::query(
                "INSERT INTO entries (seq, content, source_offset, overlap, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(entry.chunk.sequence_index as i64)
            .bind(&entry.chunk.content)
            .bind(entry.chunk.source_offset as i64)
            .bind(entry.chunk.overlap_with_previous as i64)
            .bind(vec_to_blob(&entry.embedding))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        pool.close().await;
        Ok(())
    }

    /// Load an index from `db_path` and verify it was built with the
    /// expected configuration.
    ///
    /// Every failure — missing file, corruption, schema version drift, or a
    /// metadata mismatch against `expected` — is a [`CoragError::CacheLoad`];
    /// the cache treats it as recoverable and rebuilds.
    pub async fn load(db_path: &Path, expected: &IndexMetadata) -> Result<Self> {
        if !db_path.exists() {
            return Err(CoragError::CacheLoad(format!(
                "index file missing: {}",
                db_path.display()
            )));
        }

        let pool = connect(db_path, false)
            .await
            .map_err(|e| CoragError::CacheLoad(e.to_string()))?;

        let result = Self::load_inner(&pool, expected).await;
        pool.close().await;
        result
    }

    async fn load_inner(pool: &SqlitePool, expected: &IndexMetadata) -> Result<Self> {
        let meta_rows = sqlx::query("SELECT key, value FROM meta")
            .fetch_all(pool)
            .await
            .map_err(|e| CoragError::CacheLoad(format!("meta table unreadable: {}", e)))?;

        let mut get = |name: &str| -> Result<String> {
            meta_rows
                .iter()
                .find(|row| row.get::<String, _>("key") == name)
                .map(|row| row.get::<String, _>("value"))
                .ok_or_else(|| CoragError::CacheLoad(format!("missing meta key: {}", name)))
        };

        let schema_version = get("schema_version")?;
        if schema_version != SCHEMA_VERSION {
            return Err(CoragError::CacheLoad(format!(
                "schema version mismatch: found {}, expected {}",
                schema_version, SCHEMA_VERSION
            )));
        }

        let metadata = IndexMetadata {
            fingerprint: get("fingerprint")?,
            embedding_model: get("embedding_model")?,
            dims: parse_meta(&get("dims")?, "dims")?,
            chunk_size: parse_meta(&get("chunk_size")?, "chunk_size")?,
            overlap: parse_meta(&get("overlap")?, "overlap")?,
        };

        if metadata != *expected {
            return Err(CoragError::CacheLoad(format!(
                "index built with different configuration (model {} dims {} chunk {}/{}), expected (model {} dims {} chunk {}/{})",
                metadata.embedding_model,
                metadata.dims,
                metadata.chunk_size,
                metadata.overlap,
                expected.embedding_model,
                expected.dims,
                expected.chunk_size,
                expected.overlap,
            )));
        }

        let rows = sqlx::query(
            "SELECT seq, content, source_offset, overlap, embedding FROM entries ORDER BY seq ASC",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| CoragError::CacheLoad(format!("entries table unreadable: {}", e)))?;

        let entries = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                IndexEntry {
                    chunk: Chunk {
                        content: row.get("content"),
                        sequence_index: row.get::<i64, _>("seq") as usize,
                        source_offset: row.get::<i64, _>("source_offset") as usize,
                        overlap_with_previous: row.get::<i64, _>("overlap") as usize,
                    },
                    embedding: blob_to_vec(&blob),
                }
            })
            .collect();

        Ok(Self { metadata, entries })
    }
}

fn parse_meta(value: &str, name: &str) -> Result<usize> {
    value
        .parse::<usize>()
        .map_err(|_| CoragError::CacheLoad(format!("meta key {} is not a number: {}", name, value)))
}

async fn connect(db_path: &Path, create: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .map_err(CoragError::Storage)?
        .create_if_missing(create)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    Ok(pool)
}
