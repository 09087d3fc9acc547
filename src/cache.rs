//! Fingerprint-keyed index cache: build-on-miss, load-on-hit.
//!
//! Layout: `<root>/<fingerprint>/index.sqlite`, one directory per document.
//! An empty or missing directory is a miss. A directory that exists but
//! fails to load (corruption, schema drift, configuration mismatch) is
//! logged and rebuilt — a load failure is recoverable, never fatal.
//!
//! Two guarantees the layout alone does not give:
//!
//! - **Single builder per fingerprint**: concurrent callers for the same
//!   fingerprint serialize on a per-fingerprint async mutex; the losers find
//!   the winner's result on disk and load it instead of re-running the
//!   embedding work.
//! - **Atomic publication**: a new index is persisted into a staging
//!   directory under the cache root and renamed into place, so a concurrent
//!   reader never observes a partially written index.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CoragError, Result};
use crate::fingerprint::DocumentFingerprint;
use crate::index::{CachedIndex, IndexEntry, IndexMetadata};

const INDEX_FILE: &str = "index.sqlite";
const STAGING_DIR: &str = ".staging";

/// Maps document fingerprints to persisted indexes.
pub struct IndexCache {
    root: PathBuf,
    builds: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IndexCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            builds: Mutex::new(HashMap::new()),
        }
    }

    /// Directory a fingerprint's index lives in.
    pub fn entry_dir(&self, fp: &DocumentFingerprint) -> PathBuf {
        self.root.join(fp.as_str())
    }

    /// Return the cached index for `fp`, building it with `build` on a miss.
    ///
    /// `build` performs the expensive work (extraction, chunking, embedding)
    /// and runs at most once per fingerprint across all concurrent callers
    /// in this process. Its error propagates unchanged and leaves no cache
    /// artifact; persistence failures surface as [`CoragError::CacheBuild`].
    pub async fn get_or_build<F, Fut>(
        &self,
        fp: &DocumentFingerprint,
        expected: &IndexMetadata,
        build: F,
    ) -> Result<CachedIndex>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<IndexEntry>>>,
    {
        let guard = self.build_lock(fp);
        let _held = guard.lock().await;

        match self.try_load(fp, expected).await {
            Ok(Some(index)) => {
                debug!(fingerprint = %fp, entries = index.len(), "loaded index from cache");
                return Ok(index);
            }
            Ok(None) => {
                debug!(fingerprint = %fp, "cache miss");
            }
            Err(e) => {
                warn!(fingerprint = %fp, error = %e, "cached index unusable, rebuilding");
            }
        }

        let entries = build().await?;
        let index = CachedIndex::new(expected.clone(), entries);
        self.publish(fp, &index).await?;
        debug!(fingerprint = %fp, entries = index.len(), "built and persisted index");
        Ok(index)
    }

    /// `Ok(None)` on a clean miss, `Err` when an entry exists but is
    /// unusable and must be rebuilt.
    async fn try_load(
        &self,
        fp: &DocumentFingerprint,
        expected: &IndexMetadata,
    ) -> Result<Option<CachedIndex>> {
        let dir = self.entry_dir(fp);
        if !dir_is_populated(&dir) {
            return Ok(None);
        }
        CachedIndex::load(&dir.join(INDEX_FILE), expected)
            .await
            .map(Some)
    }

    /// Persist into staging, then rename the whole directory into place.
    async fn publish(&self, fp: &DocumentFingerprint, index: &CachedIndex) -> Result<()> {
        let staging = self
            .root
            .join(STAGING_DIR)
            .join(format!("{}-{}", fp.as_str(), Uuid::new_v4()));

        if let Err(e) = index.persist(&staging.join(INDEX_FILE)).await {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(CoragError::CacheBuild(format!(
                "failed to persist index for {}: {}",
                fp, e
            )));
        }

        let final_dir = self.entry_dir(fp);
        // Only an entry we already failed to load can exist here; the
        // per-fingerprint lock keeps this process from clobbering a build
        // in flight.
        if final_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&final_dir) {
                let _ = std::fs::remove_dir_all(&staging);
                return Err(CoragError::CacheBuild(format!(
                    "failed to replace stale index for {}: {}",
                    fp, e
                )));
            }
        }

        std::fs::rename(&staging, &final_dir).map_err(|e| {
            let _ = std::fs::remove_dir_all(&staging);
            CoragError::CacheBuild(format!("failed to publish index for {}: {}", fp, e))
        })?;

        Ok(())
    }

    fn build_lock(&self, fp: &DocumentFingerprint) -> Arc<tokio::sync::Mutex<()>> {
        let mut builds = self.builds.lock().unwrap_or_else(|e| e.into_inner());
        builds
            .entry(fp.as_str().to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

fn dir_is_populated(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn metadata() -> IndexMetadata {
        IndexMetadata {
            fingerprint: "f1".to_string(),
            embedding_model: "test-model".to_string(),
            dims: 2,
            chunk_size: 100,
            overlap: 10,
        }
    }

    fn entries() -> Vec<IndexEntry> {
        vec![IndexEntry {
            chunk: Chunk {
                content: "hello world".to_string(),
                sequence_index: 0,
                source_offset: 0,
                overlap_with_previous: 0,
            },
            embedding: vec![1.0, 0.0],
        }]
    }

    #[tokio::test]
    async fn miss_builds_then_hit_loads_without_rebuilding() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IndexCache::new(dir.path());
        let fp = crate::fingerprint::fingerprint(b"doc bytes");
        let builds = AtomicUsize::new(0);

        let first = cache
            .get_or_build(&fp, &metadata(), || async {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(entries())
            })
            .await
            .unwrap();

        let second = cache
            .get_or_build(&fp, &metadata(), || async {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(entries())
            })
            .await
            .unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(first.len(), second.len());
        assert_eq!(
            first.entries()[0].chunk.content,
            second.entries()[0].chunk.content
        );
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_build() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(IndexCache::new(dir.path()));
        let fp = crate::fingerprint::fingerprint(b"same document");
        let builds = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let fp = fp.clone();
            let builds = Arc::clone(&builds);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_build(&fp, &metadata(), || async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        // Make the build slow enough that the others queue up.
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        Ok(entries())
                    })
                    .await
            }));
        }

        for handle in handles {
            let index = handle.await.unwrap().unwrap();
            assert_eq!(index.len(), 1);
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn build_failure_propagates_and_leaves_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IndexCache::new(dir.path());
        let fp = crate::fingerprint::fingerprint(b"bad doc");

        let err = cache
            .get_or_build(&fp, &metadata(), || async {
                Err(CoragError::Extraction("unreadable".to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CoragError::Extraction(_)));
        assert!(!cache.entry_dir(&fp).exists());

        // A later successful call still builds.
        let builds = AtomicUsize::new(0);
        let index = cache
            .get_or_build(&fp, &metadata(), || async {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(entries())
            })
            .await
            .unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn corrupted_entry_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IndexCache::new(dir.path());
        let fp = crate::fingerprint::fingerprint(b"doc");

        let entry_dir = cache.entry_dir(&fp);
        std::fs::create_dir_all(&entry_dir).unwrap();
        std::fs::write(entry_dir.join(INDEX_FILE), b"garbage").unwrap();

        let builds = AtomicUsize::new(0);
        let index = cache
            .get_or_build(&fp, &metadata(), || async {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(entries())
            })
            .await
            .unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(index.len(), 1);

        // And the rebuilt entry is now a valid hit.
        let index = cache
            .get_or_build(&fp, &metadata(), || async {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(entries())
            })
            .await
            .unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn configuration_change_forces_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IndexCache::new(dir.path());
        let fp = crate::fingerprint::fingerprint(b"doc");

        cache
            .get_or_build(&fp, &metadata(), || async { Ok(entries()) })
            .await
            .unwrap();

        let mut changed = metadata();
        changed.embedding_model = "other-model".to_string();

        let builds = AtomicUsize::new(0);
        cache
            .get_or_build(&fp, &changed, || async {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(entries())
            })
            .await
            .unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 1, "stale vectors must not be reused");
    }

    #[tokio::test]
    async fn distinct_fingerprints_build_independently() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IndexCache::new(dir.path());
        let fp_a = crate::fingerprint::fingerprint(b"doc a");
        let fp_b = crate::fingerprint::fingerprint(b"doc b");

        let builds = AtomicUsize::new(0);
        for fp in [&fp_a, &fp_b] {
            cache
                .get_or_build(fp, &metadata(), || async {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(entries())
                })
                .await
                .unwrap();
        }
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert!(cache.entry_dir(&fp_a).exists());
        assert!(cache.entry_dir(&fp_b).exists());
    }
}
