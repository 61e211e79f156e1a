//! Cache engine: the public face of the variant cache

use crate::blob_store::BlobStore;
use crate::codec::{Encoder, PassthroughEncoder};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::eviction::EvictionPipeline;
use crate::index::MemoryIndex;
use crate::journal::{self, Journal};
use crate::key;
use crate::matching;
use crate::storage::Storage;
use crate::types::{BlobRef, CacheEntry, CacheStats, ImageFormat};
use crate::worker::WorkerPool;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Lifecycle of an engine. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EngineState::Uninitialized,
            1 => EngineState::Initializing,
            _ => EngineState::Ready,
        }
    }
}

/// Completion handle of a [`CacheEngine::put`].
///
/// Dropping it leaves the write running in the background. Awaiting
/// [`PendingWrite::wait`] yields the registered entry, or `None` when the
/// variant was already cached.
#[must_use = "drop the handle explicitly for fire-and-forget writes"]
pub struct PendingWrite {
    inner: PendingInner,
}

enum PendingInner {
    Done(Result<Option<CacheEntry>>),
    Queued(oneshot::Receiver<Result<Option<CacheEntry>>>),
}

impl PendingWrite {
    fn done(result: Result<Option<CacheEntry>>) -> Self {
        Self {
            inner: PendingInner::Done(result),
        }
    }

    pub async fn wait(self) -> Result<Option<CacheEntry>> {
        match self.inner {
            PendingInner::Done(result) => result,
            PendingInner::Queued(rx) => rx.await.unwrap_or(Err(CacheError::WorkerStopped)),
        }
    }
}

/// Disk-backed, size-bounded cache of image variants
pub struct CacheEngine {
    state: AtomicU8,
    index: Arc<MemoryIndex>,
    storage: Arc<Storage>,
    pool: Arc<WorkerPool>,
    pipeline: Arc<EvictionPipeline>,
    encoder: Arc<dyn Encoder>,
    quality: u8,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheEngine {
    /// Validate `config`, prepare the cache directory and open the
    /// configured journal. The engine starts `Uninitialized`.
    pub async fn open(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.cache_dir).await?;
        let journal = journal::open(&config.journal).await?;
        Self::with_journal(config, journal)
    }

    /// Build an engine around an already opened journal. Must be called
    /// from within a tokio runtime.
    pub fn with_journal(config: CacheConfig, journal: Arc<dyn Journal>) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(Storage::new(BlobStore::new(&config.cache_dir), journal));
        let pool = Arc::new(WorkerPool::new(config.workers));
        let pipeline = Arc::new(EvictionPipeline::new(storage.clone(), pool.clone()));
        let index = Arc::new(MemoryIndex::new(config.capacity_bytes, pipeline.clone()));
        pipeline.attach(&index);

        info!(
            cache_dir = ?config.cache_dir,
            capacity_bytes = config.capacity_bytes,
            journal = config.journal.name(),
            workers = config.workers,
            "Cache engine constructed"
        );

        Ok(Self {
            state: AtomicU8::new(EngineState::Uninitialized as u8),
            index,
            storage,
            pool,
            pipeline,
            encoder: Arc::new(PassthroughEncoder),
            quality: config.quality,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Replace the codec used by `put`
    pub fn with_encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    /// Load every journal row into the index, oldest first, then become
    /// `Ready`. Capacity eviction runs during the load as it would for
    /// live puts. Returns the number of rows replayed.
    ///
    /// If the journal cannot be read the engine still becomes `Ready`, with
    /// an empty index, and the error is returned.
    pub async fn init(&self) -> Result<usize> {
        if self
            .state
            .compare_exchange(
                EngineState::Uninitialized as u8,
                EngineState::Initializing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            warn!(state = ?self.state(), "Cache engine already initialized");
            return Ok(0);
        }

        info!("Loading cache journal...");
        let loaded = self.storage.load_all().await;
        let result = loaded.map(|entries| self.index.load(entries));

        self.state
            .store(EngineState::Ready as u8, Ordering::Release);

        match &result {
            Ok(count) => info!(
                rows = count,
                resident = self.index.len(),
                total_size = self.index.total_size(),
                "Cache engine ready"
            ),
            Err(e) => error!(error = %e, "Journal load failed, starting with an empty cache"),
        }
        result
    }

    /// Cache a variant of `source_id`. Returns at once; encoding, the blob
    /// write, the journal insert and registration happen on a background
    /// worker. A variant that is already cached, or still recorded in the
    /// journal, is left alone and its blob is not rewritten.
    pub fn put(
        &self,
        source_id: impl Into<String>,
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        format: ImageFormat,
    ) -> PendingWrite {
        let source_id = source_id.into();
        if self.get_exact(&source_id, width, height, format).is_some() {
            debug!(source_id = %source_id, width, height, %format, "Variant already cached");
            return PendingWrite::done(Ok(None));
        }

        let storage = self.storage.clone();
        let index = self.index.clone();
        let encoder = self.encoder.clone();
        let quality = self.quality;

        let queued = self.pool.submit_with_result(async move {
            let result: Result<Option<CacheEntry>> = async {
                let encoded = encoder.encode(&pixels, format, quality)?;
                storage
                    .write_variant(&source_id, width, height, format, &encoded, &index)
                    .await
            }
            .await;

            match &result {
                Ok(Some(entry)) => debug!(
                    source_id = %source_id,
                    identity = entry.identity(),
                    size = entry.byte_size(),
                    "Cached variant"
                ),
                Ok(None) => debug!(source_id = %source_id, width, height, %format, "Variant already stored"),
                Err(e) => error!(source_id = %source_id, width, height, %format, error = %e, "Failed to cache variant"),
            }
            result
        });

        match queued {
            Some(rx) => PendingWrite {
                inner: PendingInner::Queued(rx),
            },
            None => {
                error!("Worker pool stopped, dropping cache write");
                PendingWrite::done(Err(CacheError::WorkerStopped))
            }
        }
    }

    /// Exact lookup. In-memory only; `None` until the engine is `Ready`.
    pub fn get_exact(
        &self,
        source_id: &str,
        width: u32,
        height: u32,
        format: ImageFormat,
    ) -> Option<BlobRef> {
        if !self.is_ready() {
            return None;
        }

        let identity = key::identity(source_id, width, height, format);
        match self.index.get(identity) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.blob().clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Every resident variant of `source_id`; empty until `Ready`.
    pub fn get_variants(&self, source_id: &str) -> Vec<CacheEntry> {
        if !self.is_ready() {
            return Vec::new();
        }
        self.index.variants(source_id)
    }

    /// First resident variant of `source_id` satisfying an approximate
    /// `(target_x, target_y, format)` request, `0` meaning unspecified.
    pub fn find_variant(
        &self,
        source_id: &str,
        target_x: u32,
        target_y: u32,
        format: ImageFormat,
    ) -> Option<CacheEntry> {
        let variants = self.get_variants(source_id);
        matching::find_match(&variants, target_x, target_y, format).cloned()
    }

    /// Drop every variant of `source_id`. The index forgets them at once;
    /// blobs and journal rows are removed in the background. Returns how
    /// many variants were dropped.
    pub fn invalidate(&self, source_id: &str) -> usize {
        let removed = self.index.remove_source(source_id);
        let count = removed.len();
        for entry in removed {
            self.pipeline.schedule(entry);
        }
        if count > 0 {
            info!(source_id = %source_id, count, "Invalidated variants");
        }
        count
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.index.len(),
            total_size: self.index.total_size(),
            capacity: self.index.capacity(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.index.evictions(),
        }
    }

    /// Resolve once every queued write and cleanup has finished.
    pub async fn wait_idle(&self) {
        self.pool.wait_idle().await;
    }

    /// Stop accepting writes and let queued work drain.
    pub async fn shutdown(&self) {
        info!(pending = self.pool.pending(), "Shutting down cache engine");
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalBackend;
    use tempfile::tempdir;

    async fn engine(dir: &std::path::Path, capacity: u64) -> CacheEngine {
        let config = CacheConfig::new(dir, capacity).with_journal(JournalBackend::File {
            path: dir.join("journal.json"),
        });
        CacheEngine::open(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_state_moves_forward_once() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), 1024).await;
        assert_eq!(engine.state(), EngineState::Uninitialized);

        engine.init().await.unwrap();
        assert_eq!(engine.state(), EngineState::Ready);

        assert_eq!(engine.init().await.unwrap(), 0);
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn test_reads_are_empty_before_ready() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), 1024 * 1024).await;

        let entry = engine
            .put("img1", vec![1; 32], 800, 600, ImageFormat::Jpeg)
            .wait()
            .await
            .unwrap()
            .unwrap();

        // Registered, but not visible until init completes.
        assert!(engine
            .get_exact("img1", 800, 600, ImageFormat::Jpeg)
            .is_none());
        assert!(engine.get_variants("img1").is_empty());

        engine.init().await.unwrap();
        assert_eq!(
            engine.get_exact("img1", 800, 600, ImageFormat::Jpeg),
            Some(entry.blob().clone())
        );
        assert_eq!(engine.get_variants("img1").len(), 1);
    }

    #[tokio::test]
    async fn test_put_of_cached_variant_is_noop() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), 1024 * 1024).await;
        engine.init().await.unwrap();

        let first = engine
            .put("img1", vec![1; 32], 800, 600, ImageFormat::Jpeg)
            .wait()
            .await
            .unwrap();
        assert!(first.is_some());

        let second = engine
            .put("img1", vec![2; 64], 800, 600, ImageFormat::Jpeg)
            .wait()
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(engine.stats().total_size, 32);
    }

    #[tokio::test]
    async fn test_encode_failure_registers_nothing() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), 1024).await;
        engine.init().await.unwrap();

        let err = engine
            .put("img1", Vec::new(), 800, 600, ImageFormat::Jpeg)
            .wait()
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Encode(_)));
        assert!(engine.get_variants("img1").is_empty());
        assert_eq!(engine.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_racing_puts_keep_first_blob() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), 1024 * 1024).await;
        engine.init().await.unwrap();

        // Both pass the lookup before either write lands.
        let first = engine.put("img1", vec![1; 32], 800, 600, ImageFormat::Jpeg);
        let second = engine.put("img1", vec![2; 64], 800, 600, ImageFormat::Jpeg);

        let first = first.wait().await.unwrap().unwrap();
        assert!(second.wait().await.unwrap().is_none());

        let blob = engine
            .get_exact("img1", 800, 600, ImageFormat::Jpeg)
            .unwrap();
        assert_eq!(&blob, first.blob());
        assert_eq!(std::fs::metadata(blob.path()).unwrap().len(), 32);
        assert_eq!(engine.stats().total_size, 32);
    }

    #[tokio::test]
    async fn test_blob_write_failure_registers_nothing() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("blocker"), b"not a directory").unwrap();

        {
            let engine = engine(dir.path(), 1024).await;
            engine.init().await.unwrap();

            let err = engine
                .put("blocker/img1", vec![1; 16], 10, 10, ImageFormat::Png)
                .wait()
                .await
                .unwrap_err();

            assert!(matches!(err, CacheError::Io(_)), "unexpected error: {}", err);
            assert!(engine.get_variants("blocker/img1").is_empty());
            assert_eq!(engine.stats().entries, 0);
            engine.shutdown().await;
        }

        let reopened = engine(dir.path(), 1024).await;
        assert_eq!(reopened.init().await.unwrap(), 0);
        assert!(reopened.get_variants("blocker/img1").is_empty());
    }

    #[tokio::test]
    async fn test_put_after_shutdown_fails() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), 1024).await;
        engine.init().await.unwrap();
        engine.shutdown().await;

        let err = engine
            .put("img1", vec![1; 8], 10, 10, ImageFormat::Png)
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::WorkerStopped));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let dir = tempdir().unwrap();
        let config = CacheConfig::new(dir.path(), 0);
        assert!(matches!(
            CacheEngine::open(config).await,
            Err(CacheError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_hit_and_miss_counters() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), 1024).await;
        engine.init().await.unwrap();

        assert!(engine.get_exact("img1", 1, 1, ImageFormat::Png).is_none());
        engine
            .put("img1", vec![1; 8], 1, 1, ImageFormat::Png)
            .wait()
            .await
            .unwrap();
        assert!(engine.get_exact("img1", 1, 1, ImageFormat::Png).is_some());

        let stats = engine.stats();
        // put's own existence check is a miss as well
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.capacity, 1024);
    }
}
