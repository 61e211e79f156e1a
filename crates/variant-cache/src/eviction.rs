//! Off-path cleanup of evicted entries

use crate::index::{EvictionSink, MemoryIndex};
use crate::storage::Storage;
use crate::types::CacheEntry;
use crate::worker::WorkerPool;
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, error};

/// Hands evicted entries to the worker pool, which deletes their blob and
/// journal row under the storage lock and then drops any per-source
/// reference still left in the index.
pub struct EvictionPipeline {
    storage: Arc<Storage>,
    pool: Arc<WorkerPool>,
    index: OnceLock<Weak<MemoryIndex>>,
}

impl EvictionPipeline {
    pub fn new(storage: Arc<Storage>, pool: Arc<WorkerPool>) -> Self {
        Self {
            storage,
            pool,
            index: OnceLock::new(),
        }
    }

    /// Connect the index whose evictions this pipeline cleans up. The index
    /// owns the pipeline, so only a weak reference is kept.
    pub fn attach(&self, index: &Arc<MemoryIndex>) {
        if self.index.set(Arc::downgrade(index)).is_err() {
            debug!("Eviction pipeline already attached");
        }
    }

    /// Queue storage cleanup for an entry that is no longer in the index.
    pub fn schedule(&self, entry: CacheEntry) {
        let storage = self.storage.clone();
        let index = self.index.get().cloned();
        let identity = entry.identity();

        let queued = self.pool.submit(async move {
            let index = index.and_then(|weak| weak.upgrade());
            storage.discard(&entry, index.as_deref()).await;
            if let Some(index) = index {
                index.forget_residual(&entry);
            }
            debug!(identity = entry.identity(), "Evicted entry cleaned up");
        });

        if !queued {
            error!(identity, "Worker pool stopped, evicted entry left on disk");
        }
    }
}

impl EvictionSink for EvictionPipeline {
    fn on_evicted(&self, entry: CacheEntry) {
        self.schedule(entry);
    }
}
