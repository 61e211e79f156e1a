//! Size-weighted LRU index of resident variants
//!
//! The primary map is keyed by identity and ordered by recency; a secondary
//! map lists every resident variant of a source in registration order. Both
//! live behind one reader/writer lock and are only ever changed together.

use crate::types::CacheEntry;
use lru::LruCache;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Receives entries pushed out by capacity eviction.
///
/// Called with the index write lock held: implementations must only hand
/// the entry off (enqueue) and never block or perform IO.
pub trait EvictionSink: Send + Sync {
    fn on_evicted(&self, entry: CacheEntry);
}

struct IndexInner {
    lru: LruCache<u64, CacheEntry>,
    by_source: HashMap<String, Vec<CacheEntry>>,
    total_size: u64,
}

impl IndexInner {
    fn unlink_source(&mut self, source_id: &str, identity: u64) {
        if let Some(list) = self.by_source.get_mut(source_id) {
            list.retain(|e| e.identity() != identity);
            if list.is_empty() {
                self.by_source.remove(source_id);
            }
        }
    }
}

/// Bounded in-memory index of cache entries
pub struct MemoryIndex {
    inner: RwLock<IndexInner>,
    capacity: u64,
    sink: Arc<dyn EvictionSink>,
    evictions: AtomicU64,
}

impl MemoryIndex {
    pub fn new(capacity: u64, sink: Arc<dyn EvictionSink>) -> Self {
        Self {
            inner: RwLock::new(IndexInner {
                lru: LruCache::unbounded(),
                by_source: HashMap::new(),
                total_size: 0,
            }),
            capacity,
            sink,
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up an entry and mark it as recently used.
    ///
    /// Promotion reorders the recency list, so this takes the write side of
    /// the lock; use [`MemoryIndex::contains`] for a shared read.
    pub fn get(&self, identity: u64) -> Option<CacheEntry> {
        self.inner.write().lru.get(&identity).cloned()
    }

    pub fn contains(&self, identity: u64) -> bool {
        self.inner.read().lru.contains(&identity)
    }

    /// Register an entry. An identity that is already resident only counts
    /// as an access. May evict least recently used entries.
    pub fn put(&self, entry: CacheEntry) {
        let mut inner = self.inner.write();
        self.put_locked(&mut inner, entry);
    }

    /// Register many entries under a single write lock, in order.
    pub fn load<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = CacheEntry>,
    {
        let mut inner = self.inner.write();
        let mut count = 0;
        for entry in entries {
            self.put_locked(&mut inner, entry);
            count += 1;
        }
        count
    }

    fn put_locked(&self, inner: &mut IndexInner, entry: CacheEntry) {
        let identity = entry.identity();
        if inner.lru.get(&identity).is_some() {
            return;
        }

        inner.total_size = inner.total_size.saturating_add(entry.byte_size());
        inner
            .by_source
            .entry(entry.source_id().to_string())
            .or_default()
            .push(entry.clone());
        inner.lru.put(identity, entry);

        while inner.total_size > self.capacity {
            let Some((_, evicted)) = inner.lru.pop_lru() else {
                break;
            };
            inner.total_size = inner.total_size.saturating_sub(evicted.byte_size());
            inner.unlink_source(evicted.source_id(), evicted.identity());
            self.evictions.fetch_add(1, Ordering::Relaxed);

            debug!(identity = evicted.identity(), source_id = %evicted.source_id(), size = evicted.byte_size(), "Evicted entry");
            self.sink.on_evicted(evicted);
        }
    }

    /// Remove an entry from both maps without notifying the eviction sink.
    /// Returns whether it was resident.
    pub fn remove(&self, entry: &CacheEntry) -> bool {
        let mut inner = self.inner.write();
        inner.unlink_source(entry.source_id(), entry.identity());
        match inner.lru.pop(&entry.identity()) {
            Some(removed) => {
                inner.total_size = inner.total_size.saturating_sub(removed.byte_size());
                true
            }
            None => false,
        }
    }

    /// Remove every variant of `source_id`, returning what was removed.
    pub fn remove_source(&self, source_id: &str) -> Vec<CacheEntry> {
        let mut inner = self.inner.write();
        let removed = inner.by_source.remove(source_id).unwrap_or_default();
        for entry in &removed {
            if let Some(e) = inner.lru.pop(&entry.identity()) {
                inner.total_size = inner.total_size.saturating_sub(e.byte_size());
            }
        }
        removed
    }

    /// Drop a per-source reference to `entry` unless its identity is
    /// resident again.
    pub fn forget_residual(&self, entry: &CacheEntry) {
        let mut inner = self.inner.write();
        if !inner.lru.contains(&entry.identity()) {
            inner.unlink_source(entry.source_id(), entry.identity());
        }
    }

    /// Snapshot of the variants of `source_id`, oldest registration first.
    pub fn variants(&self, source_id: &str) -> Vec<CacheEntry> {
        self.inner
            .read()
            .by_source
            .get(source_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_size(&self) -> u64 {
        self.inner.read().total_size
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}
