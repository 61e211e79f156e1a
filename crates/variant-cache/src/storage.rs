//! Paired blob + journal mutations under the storage lock

use crate::blob_store::BlobStore;
use crate::error::Result;
use crate::index::MemoryIndex;
use crate::journal::Journal;
use crate::types::{CacheEntry, ImageFormat};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Blob store and journal, changed together under one lock
pub struct Storage {
    blobs: BlobStore,
    journal: Arc<dyn Journal>,
    lock: Mutex<()>,
}

impl Storage {
    pub fn new(blobs: BlobStore, journal: Arc<dyn Journal>) -> Self {
        Self {
            blobs,
            journal,
            lock: Mutex::new(()),
        }
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Write the blob, insert its journal row and register the entry in
    /// `index`, all under the storage lock. Returns `None` without touching
    /// the disk when the identity is already resident or journaled. On a
    /// journal failure the fresh blob is removed again so nothing is left
    /// half-written.
    pub async fn write_variant(
        &self,
        source_id: &str,
        width: u32,
        height: u32,
        format: ImageFormat,
        encoded: &[u8],
        index: &MemoryIndex,
    ) -> Result<Option<CacheEntry>> {
        let identity = crate::key::identity(source_id, width, height, format);

        let _guard = self.lock.lock().await;
        if index.contains(identity) || self.journal.exists(identity).await? {
            debug!(identity, source_id = %source_id, "Variant already stored, skipping write");
            return Ok(None);
        }

        let blob = self.blobs.write(source_id, identity, encoded).await?;
        let entry = CacheEntry::new(
            source_id,
            blob,
            width,
            height,
            format,
            encoded.len() as u64,
        );

        if let Err(e) = self.journal.insert(&entry).await {
            if let Err(cleanup) = self.blobs.delete(entry.blob()).await {
                warn!(path = ?entry.blob().path(), error = %cleanup, "Failed to remove blob after journal failure");
            }
            return Err(e);
        }

        // Registered before the lock is released, so a queued cleanup for
        // this identity sees it as resident.
        index.put(entry.clone());
        Ok(Some(entry))
    }

    /// Delete the blob and journal row of an entry that has left the index.
    /// Skipped when the identity has been registered again meanwhile.
    pub async fn discard(&self, entry: &CacheEntry, index: Option<&MemoryIndex>) {
        let _guard = self.lock.lock().await;

        if index.is_some_and(|index| index.contains(entry.identity())) {
            debug!(identity = entry.identity(), "Entry registered again, keeping storage");
            return;
        }

        if let Err(e) = self.blobs.delete(entry.blob()).await {
            error!(path = ?entry.blob().path(), error = %e, "Failed to delete evicted blob");
        }
        if let Err(e) = self.journal.remove(entry).await {
            error!(identity = entry.identity(), source_id = %entry.source_id(), error = %e, "Failed to remove journal row");
        }
    }

    /// Every journal entry, oldest first
    pub async fn load_all(&self) -> Result<Vec<CacheEntry>> {
        let _guard = self.lock.lock().await;
        self.journal.retrieve_all().await
    }

    #[cfg(test)]
    pub(crate) fn journal(&self) -> &Arc<dyn Journal> {
        &self.journal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::index::EvictionSink;
    use crate::journal::FileJournal;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct FailingJournal;

    #[async_trait]
    impl Journal for FailingJournal {
        async fn insert(&self, _entry: &CacheEntry) -> Result<()> {
            Err(CacheError::Serialization("disk full".to_string()))
        }

        async fn remove(&self, _entry: &CacheEntry) -> Result<()> {
            Ok(())
        }

        async fn retrieve_all(&self) -> Result<Vec<CacheEntry>> {
            Ok(Vec::new())
        }

        async fn exists(&self, _identity: u64) -> Result<bool> {
            Ok(false)
        }
    }

    struct NoopSink;

    impl EvictionSink for NoopSink {
        fn on_evicted(&self, _entry: CacheEntry) {}
    }

    fn index() -> MemoryIndex {
        MemoryIndex::new(1024 * 1024, Arc::new(NoopSink))
    }

    async fn storage(dir: &std::path::Path) -> Storage {
        let journal = FileJournal::open(&dir.join("journal.json")).await.unwrap();
        Storage::new(BlobStore::new(dir.join("blobs")), Arc::new(journal))
    }

    #[tokio::test]
    async fn test_write_variant_records_blob_row_and_index() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let index = index();

        let entry = storage
            .write_variant("img1", 800, 600, ImageFormat::Jpeg, &[7u8; 64], &index)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(entry.byte_size(), 64);
        assert_eq!(std::fs::metadata(entry.blob().path()).unwrap().len(), 64);
        assert!(storage.journal().exists(entry.identity()).await.unwrap());
        assert!(index.contains(entry.identity()));
    }

    #[tokio::test]
    async fn test_second_write_of_identity_leaves_first_blob() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let index = index();

        let first = storage
            .write_variant("img1", 800, 600, ImageFormat::Jpeg, &[1u8; 32], &index)
            .await
            .unwrap()
            .unwrap();
        let second = storage
            .write_variant("img1", 800, 600, ImageFormat::Jpeg, &[2u8; 64], &index)
            .await
            .unwrap();

        assert!(second.is_none());
        assert_eq!(std::fs::read(first.blob().path()).unwrap(), vec![1u8; 32]);
        assert_eq!(index.total_size(), 32);
    }

    #[tokio::test]
    async fn test_journaled_identity_is_not_rewritten() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let stored = storage
            .write_variant("img1", 800, 600, ImageFormat::Jpeg, &[1u8; 32], &index())
            .await
            .unwrap()
            .unwrap();

        // A fresh index, as before the journal has been loaded.
        let cold = index();
        let again = storage
            .write_variant("img1", 800, 600, ImageFormat::Jpeg, &[2u8; 64], &cold)
            .await
            .unwrap();

        assert!(again.is_none());
        assert!(cold.is_empty());
        assert_eq!(std::fs::metadata(stored.blob().path()).unwrap().len(), 32);
        assert_eq!(storage.load_all().await.unwrap()[0].byte_size(), 32);
    }

    #[tokio::test]
    async fn test_journal_failure_leaves_no_blob() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(BlobStore::new(dir.path()), Arc::new(FailingJournal));
        let index = index();

        let err = storage
            .write_variant("img1", 800, 600, ImageFormat::Jpeg, b"data", &index)
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Serialization(_)));
        let path = storage
            .blobs()
            .blob_path("img1", crate::key::identity("img1", 800, 600, ImageFormat::Jpeg));
        assert!(!path.exists());
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_discard_removes_blob_and_row() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let entry = storage
            .write_variant("img1", 800, 600, ImageFormat::Jpeg, b"data", &index())
            .await
            .unwrap()
            .unwrap();

        storage.discard(&entry, None).await;

        assert!(!entry.blob().path().exists());
        assert!(!storage.journal().exists(entry.identity()).await.unwrap());
        assert!(storage.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discard_skips_resident_entry() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let index = index();
        let entry = storage
            .write_variant("img1", 800, 600, ImageFormat::Jpeg, b"data", &index)
            .await
            .unwrap()
            .unwrap();

        storage.discard(&entry, Some(&index)).await;

        assert!(entry.blob().path().exists());
        assert!(storage.journal().exists(entry.identity()).await.unwrap());
    }
}
