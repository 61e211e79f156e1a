//! Durable metadata journal
//!
//! The journal is the durable record of which variants exist and where
//! their blobs live. The engine only talks to the [`Journal`] trait; the
//! backend is picked from [`JournalBackend`] by [`open`].

mod file;
mod sql;

pub use file::FileJournal;
pub use sql::SqliteJournal;

use crate::config::JournalBackend;
use crate::error::{CacheError, Result};
use crate::types::{BlobRef, CacheEntry, ImageFormat};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Durable store of cache entries.
///
/// - `insert` is a no-op when a row with the same identity exists.
/// - `remove` must match exactly one row, anything else is
///   [`CacheError::Corruption`].
/// - `exists` finding more than one row is [`CacheError::Corruption`].
/// - `retrieve_all` returns entries oldest insertion first. Rows that no
///   longer decode are dropped from the journal and their blob deleted.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn insert(&self, entry: &CacheEntry) -> Result<()>;

    async fn remove(&self, entry: &CacheEntry) -> Result<()>;

    async fn retrieve_all(&self) -> Result<Vec<CacheEntry>>;

    async fn exists(&self, identity: u64) -> Result<bool>;
}

/// Open the configured backend, wrapped so that a corruption error stops
/// all further use of the instance.
pub async fn open(backend: &JournalBackend) -> Result<Arc<dyn Journal>> {
    let inner: Arc<dyn Journal> = match backend {
        JournalBackend::Sqlite { path } => Arc::new(SqliteJournal::open(path).await?),
        JournalBackend::File { path } => Arc::new(FileJournal::open(path).await?),
    };
    info!(backend = backend.name(), "Journal opened");
    Ok(Arc::new(PoisonOnCorruption::new(inner)))
}

/// One persisted journal row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRow {
    pub identity: u64,
    pub source_id: String,
    pub blob_path: String,
    pub width: u32,
    pub height: u32,
    pub byte_size: u64,
    pub format: String,
    /// Milliseconds since the epoch, only used for ordering
    pub inserted_at: i64,
}

impl JournalRow {
    pub fn from_entry(entry: &CacheEntry, inserted_at: i64) -> Self {
        Self {
            identity: entry.identity(),
            source_id: entry.source_id().to_string(),
            blob_path: entry.blob().path().to_string_lossy().into_owned(),
            width: entry.width(),
            height: entry.height(),
            byte_size: entry.byte_size(),
            format: entry.format().as_str().to_string(),
            inserted_at,
        }
    }

    /// Rebuild the entry. Fails when the format name is unknown or the
    /// stored identity no longer matches the derived one.
    pub fn into_entry(self) -> Result<CacheEntry> {
        let format: ImageFormat = self.format.parse().map_err(CacheError::Serialization)?;
        let entry = CacheEntry::new(
            self.source_id,
            BlobRef::new(PathBuf::from(self.blob_path)),
            self.width,
            self.height,
            format,
            self.byte_size,
        );
        if entry.identity() != self.identity {
            return Err(CacheError::Serialization(format!(
                "stored identity {} does not match derived identity {}",
                self.identity,
                entry.identity()
            )));
        }
        Ok(entry)
    }
}

/// Delete the blob named by a row that could not be loaded. The row itself
/// is dropped by the backend, so nothing else would ever reclaim the file.
pub(crate) async fn remove_unreadable_blob(blob_path: &str) {
    match tokio::fs::remove_file(blob_path).await {
        Ok(()) => debug!(path = %blob_path, "Removed blob of unreadable journal row"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %blob_path, error = %e, "Failed to remove blob of unreadable journal row"),
    }
}

/// Current time in the journal's ordering unit
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Journal wrapper that refuses every call once the backend has reported
/// a corruption.
pub struct PoisonOnCorruption {
    inner: Arc<dyn Journal>,
    poisoned: AtomicBool,
}

impl PoisonOnCorruption {
    pub fn new(inner: Arc<dyn Journal>) -> Self {
        Self {
            inner,
            poisoned: AtomicBool::new(false),
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    fn check(&self) -> Result<()> {
        if self.is_poisoned() {
            return Err(CacheError::Corruption(
                "journal halted after an earlier corruption".to_string(),
            ));
        }
        Ok(())
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_corruption() && !self.poisoned.swap(true, Ordering::AcqRel) {
                error!(error = %e, "Journal corruption detected, halting journal");
            }
        }
        result
    }
}

#[async_trait]
impl Journal for PoisonOnCorruption {
    async fn insert(&self, entry: &CacheEntry) -> Result<()> {
        self.check()?;
        self.observe(self.inner.insert(entry).await)
    }

    async fn remove(&self, entry: &CacheEntry) -> Result<()> {
        self.check()?;
        self.observe(self.inner.remove(entry).await)
    }

    async fn retrieve_all(&self) -> Result<Vec<CacheEntry>> {
        self.check()?;
        self.observe(self.inner.retrieve_all().await)
    }

    async fn exists(&self, identity: u64) -> Result<bool> {
        self.check()?;
        self.observe(self.inner.exists(identity).await)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_row_round_trip_preserves_entry() {
        let entry = contract::entry("img1", 800, 600, 50_000);
        let row = JournalRow::from_entry(&entry, 1_700_000_000_000);
        assert_eq!(row.format, "JPEG");
        assert_eq!(row.into_entry().unwrap(), entry);
    }

    #[test]
    fn test_row_with_unknown_format_is_rejected() {
        let entry = contract::entry("img1", 800, 600, 50_000);
        let mut row = JournalRow::from_entry(&entry, 0);
        row.format = "HEIC".to_string();
        assert!(matches!(
            row.into_entry(),
            Err(CacheError::Serialization(_))
        ));
    }

    #[test]
    fn test_row_with_stale_identity_is_rejected() {
        let entry = contract::entry("img1", 800, 600, 50_000);
        let mut row = JournalRow::from_entry(&entry, 0);
        row.identity = row.identity.wrapping_add(1);
        assert!(row.into_entry().is_err());
    }

    #[tokio::test]
    async fn test_corruption_poisons_journal() {
        let dir = tempdir().unwrap();
        let journal = open(&JournalBackend::File {
            path: dir.path().join("journal.json"),
        })
        .await
        .unwrap();

        let ghost = contract::entry("ghost", 1, 1, 1);
        assert!(journal.remove(&ghost).await.unwrap_err().is_corruption());

        // Every later call is refused, even ones that would succeed.
        let fresh = contract::entry("fresh", 2, 2, 2);
        assert!(journal.insert(&fresh).await.unwrap_err().is_corruption());
        assert!(journal.exists(fresh.identity()).await.unwrap_err().is_corruption());
    }

    #[tokio::test]
    async fn test_open_selects_backend() {
        let dir = tempdir().unwrap();
        for backend in [
            JournalBackend::Sqlite {
                path: dir.path().join("journal.db"),
            },
            JournalBackend::File {
                path: dir.path().join("journal.json"),
            },
        ] {
            let journal = open(&backend).await.unwrap();
            let e = contract::entry("img1", 4, 3, 12);
            journal.insert(&e).await.unwrap();
            assert!(journal.exists(e.identity()).await.unwrap());
        }
        assert!(dir.path().join("journal.db").exists());
        assert!(dir.path().join("journal.json").exists());
    }
}
