//! Embedded object-store journal
//!
//! Rows are kept in memory in insertion order and the whole set is
//! rewritten to a single JSON document on every mutation. The document is
//! written to a sibling temp file and renamed into place, so a crash leaves
//! either the old or the new journal on disk.

use super::{now_millis, remove_unreadable_blob, Journal, JournalRow};
use crate::error::{CacheError, Result};
use crate::types::CacheEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct JournalDocument {
    version: u32,
    rows: Vec<JournalRow>,
}

/// Journal persisted as one JSON file
pub struct FileJournal {
    path: PathBuf,
    rows: Mutex<Vec<JournalRow>>,
}

impl FileJournal {
    /// Open the journal at `path`. A missing file is an empty journal.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let rows = match fs::read(path).await {
            Ok(bytes) => {
                let document: JournalDocument = serde_json::from_slice(&bytes)?;
                if document.version != DOCUMENT_VERSION {
                    return Err(CacheError::Serialization(format!(
                        "unsupported journal version {}",
                        document.version
                    )));
                }
                document.rows
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        info!(path = ?path, rows = rows.len(), "File journal ready");
        let journal = Self {
            path: path.to_path_buf(),
            rows: Mutex::new(Vec::new()),
        };
        journal.persist(&rows).await?;
        *journal.rows.lock().await = rows;
        Ok(journal)
    }

    async fn persist(&self, rows: &[JournalRow]) -> Result<()> {
        let document = JournalDocument {
            version: DOCUMENT_VERSION,
            rows: rows.to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn count(rows: &[JournalRow], identity: u64) -> usize {
        rows.iter().filter(|r| r.identity == identity).count()
    }
}

#[async_trait]
impl Journal for FileJournal {
    async fn insert(&self, entry: &CacheEntry) -> Result<()> {
        let mut rows = self.rows.lock().await;
        match Self::count(&rows, entry.identity()) {
            0 => {}
            1 => {
                debug!(identity = entry.identity(), "Journal row exists, skipping insert");
                return Ok(());
            }
            n => {
                return Err(CacheError::Corruption(format!(
                    "{} rows for identity {}",
                    n,
                    entry.identity()
                )))
            }
        }

        let mut next = rows.clone();
        next.push(JournalRow::from_entry(entry, now_millis()));
        self.persist(&next).await?;
        *rows = next;

        debug!(identity = entry.identity(), source_id = %entry.source_id(), "Journal row inserted");
        Ok(())
    }

    async fn remove(&self, entry: &CacheEntry) -> Result<()> {
        let mut rows = self.rows.lock().await;
        let matched = Self::count(&rows, entry.identity());
        if matched != 1 {
            return Err(CacheError::Corruption(format!(
                "remove matched {} rows for identity {}",
                matched,
                entry.identity()
            )));
        }

        let mut next = rows.clone();
        next.retain(|r| r.identity != entry.identity());
        self.persist(&next).await?;
        *rows = next;

        debug!(identity = entry.identity(), "Journal row removed");
        Ok(())
    }

    async fn retrieve_all(&self) -> Result<Vec<CacheEntry>> {
        let mut rows = self.rows.lock().await;
        let mut ordered = rows.clone();
        // Stable sort keeps insertion order between equal timestamps.
        ordered.sort_by_key(|r| r.inserted_at);

        let mut entries = Vec::with_capacity(ordered.len());
        let mut unreadable = Vec::new();
        for row in ordered {
            match row.clone().into_entry() {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(identity = row.identity, error = %e, "Discarding unreadable journal row");
                    unreadable.push(row);
                }
            }
        }

        if !unreadable.is_empty() {
            let next: Vec<JournalRow> = rows
                .iter()
                .filter(|r| !unreadable.contains(r))
                .cloned()
                .collect();
            self.persist(&next).await?;
            *rows = next;
            for row in &unreadable {
                remove_unreadable_blob(&row.blob_path).await;
            }
        }
        Ok(entries)
    }

    async fn exists(&self, identity: u64) -> Result<bool> {
        let rows = self.rows.lock().await;
        match Self::count(&rows, identity) {
            0 => Ok(false),
            1 => Ok(true),
            n => Err(CacheError::Corruption(format!(
                "{} rows for identity {}",
                n, identity
            ))),
        }
    }
}
