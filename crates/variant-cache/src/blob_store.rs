//! File-based blob storage
//!
//! Blobs live under the cache root at `<source_id><identity>`. Path
//! separators in the source id become directories; `..` and empty
//! components are neutralised so a blob can never escape the root.

use crate::error::Result;
use crate::types::BlobRef;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, warn};

/// Writes and deletes encoded variants on disk
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path a variant of `source_id` with `identity` is stored at
    pub fn blob_path(&self, source_id: &str, identity: u64) -> PathBuf {
        let mut components: Vec<String> = source_id
            .split(['/', '\\'])
            .filter(|c| !c.is_empty() && *c != ".")
            .map(|c| if c == ".." { "_".to_string() } else { c.to_string() })
            .collect();

        match components.last_mut() {
            Some(last) => last.push_str(&identity.to_string()),
            None => components.push(identity.to_string()),
        }

        let mut path = self.root.clone();
        path.extend(components);
        path
    }

    /// Write `bytes` as the blob for `(source_id, identity)`, creating any
    /// missing parent directories.
    pub async fn write(&self, source_id: &str, identity: u64, bytes: &[u8]) -> Result<BlobRef> {
        let path = self.blob_path(source_id, identity);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;

        debug!(path = ?path, size = bytes.len(), "Wrote blob");
        Ok(BlobRef::new(path))
    }

    /// Delete a blob. Returns whether a file was removed; a missing file is
    /// not an error.
    pub async fn delete(&self, blob: &BlobRef) -> Result<bool> {
        match fs::remove_file(blob.path()).await {
            Ok(()) => {
                debug!(path = ?blob.path(), "Deleted blob");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = ?blob.path(), "Blob already absent");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
