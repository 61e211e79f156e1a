//! Engine configuration

use crate::error::{CacheError, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Maximum number of background workers
pub const MAX_WORKERS: usize = 4;

/// Which durable store backs the journal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalBackend {
    /// Relational store in a SQLite database file
    Sqlite { path: PathBuf },
    /// Embedded object store persisted as one JSON document
    File { path: PathBuf },
}

impl JournalBackend {
    /// Build a backend from its configured name. `path` defaults to a file
    /// inside `cache_dir`.
    pub fn from_name(name: &str, path: Option<PathBuf>, cache_dir: &Path) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sqlite" | "sql" => Ok(JournalBackend::Sqlite {
                path: path.unwrap_or_else(|| cache_dir.join("journal.db")),
            }),
            "file" | "json" => Ok(JournalBackend::File {
                path: path.unwrap_or_else(|| cache_dir.join("journal.json")),
            }),
            other => Err(CacheError::Config(format!(
                "unknown journal backend: {}",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JournalBackend::Sqlite { .. } => "sqlite",
            JournalBackend::File { .. } => "file",
        }
    }
}

/// Configuration for the cache engine
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory for blobs
    pub cache_dir: PathBuf,
    /// Maximum resident byte size
    pub capacity_bytes: u64,
    /// Quality handed to the encoder (0-100)
    pub quality: u8,
    pub journal: JournalBackend,
    /// Background worker count
    pub workers: usize,
}

impl CacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>, capacity_bytes: u64) -> Self {
        let cache_dir = cache_dir.into();
        Self {
            journal: JournalBackend::Sqlite {
                path: cache_dir.join("journal.db"),
            },
            cache_dir,
            capacity_bytes,
            ..Self::default()
        }
    }

    pub fn with_journal(mut self, journal: JournalBackend) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Parse configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let cache_dir = env::var("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let capacity_bytes = match env::var("CACHE_CAPACITY_BYTES") {
            Ok(s) => s
                .parse::<u64>()
                .map_err(|e| CacheError::Config(format!("CACHE_CAPACITY_BYTES: {}", e)))?,
            Err(_) => defaults.capacity_bytes,
        };

        let quality = match env::var("CACHE_QUALITY") {
            Ok(s) => s
                .parse::<u8>()
                .map_err(|e| CacheError::Config(format!("CACHE_QUALITY: {}", e)))?,
            Err(_) => defaults.quality,
        };

        let workers = match env::var("CACHE_WORKERS") {
            Ok(s) => s
                .parse::<usize>()
                .map_err(|e| CacheError::Config(format!("CACHE_WORKERS: {}", e)))?,
            Err(_) => defaults.workers,
        };

        let journal_path = env::var("CACHE_JOURNAL_PATH").ok().map(PathBuf::from);
        let journal = match env::var("CACHE_JOURNAL") {
            Ok(name) => JournalBackend::from_name(&name, journal_path, &cache_dir)?,
            Err(_) => JournalBackend::from_name("sqlite", journal_path, &cache_dir)?,
        };

        let config = Self {
            cache_dir,
            capacity_bytes,
            quality,
            journal,
            workers,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity_bytes == 0 {
            return Err(CacheError::Config(
                "capacity must be greater than zero".to_string(),
            ));
        }
        if self.quality > 100 {
            return Err(CacheError::Config(format!(
                "quality must be between 0 and 100, got {}",
                self.quality
            )));
        }
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(CacheError::Config(format!(
                "workers must be between 1 and {}, got {}",
                MAX_WORKERS, self.workers
            )));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let cache_dir = PathBuf::from("./cache/variants");
        Self {
            journal: JournalBackend::Sqlite {
                path: cache_dir.join("journal.db"),
            },
            cache_dir,
            capacity_bytes: 200 * 1024 * 1024, // 200MB
            quality: 90,
            workers: 1,
        }
    }
}
