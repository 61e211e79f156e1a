//! Disk-backed, size-bounded cache of image variants
//!
//! Each cached variant is one source image at one size and format. Encoded
//! bytes live as files under the cache directory, a journal records what is
//! on disk so the cache survives restarts, and an in-memory size-weighted
//! LRU index answers lookups. Writes and eviction cleanup run on background
//! workers; lookups never touch the disk.

pub mod blob_store;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod eviction;
pub mod index;
pub mod journal;
pub mod key;
pub mod matching;
pub mod storage;
pub mod types;
pub mod worker;

pub use codec::{Encoder, PassthroughEncoder};
pub use config::{CacheConfig, JournalBackend};
pub use engine::{CacheEngine, EngineState, PendingWrite};
pub use error::{CacheError, Result};
pub use journal::{FileJournal, Journal, SqliteJournal};
pub use types::{BlobRef, CacheEntry, CacheStats, ImageFormat};
