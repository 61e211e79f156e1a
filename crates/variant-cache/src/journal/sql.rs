//! Relational journal backed by SQLite

use super::{now_millis, remove_unreadable_blob, Journal, JournalRow};
use crate::error::{CacheError, Result};
use crate::types::CacheEntry;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::{debug, info, warn};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS variant_journal (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        identity INTEGER NOT NULL UNIQUE,
        source_id TEXT NOT NULL,
        blob_path TEXT NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        byte_size INTEGER NOT NULL,
        format TEXT NOT NULL,
        inserted_at INTEGER NOT NULL
    )
"#;

/// Identities are `u64`; SQLite integers are signed. The bit pattern is
/// stored unchanged.
fn to_sql_identity(identity: u64) -> i64 {
    identity as i64
}

#[derive(Debug, sqlx::FromRow)]
struct SqlRow {
    seq: i64,
    identity: i64,
    source_id: String,
    blob_path: String,
    width: i64,
    height: i64,
    byte_size: i64,
    format: String,
    inserted_at: i64,
}

impl SqlRow {
    fn into_journal_row(self) -> Result<JournalRow> {
        let dimension = |v: i64| {
            u32::try_from(v).map_err(|_| CacheError::Serialization(format!("bad dimension {}", v)))
        };
        Ok(JournalRow {
            identity: self.identity as u64,
            source_id: self.source_id,
            blob_path: self.blob_path,
            width: dimension(self.width)?,
            height: dimension(self.height)?,
            byte_size: u64::try_from(self.byte_size).map_err(|_| {
                CacheError::Serialization(format!("bad byte size {}", self.byte_size))
            })?,
            format: self.format,
            inserted_at: self.inserted_at,
        })
    }
}

/// Journal stored in one SQLite table
pub struct SqliteJournal {
    pool: SqlitePool,
}

impl SqliteJournal {
    /// Open (creating if needed) the database at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        // Single connection: the engine already serialises storage access.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        info!(path = ?path, "SQLite journal ready");

        Ok(Self { pool })
    }
}

#[async_trait]
impl Journal for SqliteJournal {
    async fn insert(&self, entry: &CacheEntry) -> Result<()> {
        if self.exists(entry.identity()).await? {
            debug!(identity = entry.identity(), "Journal row exists, skipping insert");
            return Ok(());
        }

        let row = JournalRow::from_entry(entry, now_millis());
        sqlx::query(
            r#"
            INSERT INTO variant_journal
                (identity, source_id, blob_path, width, height, byte_size, format, inserted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (identity) DO NOTHING
            "#,
        )
        .bind(to_sql_identity(row.identity))
        .bind(&row.source_id)
        .bind(&row.blob_path)
        .bind(i64::from(row.width))
        .bind(i64::from(row.height))
        .bind(row.byte_size as i64)
        .bind(&row.format)
        .bind(row.inserted_at)
        .execute(&self.pool)
        .await?;

        debug!(identity = row.identity, source_id = %row.source_id, "Journal row inserted");
        Ok(())
    }

    async fn remove(&self, entry: &CacheEntry) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM variant_journal WHERE identity = $1")
            .bind(to_sql_identity(entry.identity()))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if removed != 1 {
            tx.rollback().await?;
            return Err(CacheError::Corruption(format!(
                "remove matched {} rows for identity {}",
                removed,
                entry.identity()
            )));
        }

        tx.commit().await?;
        debug!(identity = entry.identity(), "Journal row removed");
        Ok(())
    }

    async fn retrieve_all(&self) -> Result<Vec<CacheEntry>> {
        let rows = sqlx::query_as::<_, SqlRow>(
            r#"
            SELECT seq, identity, source_id, blob_path, width, height, byte_size, format, inserted_at
            FROM variant_journal
            ORDER BY inserted_at ASC, seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        let mut unreadable = Vec::new();
        for row in rows {
            let (seq, blob_path) = (row.seq, row.blob_path.clone());
            match row.into_journal_row().and_then(JournalRow::into_entry) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(seq, error = %e, "Discarding unreadable journal row");
                    unreadable.push((seq, blob_path));
                }
            }
        }

        for (seq, blob_path) in unreadable {
            sqlx::query("DELETE FROM variant_journal WHERE seq = $1")
                .bind(seq)
                .execute(&self.pool)
                .await?;
            remove_unreadable_blob(&blob_path).await;
        }
        Ok(entries)
    }

    async fn exists(&self, identity: u64) -> Result<bool> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM variant_journal WHERE identity = $1")
                .bind(to_sql_identity(identity))
                .fetch_one(&self.pool)
                .await?;

        if count > 1 {
            return Err(CacheError::Corruption(format!(
                "{} rows for identity {}",
                count, identity
            )));
        }
        Ok(count == 1)
    }
}
