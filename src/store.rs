//! SQLite-backed chunk store.
//!
//! Owns the `kb_chunks` and `kb_sources` schema, the atomic per-file
//! replace used by the sync engine, and the dense + lexical candidate
//! searches consumed by the retriever. The FTS5 companion table uses the
//! porter tokenizer so lexical matching is stemmed.
//!
//! Chunk replacement and deletion each run in a single transaction: a
//! reader mid-replace sees either the old or the new chunk set for a file,
//! never a partial one.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tracing::warn;
use uuid::Uuid;

use crate::embed::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{KbError, Result};
use crate::models::{Chunk, NewChunk, RemoteFile, SourceRecord, SourceStatus};

#[derive(Clone)]
pub struct ChunkStore {
    pool: SqlitePool,
}

impl ChunkStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and indexes. Idempotent.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kb_chunks (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                source_category TEXT,
                origin_file_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                UNIQUE(origin_file_id, chunk_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_kb_chunks_origin_file_id
             ON kb_chunks(origin_file_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_kb_chunks_source_category
             ON kb_chunks(source_category)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kb_sources (
                file_id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                category TEXT,
                modified_time INTEGER NOT NULL,
                last_synced INTEGER NOT NULL,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kb_sources_status ON kb_sources(status)")
            .execute(&self.pool)
            .await?;

        // FTS5 CREATE is not idempotent natively, so check first.
        let fts_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='kb_chunks_fts'",
        )
        .fetch_one(&self.pool)
        .await?;

        if !fts_exists {
            sqlx::query(
                r#"
                CREATE VIRTUAL TABLE kb_chunks_fts USING fts5(
                    chunk_id UNINDEXED,
                    origin_file_id UNINDEXED,
                    content,
                    tokenize='porter unicode61'
                )
                "#,
            )
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Atomically replace a file's chunks: delete every existing row for
    /// the file, insert the new set with contiguous positions from 0, and
    /// bring the source record up to date — all in one transaction.
    ///
    /// Every insert gets a fresh id, even when content is unchanged.
    pub async fn replace_file_chunks(
        &self,
        file: &RemoteFile,
        chunks: &[NewChunk],
        embeddings: &[Vec<f32>],
        synced_at: DateTime<Utc>,
    ) -> Result<u64> {
        if chunks.len() != embeddings.len() {
            return Err(KbError::Data(format!(
                "chunk/embedding count mismatch for '{}': {} vs {}",
                file.name,
                chunks.len(),
                embeddings.len()
            )));
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM kb_chunks_fts WHERE origin_file_id = ?")
            .bind(&file.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM kb_chunks WHERE origin_file_id = ?")
            .bind(&file.id)
            .execute(&mut *tx)
            .await?;

        for (idx, (chunk, embedding)) in chunks.iter().zip(embeddings.iter()).enumerate() {
            let id = Uuid::new_v4().to_string();
            let mut hasher = Sha256::new();
            hasher.update(chunk.content.as_bytes());
            let content_hash = format!("{:x}", hasher.finalize());

            sqlx::query(
                r#"
                INSERT INTO kb_chunks
                    (id, content, embedding, source_category, origin_file_id,
                     filename, chunk_index, content_hash, metadata, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&chunk.content)
            .bind(vec_to_blob(embedding))
            .bind(&file.category)
            .bind(&file.id)
            .bind(&file.name)
            .bind(idx as i64)
            .bind(&content_hash)
            .bind(chunk.metadata.to_string())
            .bind(synced_at.timestamp())
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO kb_chunks_fts (chunk_id, origin_file_id, content) VALUES (?, ?, ?)",
            )
            .bind(&id)
            .bind(&file.id)
            .bind(&chunk.content)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO kb_sources
                (file_id, filename, category, modified_time, last_synced, chunk_count, status)
            VALUES (?, ?, ?, ?, ?, ?, 'active')
            ON CONFLICT(file_id) DO UPDATE SET
                filename = excluded.filename,
                category = excluded.category,
                modified_time = excluded.modified_time,
                last_synced = excluded.last_synced,
                chunk_count = excluded.chunk_count,
                status = 'active'
            "#,
        )
        .bind(&file.id)
        .bind(&file.name)
        .bind(&file.category)
        .bind(file.modified_time.timestamp())
        .bind(synced_at.timestamp())
        .bind(chunks.len() as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(chunks.len() as u64)
    }

    /// Remove every chunk for a file and flip its source record to
    /// `deleted`, in one transaction. Returns the number of chunks removed.
    pub async fn delete_file_chunks(
        &self,
        file_id: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM kb_chunks_fts WHERE origin_file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM kb_chunks WHERE origin_file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            "UPDATE kb_sources SET status = 'deleted', chunk_count = 0, last_synced = ?
             WHERE file_id = ?",
        )
        .bind(deleted_at.timestamp())
        .bind(file_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(deleted)
    }

    /// Load every source record ever seen, active or deleted.
    pub async fn load_sources(&self) -> Result<Vec<SourceRecord>> {
        let rows = sqlx::query(
            "SELECT file_id, filename, category, modified_time, last_synced, chunk_count, status
             FROM kb_sources",
        )
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .iter()
            .map(|row| {
                let status: String = row.get("status");
                SourceRecord {
                    file_id: row.get("file_id"),
                    filename: row.get("filename"),
                    category: row.get("category"),
                    modified_time: timestamp_to_datetime(row.get("modified_time")),
                    last_synced: timestamp_to_datetime(row.get("last_synced")),
                    chunk_count: row.get("chunk_count"),
                    status: SourceStatus::parse(&status),
                }
            })
            .collect();

        Ok(records)
    }

    /// Number of chunk rows currently stored for a file.
    pub async fn file_chunk_count(&self, file_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM kb_chunks WHERE origin_file_id = ?")
                .bind(file_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Dense candidate search: the `limit` stored chunks most cosine-similar
    /// to `query_vec`, optionally restricted to one category.
    ///
    /// A stored row whose vector cannot be decoded to the query's
    /// dimensionality is dropped with a warning, not an error.
    pub async fn dense_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<(Chunk, f32)>> {
        let rows = match category {
            Some(cat) => {
                sqlx::query("SELECT * FROM kb_chunks WHERE source_category = ?")
                    .bind(cat)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM kb_chunks")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut scored: Vec<(Chunk, f32)> = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = chunk_from_row(row);
            if chunk.embedding.len() != query_vec.len() {
                warn!(
                    chunk_id = %chunk.id,
                    stored = chunk.embedding.len(),
                    expected = query_vec.len(),
                    "dropping chunk with undecodable embedding"
                );
                continue;
            }
            let similarity = cosine_similarity(query_vec, &chunk.embedding);
            scored.push((chunk, similarity));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Lexical candidate search: the `limit` best stemmed full-text matches
    /// in rank order, optionally restricted to one category.
    pub async fn lexical_search(
        &self,
        query: &str,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<Chunk>> {
        let match_expr = match fts_match_expr(query) {
            Some(expr) => expr,
            None => return Ok(Vec::new()),
        };

        let rows = match category {
            Some(cat) => {
                sqlx::query(
                    r#"
                    SELECT c.* FROM kb_chunks_fts
                    JOIN kb_chunks c ON c.id = kb_chunks_fts.chunk_id
                    WHERE kb_chunks_fts MATCH ? AND c.source_category = ?
                    ORDER BY kb_chunks_fts.rank
                    LIMIT ?
                    "#,
                )
                .bind(&match_expr)
                .bind(cat)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT c.* FROM kb_chunks_fts
                    JOIN kb_chunks c ON c.id = kb_chunks_fts.chunk_id
                    WHERE kb_chunks_fts MATCH ?
                    ORDER BY kb_chunks_fts.rank
                    LIMIT ?
                    "#,
                )
                .bind(&match_expr)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(chunk_from_row).collect())
    }
}

/// Build an FTS5 match expression from free-form query text: quoted
/// alphanumeric tokens joined with OR, so punctuation and FTS syntax in the
/// query cannot break the match. Returns `None` when no tokens survive.
fn fts_match_expr(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> Chunk {
    let blob: Vec<u8> = row.get("embedding");
    let metadata_raw: String = row.get("metadata");
    let metadata = serde_json::from_str(&metadata_raw).unwrap_or_else(|_| {
        warn!("chunk metadata is not valid JSON, using empty object");
        serde_json::json!({})
    });

    Chunk {
        id: row.get("id"),
        content: row.get("content"),
        embedding: blob_to_vec(&blob),
        source_category: row.get("source_category"),
        origin_file_id: row.get("origin_file_id"),
        filename: row.get("filename"),
        chunk_index: row.get("chunk_index"),
        content_hash: row.get("content_hash"),
        metadata,
        created_at: timestamp_to_datetime(row.get("created_at")),
    }
}

fn timestamp_to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}
