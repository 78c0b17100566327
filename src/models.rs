//! Core data models used throughout the retrieval engine.
//!
//! These types represent the files, chunks, and search results that flow
//! through the sync and retrieval pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One indexed passage stored in `kb_chunks`.
///
/// Chunks are never updated in place: a file's chunks are always replaced
/// together in one transaction, so `(origin_file_id, chunk_index)` is unique
/// at any instant.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub source_category: Option<String>,
    pub origin_file_id: String,
    pub filename: String,
    pub chunk_index: i64,
    pub content_hash: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A chunk produced by the chunker, before it is embedded and stored.
///
/// The store assigns the id, position, and content hash on insert.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub content: String,
    pub metadata: serde_json::Value,
}

impl NewChunk {
    pub fn new(content: String) -> Self {
        Self {
            content,
            metadata: serde_json::json!({}),
        }
    }
}

/// Sync state of an origin file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Active,
    Deleted,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> SourceStatus {
        match s {
            "deleted" => SourceStatus::Deleted,
            _ => SourceStatus::Active,
        }
    }
}

/// One row of `kb_sources`, one per origin file ever seen.
///
/// `Active` implies the chunk store holds exactly `chunk_count` rows for
/// this file; `Deleted` implies zero.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub file_id: String,
    pub filename: String,
    pub category: Option<String>,
    pub modified_time: DateTime<Utc>,
    pub last_synced: DateTime<Utc>,
    pub chunk_count: i64,
    pub status: SourceStatus,
}

/// A file entry returned by the remote file lister.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub modified_time: DateTime<Utc>,
    pub category: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
}

/// Downloaded file content plus the transport metadata needed to parse it.
#[derive(Debug, Clone)]
pub struct FileContent {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub filename: String,
}

/// A chunk scored by the retrieval pipeline, created per query and
/// discarded after response assembly.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    /// Cosine similarity from the dense stage, when the chunk appeared there.
    pub dense_score: Option<f32>,
    /// 0-based rank from the lexical stage, when the chunk appeared there.
    pub lexical_rank: Option<usize>,
    /// Reciprocal-rank-fusion score over the lists the chunk appeared in.
    pub fused_score: f64,
    /// Relevance from the reranking stage, when it ran.
    pub rerank_score: Option<f32>,
}

impl RetrievedChunk {
    /// The score used for final ordering and thresholding: the rerank
    /// relevance when reranking ran, otherwise the fused score.
    pub fn final_score(&self) -> f64 {
        match self.rerank_score {
            Some(s) => s as f64,
            None => self.fused_score,
        }
    }
}

/// Outcome of one sync pass. Per-file failures accumulate in `errors`;
/// the pass itself still completes with partial results.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub files_synced: u64,
    pub files_skipped: u64,
    pub files_deleted: u64,
    pub chunks_inserted: u64,
    pub errors: Vec<String>,
    pub synced_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn empty() -> Self {
        Self {
            files_synced: 0,
            files_skipped: 0,
            files_deleted: 0,
            chunks_inserted: 0,
            errors: Vec::new(),
            synced_at: Utc::now(),
        }
    }
}
