//! Embedding client abstraction and the remote HTTP implementation.
//!
//! Queries and stored documents use distinct request modes
//! ([`EmbeddingInput`]): the roles are asymmetric for the underlying model,
//! so a query must never be embedded as a document or vice versa.
//!
//! Also provides the vector utilities shared with the chunk store:
//! [`vec_to_blob`] / [`blob_to_vec`] for little-endian f32 BLOB storage and
//! [`cosine_similarity`] for dense scoring.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{KbError, Result};
use crate::http::post_json_with_retry;

/// Request mode for an embedding call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingInput {
    Document,
    Query,
}

impl EmbeddingInput {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingInput::Document => "document",
            EmbeddingInput::Query => "query",
        }
    }
}

/// Turns text into dense vectors. Order-preserving: output `i` corresponds
/// to input `i`.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String], input: EmbeddingInput) -> Result<Vec<Vec<f32>>>;

    /// Vector dimensionality produced by this embedder.
    fn dims(&self) -> usize;
}

/// Embed a single query string for retrieval.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let mut vecs = embedder
        .embed(&[text.to_string()], EmbeddingInput::Query)
        .await?;
    if vecs.is_empty() {
        return Err(KbError::Data("empty embedding response".into()));
    }
    Ok(vecs.remove(0))
}

/// HTTP embedding client for a Voyage-style `/embeddings` endpoint.
///
/// Credentials are validated at construction time; a missing API key is a
/// configuration error, not a per-call failure.
pub struct VoyageEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    base_url: String,
    max_retries: u32,
}

impl VoyageEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| KbError::Config(format!("{} not set", config.api_key_env)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dims: config.dims,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for VoyageEmbedder {
    async fn embed(&self, texts: &[String], input: EmbeddingInput) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "input_type": input.as_str(),
        });

        let url = format!("{}/embeddings", self.base_url);
        let resp =
            post_json_with_retry(&self.client, &url, &self.api_key, &body, self.max_retries)
                .await?;

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| KbError::Data(format!("invalid embedding response: {}", e)))?;

        let mut rows = parsed.data;
        rows.sort_by_key(|r| r.index);

        if rows.len() != texts.len() {
            return Err(KbError::Data(format!(
                "embedding count mismatch: sent {}, got {}",
                texts.len(),
                rows.len()
            )));
        }

        Ok(rows.into_iter().map(|r| r.embedding).collect())
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Encode a float vector as a BLOB of little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Trailing bytes that do not fill
/// a whole f32 are dropped; callers validate length against the expected
/// dimensionality.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors, in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
