//! Second-pass reranking of a small candidate set.
//!
//! A reranker jointly scores (query, document) pairs with a higher-precision
//! model than the embedding similarity used for candidate generation.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::RerankConfig;
use crate::error::{KbError, Result};
use crate::http::post_json_with_retry;

/// Scores documents against a query. Returns `(input index, relevance)`
/// pairs ordered by descending relevance, at most `top_k` of them.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<(usize, f32)>>;
}

/// HTTP rerank client for a Voyage-style `/rerank` endpoint.
pub struct VoyageReranker {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_retries: u32,
}

impl VoyageReranker {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| KbError::Config(format!("{} not set", config.api_key_env)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }
}

#[derive(Deserialize)]
struct RerankResponse {
    data: Vec<RerankRow>,
}

#[derive(Deserialize)]
struct RerankRow {
    index: usize,
    relevance_score: f32,
}

#[async_trait]
impl Reranker for VoyageReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<(usize, f32)>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "query": query,
            "documents": documents,
            "top_k": top_k,
        });

        let url = format!("{}/rerank", self.base_url);
        let resp =
            post_json_with_retry(&self.client, &url, &self.api_key, &body, self.max_retries)
                .await?;

        let parsed: RerankResponse = resp
            .json()
            .await
            .map_err(|e| KbError::Data(format!("invalid rerank response: {}", e)))?;

        let mut rows: Vec<(usize, f32)> = parsed
            .data
            .into_iter()
            .map(|r| (r.index, r.relevance_score))
            .collect();

        // The endpoint returns results ordered by relevance already; sort
        // anyway so callers can rely on it.
        rows.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        rows.truncate(top_k);

        for (idx, _) in &rows {
            if *idx >= documents.len() {
                return Err(KbError::Data(format!(
                    "rerank index {} out of range for {} documents",
                    idx,
                    documents.len()
                )));
            }
        }

        Ok(rows)
    }
}
