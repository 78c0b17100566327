//! Hybrid retrieval: dense and lexical candidate generation fused with
//! Reciprocal Rank Fusion, followed by optional reranking and threshold
//! filtering.
//!
//! The pipeline is: embed the query, pull `candidate_count` dense candidates
//! and (when lexical search is enabled) `candidate_count` lexical candidates,
//! fuse the two rankings, then either rerank the fused set down to `top_k`
//! or take the fused top `top_k` directly. A positive score threshold drops
//! weak results at the very end; zero disables the filter.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embed::{embed_query, Embedder};
use crate::error::Result;
use crate::models::{Chunk, RetrievedChunk};
use crate::rerank::Reranker;
use crate::store::ChunkStore;

pub struct HybridRetriever {
    store: ChunkStore,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        store: ChunkStore,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            reranker,
            config,
        }
    }

    /// Run the full retrieval pipeline for one query.
    ///
    /// Returns at most `top_k` results in descending score order. An empty
    /// corpus (or one with no candidates for the category filter) yields an
    /// empty result, not an error.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        candidate_count: usize,
        threshold: f32,
        category: Option<&str>,
    ) -> Result<Vec<RetrievedChunk>> {
        // A candidate pool smaller than the requested result count can never
        // fill it; widen silently.
        let candidate_count = candidate_count.max(top_k);

        let query_vec = embed_query(self.embedder.as_ref(), query).await?;

        let dense = self
            .store
            .dense_search(&query_vec, candidate_count, category)
            .await?;
        if dense.is_empty() {
            debug!(query, "no dense candidates, returning empty result");
            return Ok(Vec::new());
        }

        let lexical = if self.config.lexical_weight > 0.0 {
            self.store
                .lexical_search(query, candidate_count, category)
                .await?
        } else {
            Vec::new()
        };

        debug!(
            dense = dense.len(),
            lexical = lexical.len(),
            "fusing candidate lists"
        );

        let mut fused = fuse_candidates(dense, lexical, self.config.rrf_k, candidate_count);

        if let Some(reranker) = &self.reranker {
            let documents: Vec<String> = fused.iter().map(|r| r.chunk.content.clone()).collect();
            let ranking = reranker.rerank(query, &documents, top_k).await?;

            let mut reranked = Vec::with_capacity(ranking.len());
            // Walk in descending relevance order; indices refer to the fused
            // candidate list.
            for (idx, score) in ranking {
                let mut result = fused[idx].clone();
                result.rerank_score = Some(score);
                reranked.push(result);
            }
            fused = reranked;
        }

        fused.truncate(top_k);

        if threshold > 0.0 {
            fused.retain(|r| r.final_score() >= threshold as f64);
        }

        Ok(fused)
    }
}

/// Fuse a dense candidate list and a lexical candidate list with Reciprocal
/// Rank Fusion.
///
/// Each chunk contributes `1 / (k + rank + 1)` per list it appears in, with
/// zero-based ranks, so a chunk found by both searches outranks one found by
/// a single search at comparable positions. Ties break on chunk id for a
/// stable ordering. Returns at most `limit` results, best first.
pub fn fuse_candidates(
    dense: Vec<(Chunk, f32)>,
    lexical: Vec<Chunk>,
    rrf_k: f64,
    limit: usize,
) -> Vec<RetrievedChunk> {
    let mut by_id: HashMap<String, RetrievedChunk> = HashMap::new();

    for (rank, (chunk, score)) in dense.into_iter().enumerate() {
        let contribution = 1.0 / (rrf_k + rank as f64 + 1.0);
        by_id.insert(
            chunk.id.clone(),
            RetrievedChunk {
                chunk,
                dense_score: Some(score),
                lexical_rank: None,
                fused_score: contribution,
                rerank_score: None,
            },
        );
    }

    for (rank, chunk) in lexical.into_iter().enumerate() {
        let contribution = 1.0 / (rrf_k + rank as f64 + 1.0);
        by_id
            .entry(chunk.id.clone())
            .and_modify(|entry| {
                entry.lexical_rank = Some(rank);
                entry.fused_score += contribution;
            })
            .or_insert(RetrievedChunk {
                chunk,
                dense_score: None,
                lexical_rank: Some(rank),
                fused_score: contribution,
                rerank_score: None,
            });
    }

    let mut fused: Vec<RetrievedChunk> = by_id.into_values().collect();
    fused.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    fused.truncate(limit);
    fused
}
