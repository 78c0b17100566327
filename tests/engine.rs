//! End-to-end tests for the sync and retrieval pipelines against an
//! in-memory SQLite database, with fake embedding, rerank, and remote-store
//! collaborators.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use kb_engine::config::{ChunkingConfig, RetrievalConfig};
use kb_engine::db;
use kb_engine::embed::{Embedder, EmbeddingInput};
use kb_engine::models::{Chunk, FileContent, RemoteFile};
use kb_engine::remote::{FileFetcher, FileLister};
use kb_engine::rerank::Reranker;
use kb_engine::retriever::HybridRetriever;
use kb_engine::store::ChunkStore;
use kb_engine::sync::SyncEngine;
use kb_engine::KbError;

/// Fixed vocabulary for deterministic fake embeddings: one dimension per
/// word, so cosine similarity directly reflects shared vocabulary.
const VOCAB: &[&str] = &[
    "docker",
    "kubernetes",
    "container",
    "orchestration",
    "recipe",
    "pasta",
    "garden",
    "tomato",
];

struct FakeEmbedder;

impl FakeEmbedder {
    fn vectorize(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; VOCAB.len()];
        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if let Some(pos) = VOCAB.iter().position(|w| *w == token) {
                v[pos] += 1.0;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        _input: EmbeddingInput,
    ) -> kb_engine::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::vectorize(t)).collect())
    }

    fn dims(&self) -> usize {
        VOCAB.len()
    }
}

/// Scores by Jaccard overlap of lowercase token sets.
struct FakeReranker;

fn token_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

#[async_trait]
impl Reranker for FakeReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> kb_engine::Result<Vec<(usize, f32)>> {
        let q = token_set(query);
        let mut scored: Vec<(usize, f32)> = documents
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                let d = token_set(doc);
                let inter = q.intersection(&d).count();
                let union = q.union(&d).count();
                let score = if union == 0 {
                    0.0
                } else {
                    inter as f32 / union as f32
                };
                (i, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));
        scored.truncate(top_k);
        Ok(scored)
    }
}

/// In-memory stand-in for the storage gateway.
#[derive(Default)]
struct FakeRemote {
    files: Mutex<HashMap<String, (RemoteFile, Vec<u8>)>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeRemote {
    fn upsert(&self, file: RemoteFile, bytes: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(file.id.clone(), (file, bytes.to_vec()));
    }

    fn remove(&self, id: &str) {
        self.files.lock().unwrap().remove(id);
    }

    fn fail_download(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }
}

#[async_trait]
impl FileLister for FakeRemote {
    async fn list_files(&self) -> kb_engine::Result<Vec<RemoteFile>> {
        let mut files: Vec<RemoteFile> = self
            .files
            .lock()
            .unwrap()
            .values()
            .map(|(f, _)| f.clone())
            .collect();
        files.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(files)
    }
}

#[async_trait]
impl FileFetcher for FakeRemote {
    async fn download(&self, file_id: &str) -> kb_engine::Result<FileContent> {
        if self.failing.lock().unwrap().contains(file_id) {
            return Err(KbError::Transport(format!("download failed: {}", file_id)));
        }
        let files = self.files.lock().unwrap();
        let (file, bytes) = files
            .get(file_id)
            .ok_or_else(|| KbError::Transport(format!("not found: {}", file_id)))?;
        let content_type = if file.name.ends_with(".md") {
            "text/markdown"
        } else {
            "text/plain"
        };
        Ok(FileContent {
            bytes: bytes.clone(),
            content_type: content_type.to_string(),
            filename: file.name.clone(),
        })
    }
}

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

fn remote_file(id: &str, name: &str, category: Option<&str>) -> RemoteFile {
    RemoteFile {
        id: id.to_string(),
        name: name.to_string(),
        mime_type: "text/plain".to_string(),
        modified_time: ts(1_700_000_000),
        category: category.map(|c| c.to_string()),
        size: None,
    }
}

struct Harness {
    store: ChunkStore,
    engine: SyncEngine,
    remote: Arc<FakeRemote>,
}

async fn harness() -> anyhow::Result<Harness> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let pool = db::connect_in_memory().await?;
    let store = ChunkStore::new(pool);
    store.init_schema().await?;

    let remote = Arc::new(FakeRemote::default());
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder);
    let engine = SyncEngine::new(
        store.clone(),
        embedder,
        remote.clone(),
        remote.clone(),
        ChunkingConfig::default(),
        96,
    );

    Ok(Harness {
        store,
        engine,
        remote,
    })
}

fn retriever(store: &ChunkStore, rerank: bool, config: RetrievalConfig) -> HybridRetriever {
    let reranker: Option<Arc<dyn Reranker>> = if rerank {
        Some(Arc::new(FakeReranker))
    } else {
        None
    };
    HybridRetriever::new(store.clone(), Arc::new(FakeEmbedder), reranker, config)
}

/// Fetch every stored chunk. A zero query vector scores everything equally
/// and filters nothing.
async fn all_chunks(store: &ChunkStore) -> anyhow::Result<Vec<Chunk>> {
    let zero = vec![0.0f32; VOCAB.len()];
    Ok(store
        .dense_search(&zero, 1000, None)
        .await?
        .into_iter()
        .map(|(c, _)| c)
        .collect())
}

#[tokio::test]
async fn sync_with_empty_listing_reports_all_zero() -> anyhow::Result<()> {
    let h = harness().await?;

    let report = h.engine.sync(false).await?;

    assert_eq!(report.files_synced, 0);
    assert_eq!(report.files_skipped, 0);
    assert_eq!(report.files_deleted, 0);
    assert_eq!(report.chunks_inserted, 0);
    assert!(report.errors.is_empty());
    Ok(())
}

#[tokio::test]
async fn sync_ingests_new_files() -> anyhow::Result<()> {
    let h = harness().await?;
    h.remote.upsert(
        remote_file("f1", "k8s.txt", Some("eng")),
        b"Kubernetes handles container orchestration.",
    );
    h.remote.upsert(
        remote_file("f2", "dinner.txt", Some("cooking")),
        b"Pasta recipe with tomato.",
    );

    let report = h.engine.sync(false).await?;

    assert_eq!(report.files_synced, 2);
    assert_eq!(report.chunks_inserted, 2);
    assert!(report.errors.is_empty());
    assert_eq!(h.store.file_chunk_count("f1").await?, 1);
    assert_eq!(h.store.file_chunk_count("f2").await?, 1);
    Ok(())
}

#[tokio::test]
async fn unchanged_files_are_skipped_on_resync() -> anyhow::Result<()> {
    let h = harness().await?;
    h.remote.upsert(
        remote_file("f1", "k8s.txt", None),
        b"Kubernetes handles container orchestration.",
    );
    h.engine.sync(false).await?;
    let before: Vec<String> = all_chunks(&h.store).await?.iter().map(|c| c.id.clone()).collect();

    let report = h.engine.sync(false).await?;

    assert_eq!(report.files_synced, 0);
    assert_eq!(report.files_skipped, 1);
    assert_eq!(report.chunks_inserted, 0);
    let after: Vec<String> = all_chunks(&h.store).await?.iter().map(|c| c.id.clone()).collect();
    assert_eq!(before, after);
    Ok(())
}

#[tokio::test]
async fn force_resync_replaces_chunks_with_fresh_ids() -> anyhow::Result<()> {
    let h = harness().await?;
    h.remote.upsert(
        remote_file("f1", "k8s.txt", None),
        b"Kubernetes handles container orchestration.",
    );
    h.engine.sync(false).await?;
    let before: HashSet<String> = all_chunks(&h.store).await?.iter().map(|c| c.id.clone()).collect();

    let report = h.engine.sync(true).await?;

    assert_eq!(report.files_synced, 1);
    assert_eq!(report.chunks_inserted, 1);
    let after: HashSet<String> = all_chunks(&h.store).await?.iter().map(|c| c.id.clone()).collect();
    assert!(before.is_disjoint(&after));
    assert_eq!(h.store.file_chunk_count("f1").await?, 1);
    Ok(())
}

#[tokio::test]
async fn modified_file_is_reprocessed() -> anyhow::Result<()> {
    let h = harness().await?;
    h.remote.upsert(remote_file("f1", "notes.txt", None), b"Old pasta recipe.");
    h.engine.sync(false).await?;

    let mut updated = remote_file("f1", "notes.txt", None);
    updated.modified_time = Utc::now() + Duration::hours(1);
    h.remote.upsert(updated, b"New tomato recipe from the garden.");

    let report = h.engine.sync(false).await?;

    assert_eq!(report.files_synced, 1);
    let chunks = all_chunks(&h.store).await?;
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].content.contains("tomato"));
    Ok(())
}

#[tokio::test]
async fn vanished_file_chunks_are_removed() -> anyhow::Result<()> {
    let h = harness().await?;
    h.remote.upsert(
        remote_file("f1", "k8s.txt", None),
        b"Kubernetes handles container orchestration.",
    );
    h.remote.upsert(remote_file("f2", "dinner.txt", None), b"Pasta recipe.");
    h.engine.sync(false).await?;

    h.remote.remove("f1");
    let report = h.engine.sync(false).await?;

    assert_eq!(report.files_deleted, 1);
    assert_eq!(report.files_skipped, 1);
    assert_eq!(h.store.file_chunk_count("f1").await?, 0);
    assert_eq!(h.store.file_chunk_count("f2").await?, 1);
    Ok(())
}

#[tokio::test]
async fn reappearing_file_is_reprocessed() -> anyhow::Result<()> {
    let h = harness().await?;
    let file = remote_file("f1", "k8s.txt", None);
    h.remote
        .upsert(file.clone(), b"Kubernetes handles container orchestration.");
    h.engine.sync(false).await?;

    h.remote.remove("f1");
    h.engine.sync(false).await?;
    assert_eq!(h.store.file_chunk_count("f1").await?, 0);

    // Same listing entry, same timestamp. The deleted record alone must
    // trigger reprocessing.
    h.remote
        .upsert(file, b"Kubernetes handles container orchestration.");
    let report = h.engine.sync(false).await?;

    assert_eq!(report.files_synced, 1);
    assert_eq!(h.store.file_chunk_count("f1").await?, 1);
    Ok(())
}

#[tokio::test]
async fn download_failure_is_isolated_and_keeps_old_chunks() -> anyhow::Result<()> {
    let h = harness().await?;
    h.remote.upsert(remote_file("f1", "a.txt", None), b"Docker container notes.");
    h.remote.upsert(remote_file("f2", "b.txt", None), b"Pasta recipe.");
    h.engine.sync(false).await?;

    let mut updated = remote_file("f1", "a.txt", None);
    updated.modified_time = Utc::now() + Duration::hours(1);
    h.remote.upsert(updated, b"Updated docker notes.");
    h.remote.fail_download("f1");

    let report = h.engine.sync(false).await?;

    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("a.txt"));
    assert_eq!(report.files_synced, 0);
    assert_eq!(report.files_skipped, 1);
    // The failed file's previous chunks survive.
    assert_eq!(h.store.file_chunk_count("f1").await?, 1);
    let chunks = all_chunks(&h.store).await?;
    let f1_chunk = chunks.iter().find(|c| c.origin_file_id == "f1").unwrap();
    assert!(f1_chunk.content.contains("Docker container notes"));
    Ok(())
}

#[tokio::test]
async fn file_that_parses_empty_is_skipped_keeping_old_chunks() -> anyhow::Result<()> {
    let h = harness().await?;
    h.remote.upsert(remote_file("f1", "notes.txt", None), b"Docker container notes.");
    h.engine.sync(false).await?;

    let mut updated = remote_file("f1", "notes.txt", None);
    updated.modified_time = Utc::now() + Duration::hours(1);
    h.remote.upsert(updated, b"   \n\t  ");

    let report = h.engine.sync(false).await?;

    assert_eq!(report.files_synced, 0);
    assert_eq!(report.files_skipped, 1);
    assert!(report.errors.is_empty());
    assert_eq!(h.store.file_chunk_count("f1").await?, 1);
    Ok(())
}

#[tokio::test]
async fn retrieve_ranks_relevant_chunk_first_with_rerank() -> anyhow::Result<()> {
    let h = harness().await?;
    h.remote.upsert(
        remote_file("f1", "k8s.txt", None),
        b"Kubernetes handles container orchestration and scheduling.",
    );
    h.remote.upsert(
        remote_file("f2", "dinner.txt", None),
        b"Pasta recipe with tomato from the garden.",
    );
    h.remote.upsert(
        remote_file("f3", "plants.txt", None),
        b"The garden tomato needs watering.",
    );
    h.engine.sync(false).await?;

    let r = retriever(
        &h.store,
        true,
        RetrievalConfig {
            threshold: 0.0,
            ..Default::default()
        },
    );
    let results = r
        .retrieve("container orchestration with kubernetes", 2, 30, 0.1, None)
        .await?;

    assert!(!results.is_empty());
    assert!(results[0].chunk.content.contains("Kubernetes"));
    assert!(results[0].rerank_score.is_some());
    assert!(results[0].final_score() > 0.1);
    Ok(())
}

#[tokio::test]
async fn retrieve_on_empty_corpus_returns_empty() -> anyhow::Result<()> {
    let h = harness().await?;
    let r = retriever(&h.store, true, RetrievalConfig::default());

    let results = r.retrieve("kubernetes", 5, 30, 0.15, None).await?;

    assert!(results.is_empty());
    Ok(())
}

#[tokio::test]
async fn threshold_filters_results_and_zero_disables_it() -> anyhow::Result<()> {
    let h = harness().await?;
    h.remote.upsert(
        remote_file("f1", "k8s.txt", None),
        b"Kubernetes handles container orchestration.",
    );
    h.engine.sync(false).await?;

    let r = retriever(&h.store, false, RetrievalConfig::default());

    // Without reranking, fused scores sit near 1/61 per list; 0.5 cuts
    // everything.
    let strict = r.retrieve("kubernetes", 5, 30, 0.5, None).await?;
    assert!(strict.is_empty());

    let open = r.retrieve("kubernetes", 5, 30, 0.0, None).await?;
    assert_eq!(open.len(), 1);
    Ok(())
}

#[tokio::test]
async fn category_filter_restricts_results() -> anyhow::Result<()> {
    let h = harness().await?;
    h.remote.upsert(
        remote_file("f1", "k8s.txt", Some("eng")),
        b"Kubernetes container orchestration with docker.",
    );
    h.remote.upsert(
        remote_file("f2", "dinner.txt", Some("cooking")),
        b"Pasta recipe with tomato, docker not involved.",
    );
    h.engine.sync(false).await?;

    let r = retriever(&h.store, false, RetrievalConfig::default());
    let results = r.retrieve("docker", 5, 30, 0.0, Some("cooking")).await?;

    assert!(!results.is_empty());
    for result in &results {
        assert_eq!(result.chunk.source_category.as_deref(), Some("cooking"));
    }
    Ok(())
}

#[tokio::test]
async fn candidate_count_below_top_k_is_widened() -> anyhow::Result<()> {
    let h = harness().await?;
    for i in 1..=3 {
        h.remote.upsert(
            remote_file(&format!("f{}", i), &format!("doc{}.txt", i), None),
            format!("Docker notes number {}.", i).as_bytes(),
        );
    }
    h.engine.sync(false).await?;

    let r = retriever(&h.store, false, RetrievalConfig::default());
    let results = r.retrieve("docker", 3, 1, 0.0, None).await?;

    assert_eq!(results.len(), 3);
    Ok(())
}

#[tokio::test]
async fn dense_only_retrieval_when_lexical_weight_is_zero() -> anyhow::Result<()> {
    let h = harness().await?;
    h.remote.upsert(
        remote_file("f1", "k8s.txt", None),
        b"Kubernetes handles container orchestration.",
    );
    h.engine.sync(false).await?;

    let r = retriever(
        &h.store,
        false,
        RetrievalConfig {
            lexical_weight: 0.0,
            ..Default::default()
        },
    );
    let results = r.retrieve("kubernetes", 5, 30, 0.0, None).await?;

    assert_eq!(results.len(), 1);
    assert!(results[0].dense_score.is_some());
    assert!(results[0].lexical_rank.is_none());
    Ok(())
}

#[tokio::test]
async fn lexical_stage_matches_stemmed_terms() -> anyhow::Result<()> {
    let h = harness().await?;
    h.remote.upsert(
        remote_file("f1", "k8s.txt", None),
        b"Kubernetes handles container orchestration.",
    );
    h.engine.sync(false).await?;

    // "containers" has no dense signal (not in the fake vocabulary) but the
    // porter stemmer maps it onto the stored "container".
    let results = h.store.lexical_search("containers", 10, None).await?;

    assert_eq!(results.len(), 1);
    assert!(results[0].content.contains("container"));
    Ok(())
}

#[tokio::test]
async fn markdown_sections_are_kept_as_metadata() -> anyhow::Result<()> {
    let h = harness().await?;
    let doc = b"# Deploy\n\nUse kubernetes for container orchestration.\n\n## Cooking\n\nPasta recipe with tomato and garden herbs.\n";
    h.remote.upsert(remote_file("f1", "guide.md", None), doc);
    h.engine.sync(false).await?;

    let r = retriever(&h.store, false, RetrievalConfig::default());
    let results = r.retrieve("pasta recipe tomato", 1, 30, 0.0, None).await?;

    assert_eq!(results.len(), 1);
    assert!(results[0].chunk.content.contains("Pasta"));
    assert_eq!(
        results[0].chunk.metadata["section"].as_str(),
        Some("Deploy > Cooking")
    );
    Ok(())
}
