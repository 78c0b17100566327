//! Change-detection sync between the remote file store and the chunk store.
//!
//! One pass lists the remote store, removes chunks for files that vanished,
//! and re-chunks / re-embeds files that are new or have a listing
//! `modified_time` newer than their last sync. Failures are per-file: a bad
//! download or parse lands in the report's error list and the pass moves on,
//! leaving that file's previously stored chunks intact.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::chunker::{chunk_markdown, chunk_text};
use crate::config::ChunkingConfig;
use crate::embed::{Embedder, EmbeddingInput};
use crate::error::Result;
use crate::models::{NewChunk, RemoteFile, SourceRecord, SourceStatus, SyncReport};
use crate::parse::parse_content;
use crate::remote::{FileFetcher, FileLister};
use crate::store::ChunkStore;

pub struct SyncEngine {
    store: ChunkStore,
    embedder: Arc<dyn Embedder>,
    lister: Arc<dyn FileLister>,
    fetcher: Arc<dyn FileFetcher>,
    chunking: ChunkingConfig,
    embed_batch: usize,
}

impl SyncEngine {
    pub fn new(
        store: ChunkStore,
        embedder: Arc<dyn Embedder>,
        lister: Arc<dyn FileLister>,
        fetcher: Arc<dyn FileFetcher>,
        chunking: ChunkingConfig,
        embed_batch: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            lister,
            fetcher,
            chunking,
            embed_batch,
        }
    }

    /// Run one sync pass. With `force`, every listed file is reprocessed
    /// regardless of timestamps.
    ///
    /// Only a failed listing aborts the pass; everything after that degrades
    /// per file into the report's `errors`.
    pub async fn sync(&self, force: bool) -> Result<SyncReport> {
        let files = self.lister.list_files().await?;
        let sources = self.store.load_sources().await?;
        let records: HashMap<&str, &SourceRecord> =
            sources.iter().map(|r| (r.file_id.as_str(), r)).collect();

        info!(remote = files.len(), known = sources.len(), force, "sync pass starting");

        let mut report = SyncReport::empty();
        let now = Utc::now();

        // Files we know about that no longer appear in the listing are gone
        // from the remote store.
        let listed: HashSet<&str> = files.iter().map(|f| f.id.as_str()).collect();
        for record in &sources {
            if record.status == SourceStatus::Active && !listed.contains(record.file_id.as_str()) {
                match self.store.delete_file_chunks(&record.file_id, now).await {
                    Ok(removed) => {
                        info!(file = %record.filename, chunks = removed, "removed deleted file");
                        report.files_deleted += 1;
                    }
                    Err(e) => {
                        error!(file = %record.filename, error = %e, "delete failed");
                        report.errors.push(format!("{}: {}", record.filename, e));
                    }
                }
            }
        }

        for file in &files {
            let needs_sync = force
                || match records.get(file.id.as_str()) {
                    None => true,
                    // A deleted record means the file vanished and came back;
                    // its chunks are gone, so reprocess.
                    Some(r) => r.status == SourceStatus::Deleted || file.modified_time > r.last_synced,
                };

            if !needs_sync {
                report.files_skipped += 1;
                continue;
            }

            match self.process_file(file).await {
                Ok(Some(inserted)) => {
                    report.files_synced += 1;
                    report.chunks_inserted += inserted;
                }
                Ok(None) => {
                    report.files_skipped += 1;
                }
                Err(e) => {
                    error!(file = %file.name, error = %e, "file sync failed");
                    report.errors.push(format!("{}: {}", file.name, e));
                }
            }
        }

        report.synced_at = Utc::now();
        info!(
            synced = report.files_synced,
            skipped = report.files_skipped,
            deleted = report.files_deleted,
            chunks = report.chunks_inserted,
            errors = report.errors.len(),
            "sync pass finished"
        );
        Ok(report)
    }

    /// Download, parse, chunk, embed and store one file. Returns
    /// `Ok(None)` when the file parses to empty text and is skipped.
    async fn process_file(&self, file: &RemoteFile) -> Result<Option<u64>> {
        let content = self.fetcher.download(&file.id).await?;
        let text = parse_content(&content.bytes, &content.content_type, &content.filename)?;

        if text.trim().is_empty() {
            warn!(file = %file.name, "file parsed to empty text, leaving stored chunks as-is");
            return Ok(None);
        }

        let chunks = self.build_chunks(&text, &file.name);
        if chunks.is_empty() {
            warn!(file = %file.name, "chunking produced no chunks, skipping");
            return Ok(None);
        }

        debug!(file = %file.name, chunks = chunks.len(), "embedding file");
        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.embed_batch) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let mut vecs = self.embedder.embed(&texts, EmbeddingInput::Document).await?;
            embeddings.append(&mut vecs);
        }

        let inserted = self
            .store
            .replace_file_chunks(file, &chunks, &embeddings, Utc::now())
            .await?;
        Ok(Some(inserted))
    }

    /// Markdown files are split along their heading structure, with the
    /// heading path kept as chunk metadata; everything else is split on
    /// natural text boundaries.
    fn build_chunks(&self, text: &str, filename: &str) -> Vec<NewChunk> {
        if filename.ends_with(".md") {
            chunk_markdown(text, self.chunking.chunk_size, self.chunking.overlap)
                .into_iter()
                .map(|(content, section)| {
                    let mut chunk = NewChunk::new(content);
                    if !section.is_empty() {
                        chunk.metadata = serde_json::json!({ "section": section });
                    }
                    chunk
                })
                .collect()
        } else {
            chunk_text(text, self.chunking.chunk_size, self.chunking.overlap)
                .into_iter()
                .map(NewChunk::new)
                .collect()
        }
    }
}
