//! Ingestion orchestrator: walk, chunk, embed, store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::Instrument;

use crate::chunker::Chunker;
use crate::embedder::Embedder;
use crate::error::Result;
use crate::manifest::IngestManifest;
use crate::types::{Document, VectorRecord, record_id};
use crate::vector_store::{VectorStore, with_timeout};
use crate::workspace::{FileContent, Workspace};

pub const DEFAULT_EMBED_BATCH_SIZE: usize = 32;

/// Summary of an ingestion pass.
#[derive(Debug, Default, Clone)]
pub struct IngestReport {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_skipped: usize,
    pub chunks_written: usize,
    pub records_removed: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    /// The pass was skipped because the store already existed.
    pub skipped_pass: bool,
}

/// Keeps a vector store consistent with the current workspace contents.
pub struct IngestionPipeline {
    workspace: Workspace,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    manifest: IngestManifest,
    scope: String,
    embed_batch_size: usize,
    store_timeout: Duration,
    write_lock: Arc<Mutex<()>>,
}

impl IngestionPipeline {
    #[must_use]
    pub fn new(
        workspace: Workspace,
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        manifest: IngestManifest,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            workspace,
            chunker,
            embedder,
            store,
            manifest,
            scope: scope.into(),
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            store_timeout: Duration::from_secs(30),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.embed_batch_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Share the single-writer lock with other holders of the same store.
    #[must_use]
    pub fn with_write_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.write_lock = lock;
        self
    }

    #[must_use]
    pub fn write_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.write_lock)
    }

    /// Run one ingestion pass.
    ///
    /// With `skip_if_present`, returns immediately when the store already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedder or the store fails. Documents committed
    /// before the failure stay indexed; the rest keep their previous records.
    pub async fn run(&self, skip_if_present: bool) -> Result<IngestReport> {
        let span = tracing::info_span!(
            "ingest",
            root = %self.workspace.root().display(),
            store = self.store.name(),
            embedder = self.embedder.name(),
        );
        self.run_inner(skip_if_present).instrument(span).await
    }

    async fn run_inner(&self, skip_if_present: bool) -> Result<IngestReport> {
        let started = Instant::now();
        let mut report = IngestReport::default();
        let _guard = self.write_lock.lock().await;

        if skip_if_present && with_timeout("exists", self.store_timeout, self.store.exists()).await? {
            tracing::info!("index present, skipping ingestion");
            report.skipped_pass = true;
            return Ok(report);
        }

        with_timeout(
            "ensure",
            self.store_timeout,
            self.store.ensure(self.embedder.dimension()),
        )
        .await?;

        let mut previous = self.manifest.load(&self.scope).await?;
        if previous.values().any(|e| e.chunk_count > 0)
            && with_timeout("count", self.store_timeout, self.store.count()).await? == 0
        {
            tracing::warn!(
                scope = %self.scope,
                files = previous.len(),
                "store is empty but the manifest is not, re-ingesting everything"
            );
            self.manifest.clear(&self.scope).await?;
            previous.clear();
        }
        let files = self.workspace.files();
        let total = files.len();
        tracing::info!(total, "ingestion started");

        let mut seen: HashSet<String> = HashSet::with_capacity(total);
        for rel in files {
            report.files_scanned += 1;
            let text = match self.workspace.read_text(&rel).await {
                Ok(FileContent::Text(text)) => text,
                Ok(FileContent::Skipped(reason)) => {
                    tracing::debug!(file = %rel, ?reason, "skipping file");
                    report.files_skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(file = %rel, error = %e, "unreadable file skipped");
                    report.files_skipped += 1;
                    report.errors.push(format!("{rel}: {e}"));
                    // keep its previous records rather than purging them
                    seen.insert(rel);
                    continue;
                }
            };
            seen.insert(rel.clone());

            let doc = Document::new(rel, text);
            let old_count = match previous.get(&doc.path) {
                Some(entry) if entry.fingerprint == doc.fingerprint => {
                    report.files_unchanged += 1;
                    continue;
                }
                Some(entry) => entry.chunk_count,
                None => 0,
            };

            let written = self.index_document(&doc).await?;
            if old_count > written {
                let stale: Vec<String> = (written..old_count)
                    .map(|ordinal| record_id(&doc.path, ordinal))
                    .collect();
                report.records_removed += stale.len();
                with_timeout("delete", self.store_timeout, self.store.delete(stale)).await?;
            }
            self.manifest
                .record(&self.scope, &doc.path, &doc.fingerprint, written)
                .await?;

            report.files_indexed += 1;
            report.chunks_written += written;
            tracing::debug!(file = %doc.path, chunks = written, "indexed");
        }

        for (path, entry) in &previous {
            if seen.contains(path) {
                continue;
            }
            let stale: Vec<String> = (0..entry.chunk_count)
                .map(|ordinal| record_id(path, ordinal))
                .collect();
            report.records_removed += stale.len();
            with_timeout("delete", self.store_timeout, self.store.delete(stale)).await?;
            self.manifest.remove(&self.scope, path).await?;
            tracing::debug!(file = %path, "removed stale records");
        }

        self.manifest.mark_run(&self.scope).await?;
        report.duration_ms = started.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            files = report.files_scanned,
            indexed = report.files_indexed,
            unchanged = report.files_unchanged,
            skipped = report.files_skipped,
            chunks = report.chunks_written,
            removed = report.records_removed,
            duration_ms = report.duration_ms,
            "ingestion finished"
        );
        Ok(report)
    }

    /// Embed all chunks of `doc` and upsert them. Nothing is written unless
    /// every batch embeds successfully.
    async fn index_document(&self, doc: &Document) -> Result<usize> {
        let chunks = self.chunker.split(doc);
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            vectors.extend(self.embedder.embed_batch(&texts).await?);
        }

        let count = chunks.len();
        let records: Vec<VectorRecord> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord::from_chunk(chunk, vector))
            .collect();
        with_timeout("upsert", self.store_timeout, self.store.upsert(records)).await?;
        Ok(count)
    }
}
