//! Repository indexing pipeline.
//!
//! Coordinates the full indexing flow: root validation → discovery →
//! (optional clear) → chunking → embedding → upsert into the
//! [`IndexStore`]. Validation and discovery touch the filesystem and run on
//! the blocking pool.
//!
//! Discovered files are processed in fixed-size batches. Within a batch,
//! files are chunked concurrently on blocking workers (bounded by
//! `index.workers`), then every chunk of the batch is embedded and
//! submitted in a single upsert. Batches are committed strictly in order,
//! so a failure at batch `n` leaves batches `0..n` committed and nothing of
//! batch `n` reported as indexed.
//!
//! Re-running over unchanged files rewrites the same documents in place:
//! chunk identities are deterministic.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::chunk::Chunker;
use crate::config::{Config, IndexConfig};
use crate::discover::{DiscoveredFile, FileDiscoverer};
use crate::embedding::{embed_all, Embedder};
use crate::error::{BatchFailure, IndexError, IndexReport};
use crate::index_store::IndexStore;
use crate::models::Chunk;
use crate::repo::RootValidator;

/// Chunks produced for one batch, in discovery order.
struct BatchChunks {
    chunks: Vec<Chunk>,
    files_with_chunks: usize,
    files_skipped: usize,
}

/// What one committed batch contributed.
struct BatchSummary {
    chunks: usize,
    files_with_chunks: usize,
    files_skipped: usize,
}

pub struct IndexingPipeline {
    index: IndexConfig,
    chunker: Arc<Chunker>,
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn Embedder>,
    validator: Arc<dyn RootValidator>,
    embed_batch_size: usize,
}

impl IndexingPipeline {
    pub fn new(
        config: &Config,
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn Embedder>,
        validator: Box<dyn RootValidator>,
    ) -> Self {
        Self {
            index: config.index.clone(),
            chunker: Arc::new(Chunker::from_config(&config.chunking)),
            store,
            embedder,
            validator: Arc::from(validator),
            embed_batch_size: config.embedding.batch_size,
        }
    }

    /// Replace the chunker, e.g. to install a different tagger.
    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = Arc::new(chunker);
        self
    }

    /// Index every candidate file under `root`.
    ///
    /// With `force_reindex`, the index is cleared once the root has been
    /// validated, so stale chunks of deleted or shrunk files disappear. An
    /// invalid root never touches the index.
    pub async fn run(
        &self,
        root: &Path,
        batch_size: usize,
        force_reindex: bool,
    ) -> Result<IndexReport, IndexError> {
        self.run_until(root, batch_size, force_reindex, None).await
    }

    /// Like [`run`](Self::run), but every embedding and upsert call must
    /// finish before `deadline`. A call cut off by the deadline fails its
    /// batch.
    pub async fn run_until(
        &self,
        root: &Path,
        batch_size: usize,
        force_reindex: bool,
        deadline: Option<Instant>,
    ) -> Result<IndexReport, IndexError> {
        let invalid_root = |reason: String| IndexError::InvalidRoot {
            path: root.to_path_buf(),
            reason,
        };
        let validator = self.validator.clone();
        let owned_root = root.to_path_buf();
        tokio::task::spawn_blocking(move || validator.validate(&owned_root))
            .await
            .map_err(|e| invalid_root(e.to_string()))?
            .map_err(|e| invalid_root(e.to_string()))?;

        let discoverer =
            FileDiscoverer::new(&self.index).map_err(|e| IndexError::Discovery(e.to_string()))?;
        let owned_root = root.to_path_buf();
        let files = tokio::task::spawn_blocking(move || discoverer.discover(&owned_root))
            .await
            .map_err(|e| IndexError::Discovery(e.to_string()))?
            .map_err(|e| IndexError::Discovery(e.to_string()))?;

        let mut report = IndexReport::default();
        if force_reindex {
            report.documents_cleared = self
                .store
                .clear()
                .await
                .map_err(|e| IndexError::Clear(format!("{:#}", e)))?;
            info!(removed = report.documents_cleared, "Cleared index for forced reindex");
        }

        let batch_size = batch_size.max(1);
        let total_batches = files.len().div_ceil(batch_size);
        info!(
            root = %root.display(),
            files = files.len(),
            batches = total_batches,
            force_reindex,
            "Starting indexing run"
        );

        for (batch, batch_files) in files.chunks(batch_size).enumerate() {
            match self.index_batch(batch_files, deadline).await {
                Ok(outcome) => {
                    report.files_indexed += outcome.files_with_chunks;
                    report.chunks_indexed += outcome.chunks;
                    report.files_skipped += outcome.files_skipped;
                    report.batches_committed += 1;
                    info!(
                        "batch {}/{}: {} chunks from {} files",
                        batch + 1,
                        total_batches,
                        outcome.chunks,
                        outcome.files_with_chunks
                    );
                }
                Err(reason) => {
                    warn!(batch, error = %reason, "Batch failed, aborting indexing run");
                    return Err(IndexError::BatchFailed {
                        batch,
                        committed: report,
                        reason,
                    });
                }
            }
        }

        info!(
            files_indexed = report.files_indexed,
            chunks_indexed = report.chunks_indexed,
            files_skipped = report.files_skipped,
            "Indexing complete"
        );
        Ok(report)
    }

    /// Chunk, embed and upsert one batch.
    async fn index_batch(
        &self,
        files: &[DiscoveredFile],
        deadline: Option<Instant>,
    ) -> Result<BatchSummary, BatchFailure> {
        let started = Instant::now();
        let outcome = self.chunk_batch(files).await?;
        let summary = BatchSummary {
            chunks: outcome.chunks.len(),
            files_with_chunks: outcome.files_with_chunks,
            files_skipped: outcome.files_skipped,
        };
        if outcome.chunks.is_empty() {
            debug!(files = files.len(), "Batch produced no chunks");
            return Ok(summary);
        }

        let texts: Vec<String> = outcome.chunks.iter().map(|c| c.content.clone()).collect();
        let embedding = embed_all(self.embedder.as_ref(), &texts, self.embed_batch_size);
        let vectors = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, embedding)
                .await
                .map_err(|_| BatchFailure::TimedOut(started.elapsed()))?,
            None => embedding.await,
        }
        .map_err(|e| BatchFailure::Embedding(format!("{:#}", e)))?;

        let documents: Vec<_> = outcome
            .chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| chunk.into_document(vector))
            .collect();

        let budget = self.call_budget(deadline);
        if budget.is_zero() {
            return Err(BatchFailure::TimedOut(started.elapsed()));
        }
        tokio::time::timeout(budget, self.store.upsert(&documents))
            .await
            .map_err(|_| BatchFailure::TimedOut(budget))?
            .map_err(|e| BatchFailure::Store(format!("{:#}", e)))?;

        Ok(summary)
    }

    /// Time allowed for one upsert: the configured timeout, cut short by
    /// the caller's deadline.
    fn call_budget(&self, deadline: Option<Instant>) -> Duration {
        let timeout = self.index.upsert_timeout();
        match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(timeout),
            None => timeout,
        }
    }

    /// Chunk files on blocking workers, at most `index.workers` at a time.
    async fn chunk_batch(&self, files: &[DiscoveredFile]) -> Result<BatchChunks, BatchFailure> {
        let semaphore = Arc::new(Semaphore::new(self.index.workers.max(1)));
        let mut set = JoinSet::new();

        for (pos, file) in files.iter().enumerate() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| BatchFailure::Worker(e.to_string()))?;
            let chunker = self.chunker.clone();
            let file = file.clone();
            set.spawn_blocking(move || {
                let _permit = permit;
                (pos, chunk_one(&chunker, &file))
            });
        }

        let mut per_file: Vec<Option<Vec<Chunk>>> = vec![None; files.len()];
        while let Some(joined) = set.join_next().await {
            let (pos, chunks) = joined.map_err(|e| BatchFailure::Worker(e.to_string()))?;
            per_file[pos] = chunks;
        }

        let mut outcome = BatchChunks {
            chunks: Vec::new(),
            files_with_chunks: 0,
            files_skipped: 0,
        };
        for chunks in per_file {
            match chunks {
                Some(chunks) if !chunks.is_empty() => {
                    outcome.files_with_chunks += 1;
                    outcome.chunks.extend(chunks);
                }
                Some(_) => {}
                None => outcome.files_skipped += 1,
            }
        }
        Ok(outcome)
    }
}

/// Read and chunk one file. `None` when it cannot be read as UTF-8 text.
fn chunk_one(chunker: &Chunker, file: &DiscoveredFile) -> Option<Vec<Chunk>> {
    let bytes = match std::fs::read(&file.path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(file = %file.relative, error = %e, "Skipping unreadable file");
            return None;
        }
    };
    let content = match String::from_utf8(bytes) {
        Ok(content) => content,
        Err(_) => {
            warn!(file = %file.relative, "Skipping file that is not valid UTF-8");
            return None;
        }
    };

    let chunks = chunker.chunk(&content, &file.relative);
    debug!(file = %file.relative, chunks = chunks.len(), "Chunked file");
    Some(chunks)
}
