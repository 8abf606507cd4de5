use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use pr_context::config::Config;
use pr_context::embedding::{Embedder, HashingEmbedder};
use pr_context::error::{BatchFailure, IndexError};
use pr_context::index_store::{InMemoryIndexStore, IndexStats, IndexStore, ScoredDocument};
use pr_context::models::ChunkDocument;
use pr_context::pipeline::IndexingPipeline;
use pr_context::repo::DirectoryValidator;

const DIMS: usize = 64;

fn python_source(lines: usize) -> String {
    let mut out = String::from("import os\nfrom typing import List\n");
    for i in 2..lines {
        if i % 12 == 2 {
            out.push_str(&format!("def process_{}(items: List[str]) -> int:\n", i));
        } else {
            out.push_str(&format!("    total_{} = len(items) + {}\n", i, i));
        }
    }
    out
}

fn pipeline_with(store: Arc<dyn IndexStore>, embedder: Arc<dyn Embedder>) -> IndexingPipeline {
    IndexingPipeline::new(
        &Config::default(),
        store,
        embedder,
        Box::new(DirectoryValidator),
    )
}

fn pipeline(store: Arc<dyn IndexStore>) -> IndexingPipeline {
    pipeline_with(store, Arc::new(HashingEmbedder::new(DIMS)))
}

async fn all_documents(store: &dyn IndexStore) -> Vec<ChunkDocument> {
    store
        .query(&vec![1.0f32; DIMS], usize::MAX, &BTreeMap::new())
        .await
        .unwrap()
        .into_iter()
        .map(|hit| hit.document)
        .collect()
}

fn write(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Delegates to an in-memory store, failing the `fail_on`-th upsert (1-based).
struct FlakyStore {
    inner: InMemoryIndexStore,
    calls: AtomicUsize,
    fail_on: usize,
}

#[async_trait]
impl IndexStore for FlakyStore {
    async fn upsert(&self, documents: &[ChunkDocument]) -> Result<Vec<String>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            anyhow::bail!("index unavailable");
        }
        self.inner.upsert(documents).await
    }
    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<ScoredDocument>> {
        self.inner.query(vector, limit, filters).await
    }
    async fn stats(&self) -> Result<IndexStats> {
        self.inner.stats().await
    }
    async fn clear(&self) -> Result<u64> {
        self.inner.clear().await
    }
    async fn delete(&self) -> Result<()> {
        self.inner.delete().await
    }
}

/// Never finishes an upsert in time.
struct SlowStore;

#[async_trait]
impl IndexStore for SlowStore {
    async fn upsert(&self, documents: &[ChunkDocument]) -> Result<Vec<String>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(documents.iter().map(|d| d.id.clone()).collect())
    }
    async fn query(
        &self,
        _vector: &[f32],
        _limit: usize,
        _filters: &BTreeMap<String, String>,
    ) -> Result<Vec<ScoredDocument>> {
        Ok(Vec::new())
    }
    async fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats::default())
    }
    async fn clear(&self) -> Result<u64> {
        Ok(0)
    }
    async fn delete(&self) -> Result<()> {
        Ok(())
    }
}

/// Returns vectors one element short.
struct ShortEmbedder;

#[async_trait]
impl Embedder for ShortEmbedder {
    fn model_name(&self) -> &str {
        "short"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.5; DIMS - 1]).collect())
    }
}

#[tokio::test]
async fn test_hundred_line_python_file() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "service/jobs.py", python_source(100).as_bytes());

    let store = Arc::new(InMemoryIndexStore::default());
    let report = pipeline(store.clone())
        .run(tmp.path(), 100, false)
        .await
        .unwrap();

    assert_eq!(report.files_indexed, 1);
    assert!(report.chunks_indexed >= 1);
    assert_eq!(report.batches_committed, 1);

    let docs = all_documents(store.as_ref()).await;
    assert_eq!(docs.len(), report.chunks_indexed);

    let n = docs.len() as i64;
    let mut indexes: Vec<i64> = docs.iter().map(|d| d.chunk_index).collect();
    indexes.sort();
    assert_eq!(indexes, (0..n).collect::<Vec<_>>());
    assert!(docs.iter().all(|d| d.total_chunks == n));
    assert!(docs.iter().all(|d| d.language == "python" && d.file_extension == ".py"));
    assert!(docs.iter().all(|d| d.file_name == "jobs.py"));
    assert!(docs
        .iter()
        .any(|d| d.content.contains("def ") && !d.function_name.is_empty()));
    assert!(docs.iter().any(|d| d.imports.contains("import os")));
}

#[tokio::test]
async fn test_reindex_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", python_source(60).as_bytes());
    write(tmp.path(), "pkg/b.rs", b"fn main() {\n    println!(\"hi\");\n}\n");

    let store = Arc::new(InMemoryIndexStore::default());
    let p = pipeline(store.clone());

    let first = p.run(tmp.path(), 1, false).await.unwrap();
    let after_first = store.len();
    let second = p.run(tmp.path(), 1, false).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.len(), after_first);
    assert_eq!(after_first, first.chunks_indexed);

    let forced = p.run(tmp.path(), 1, true).await.unwrap();
    assert_eq!(forced.documents_cleared, after_first as u64);
    assert_eq!(forced.chunks_indexed, first.chunks_indexed);
    assert_eq!(store.len(), after_first);
}

#[tokio::test]
async fn test_forced_run_with_invalid_root_keeps_index() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", b"def a():\n    return 1\n");

    let store = Arc::new(InMemoryIndexStore::default());
    let p = pipeline(store.clone());
    p.run(tmp.path(), 10, false).await.unwrap();
    assert_eq!(store.len(), 1);

    let err = p
        .run(&tmp.path().join("missing"), 10, true)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::InvalidRoot { .. }));
    assert_eq!(err.committed().documents_cleared, 0);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_forced_run_drops_chunks_of_deleted_files() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", b"def a():\n    return 1\n");
    write(tmp.path(), "b.py", b"def b():\n    return 2\n");

    let store = Arc::new(InMemoryIndexStore::default());
    let p = pipeline(store.clone());
    p.run(tmp.path(), 10, false).await.unwrap();
    assert_eq!(store.len(), 2);

    fs::remove_file(tmp.path().join("b.py")).unwrap();
    let report = p.run(tmp.path(), 10, true).await.unwrap();
    assert_eq!(report.documents_cleared, 2);
    let docs = all_documents(store.as_ref()).await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].file_path, "a.py");
}

#[tokio::test]
async fn test_changed_file_overwrites_in_place() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", b"def a():\n    return 1\n");

    let store = Arc::new(InMemoryIndexStore::default());
    let p = pipeline(store.clone());
    p.run(tmp.path(), 10, false).await.unwrap();

    write(tmp.path(), "a.py", b"def a():\n    return 2\n");
    p.run(tmp.path(), 10, false).await.unwrap();

    let docs = all_documents(store.as_ref()).await;
    assert_eq!(docs.len(), 1);
    assert!(docs[0].content.contains("return 2"));
}

#[tokio::test]
async fn test_second_batch_failure_reports_first_batch_only() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", python_source(30).as_bytes());
    write(tmp.path(), "b.py", python_source(30).as_bytes());
    write(tmp.path(), "c.py", python_source(30).as_bytes());

    let store = Arc::new(FlakyStore {
        inner: InMemoryIndexStore::default(),
        calls: AtomicUsize::new(0),
        fail_on: 2,
    });
    let err = pipeline(store.clone())
        .run(tmp.path(), 1, false)
        .await
        .unwrap_err();

    let committed_chunks = store.inner.len();
    match err {
        IndexError::BatchFailed {
            batch,
            committed,
            reason,
        } => {
            assert_eq!(batch, 1);
            assert_eq!(committed.files_indexed, 1);
            assert_eq!(committed.batches_committed, 1);
            assert_eq!(committed.chunks_indexed, committed_chunks);
            assert!(matches!(reason, BatchFailure::Store(ref m) if m.contains("index unavailable")));
        }
        other => panic!("unexpected error: {other}"),
    }

    // Nothing after the failed batch was attempted
    assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    let docs = all_documents(&store.inner).await;
    assert!(docs.iter().all(|d| d.file_path == "a.py"));
}

#[tokio::test]
async fn test_undecodable_file_is_skipped() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "good.py", b"def ok():\n    return True\n");
    write(tmp.path(), "latin1.py", b"name = '\xe9t\xe9'\n");
    write(tmp.path(), "blank.py", b"   \n\n  \n");

    let store = Arc::new(InMemoryIndexStore::default());
    let report = pipeline(store.clone())
        .run(tmp.path(), 10, false)
        .await
        .unwrap();

    assert_eq!(report.files_indexed, 1);
    assert_eq!(report.files_skipped, 1);
    assert_eq!(report.chunks_indexed, 1);
}

#[tokio::test]
async fn test_deadline_cancels_slow_upsert() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", b"def a():\n    return 1\n");

    let deadline = tokio::time::Instant::now() + Duration::from_millis(100);
    let err = pipeline(Arc::new(SlowStore))
        .run_until(tmp.path(), 10, false, Some(deadline))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IndexError::BatchFailed {
            batch: 0,
            reason: BatchFailure::TimedOut(_),
            ..
        }
    ));
    assert_eq!(err.committed().chunks_indexed, 0);
}

#[tokio::test]
async fn test_wrong_vector_length_fails_batch() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", b"def a():\n    return 1\n");

    let store = Arc::new(InMemoryIndexStore::default());
    let err = pipeline_with(store.clone(), Arc::new(ShortEmbedder))
        .run(tmp.path(), 10, false)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IndexError::BatchFailed {
            reason: BatchFailure::Embedding(_),
            ..
        }
    ));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_empty_tree_indexes_nothing() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "notes.md", b"# nothing to index\n");

    let store = Arc::new(InMemoryIndexStore::default());
    let report = pipeline(store.clone())
        .run(tmp.path(), 10, false)
        .await
        .unwrap();
    assert_eq!(report.files_indexed, 0);
    assert_eq!(report.batches_committed, 0);
    assert!(store.is_empty());
}
