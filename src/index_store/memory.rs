//! In-memory [`IndexStore`] for tests and throwaway runs.
//!
//! Documents live in a `HashMap` behind `std::sync::RwLock`, alongside a
//! `(file_path, chunk_index)` slot map so an upsert only touches the slots
//! it writes. Queries are brute-force cosine similarity over every stored
//! vector.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use super::{matches_filters, to_mb, validate_filters, IndexStats, IndexStore, ScoredDocument};
use crate::embedding::cosine_similarity;
use crate::models::ChunkDocument;

pub struct InMemoryIndexStore {
    name: String,
    inner: RwLock<Documents>,
}

#[derive(Default)]
struct Documents {
    by_id: HashMap<String, ChunkDocument>,
    /// `(file_path, chunk_index)` → id of the document holding that slot.
    slots: HashMap<(String, i64), String>,
}

impl InMemoryIndexStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Documents::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|d| d.by_id.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryIndexStore {
    fn default() -> Self {
        Self::new("memory")
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("in-memory index lock poisoned")
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    async fn upsert(&self, documents: &[ChunkDocument]) -> Result<Vec<String>> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let Documents { by_id, slots } = &mut *inner;
        let mut ids = Vec::with_capacity(documents.len());
        for doc in documents {
            let slot = (doc.file_path.clone(), doc.chunk_index);
            if let Some(previous) = slots.insert(slot, doc.id.clone()) {
                if previous != doc.id {
                    by_id.remove(&previous);
                }
            }
            by_id.insert(doc.id.clone(), doc.clone());
            ids.push(doc.id.clone());
        }
        Ok(ids)
    }

    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<ScoredDocument>> {
        validate_filters(filters)?;
        let inner = self.inner.read().map_err(poisoned)?;

        let mut hits: Vec<ScoredDocument> = inner
            .by_id
            .values()
            .filter(|d| matches_filters(d, filters))
            .map(|d| ScoredDocument {
                distance: 1.0 - cosine_similarity(vector, &d.vector),
                document: d.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn stats(&self) -> Result<IndexStats> {
        let inner = self.inner.read().map_err(poisoned)?;
        let docs = &inner.by_id;
        let files: HashSet<&str> = docs.values().map(|d| d.file_path.as_str()).collect();
        let text_bytes: u64 = docs.values().map(|d| d.content.len() as u64).sum();
        let vector_bytes: u64 = docs.values().map(|d| d.vector.len() as u64 * 4).sum();

        Ok(IndexStats {
            index_name: self.name.clone(),
            doc_count: docs.len() as u64,
            file_count: files.len() as u64,
            size_mb: to_mb(text_bytes),
            vector_size_mb: to_mb(vector_bytes),
        })
    }

    async fn clear(&self) -> Result<u64> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let removed = inner.by_id.len() as u64;
        inner.by_id.clear();
        inner.slots.clear();
        Ok(removed)
    }

    async fn delete(&self) -> Result<()> {
        self.clear().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(path: &str, index: i64, content: &str, vector: Vec<f32>) -> ChunkDocument {
        ChunkDocument {
            id: crate::hash::chunk_identity(path, index as usize, content),
            file_path: path.to_string(),
            file_name: path.rsplit('/').next().unwrap_or(path).to_string(),
            file_extension: ".py".to_string(),
            language: "python".to_string(),
            chunk_index: index,
            total_chunks: 1,
            content: content.to_string(),
            function_name: String::new(),
            class_name: String::new(),
            imports: String::new(),
            created_at: 0,
            updated_at: 0,
            vector,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = InMemoryIndexStore::default();
        let docs = vec![doc("a.py", 0, "x = 1", vec![1.0, 0.0])];
        store.upsert(&docs).await.unwrap();
        store.upsert(&docs).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_changed_slot() {
        let store = InMemoryIndexStore::default();
        store
            .upsert(&[doc("a.py", 0, "x = 1", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert(&[doc("a.py", 0, "x = 2", vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.doc_count, 1);
        assert_eq!(stats.file_count, 1);
    }

    #[tokio::test]
    async fn test_batch_upsert_keeps_one_document_per_slot() {
        let store = InMemoryIndexStore::default();
        let first: Vec<_> = (0..50)
            .map(|i| doc("big.py", i, &format!("v1 {}", i), vec![1.0, 0.0]))
            .collect();
        store.upsert(&first).await.unwrap();

        // Half the slots change content, the other half are resubmitted as is.
        let second: Vec<_> = (0..50)
            .map(|i| {
                let version = if i % 2 == 0 { "v2" } else { "v1" };
                doc("big.py", i, &format!("{} {}", version, i), vec![1.0, 0.0])
            })
            .collect();
        store.upsert(&second).await.unwrap();
        assert_eq!(store.len(), 50);

        let hits = store.query(&[1.0, 0.0], 100, &BTreeMap::new()).await.unwrap();
        let mut slots: Vec<i64> = hits.iter().map(|h| h.document.chunk_index).collect();
        slots.sort();
        assert_eq!(slots, (0..50).collect::<Vec<_>>());
        for hit in &hits {
            let version = if hit.document.chunk_index % 2 == 0 { "v2" } else { "v1" };
            assert!(hit.document.content.starts_with(version));
        }

        assert_eq!(store.clear().await.unwrap(), 50);
        store.upsert(&first[..1]).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_query_ranks_and_filters() {
        let store = InMemoryIndexStore::default();
        let mut rust = doc("b.rs", 0, "fn b() {}", vec![0.9, 0.1]);
        rust.language = "rust".to_string();
        rust.file_extension = ".rs".to_string();
        store
            .upsert(&[
                doc("a.py", 0, "near", vec![1.0, 0.0]),
                doc("c.py", 0, "far", vec![0.0, 1.0]),
                rust,
            ])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0], 10, &BTreeMap::new()).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].document.file_path, "a.py");
        assert!(hits[0].distance < hits[1].distance);

        let mut filters = BTreeMap::new();
        filters.insert("language".to_string(), "python".to_string());
        let hits = store.query(&[1.0, 0.0], 1, &filters).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.file_path, "a.py");
    }

    #[tokio::test]
    async fn test_clear_returns_count() {
        let store = InMemoryIndexStore::default();
        store
            .upsert(&[
                doc("a.py", 0, "a", vec![1.0]),
                doc("a.py", 1, "b", vec![1.0]),
            ])
            .await
            .unwrap();
        assert_eq!(store.clear().await.unwrap(), 2);
        assert!(store.is_empty());
    }
}
