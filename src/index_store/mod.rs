//! Vector index abstraction.
//!
//! The [`IndexStore`] trait is the boundary to whatever holds chunk
//! documents and answers similarity queries. Two backends ship with the
//! crate:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteIndexStore`] | Persistent store sharing the CLI's SQLite database |
//! | [`InMemoryIndexStore`] | Tests and ephemeral runs |
//!
//! Documents are keyed by chunk identity, so upserting the same chunk twice
//! overwrites in place. A document at an existing `(file_path, chunk_index)`
//! slot with a different identity replaces the old one.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryIndexStore;
pub use sqlite::SqliteIndexStore;

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::models::ChunkDocument;

/// Document fields accepted as equality filters by [`IndexStore::query`].
pub const FILTER_FIELDS: [&str; 6] = [
    "language",
    "file_extension",
    "file_name",
    "file_path",
    "function_name",
    "class_name",
];

/// A query hit. `distance` is `1 - cosine_similarity`, lower is closer.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredDocument {
    pub document: ChunkDocument,
    pub distance: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub index_name: String,
    pub doc_count: u64,
    pub file_count: u64,
    /// Approximate size of stored text, in megabytes.
    pub size_mb: f64,
    /// Approximate size of stored vectors, in megabytes.
    pub vector_size_mb: f64,
}

#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Insert or overwrite documents, returning their ids in input order.
    ///
    /// A single call is atomic: either every document lands or none do.
    async fn upsert(&self, documents: &[ChunkDocument]) -> Result<Vec<String>>;

    /// Nearest documents to `vector`, closest first, restricted to documents
    /// whose fields equal every entry of `filters`.
    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<ScoredDocument>>;

    async fn stats(&self) -> Result<IndexStats>;

    /// Remove every document, returning how many were removed.
    async fn clear(&self) -> Result<u64>;

    /// Drop the index entirely.
    async fn delete(&self) -> Result<()>;
}

/// Reject filters on fields the stores do not index.
pub fn validate_filters(filters: &BTreeMap<String, String>) -> Result<()> {
    for field in filters.keys() {
        if !FILTER_FIELDS.contains(&field.as_str()) {
            bail!(
                "Unsupported filter field '{}'. Allowed: {}",
                field,
                FILTER_FIELDS.join(", ")
            );
        }
    }
    Ok(())
}

/// Read a filterable field off a document.
pub(crate) fn field_value<'a>(doc: &'a ChunkDocument, field: &str) -> Option<&'a str> {
    match field {
        "language" => Some(&doc.language),
        "file_extension" => Some(&doc.file_extension),
        "file_name" => Some(&doc.file_name),
        "file_path" => Some(&doc.file_path),
        "function_name" => Some(&doc.function_name),
        "class_name" => Some(&doc.class_name),
        _ => None,
    }
}

pub(crate) fn matches_filters(doc: &ChunkDocument, filters: &BTreeMap<String, String>) -> bool {
    filters
        .iter()
        .all(|(field, value)| field_value(doc, field) == Some(value.as_str()))
}

/// Bytes to megabytes, rounded to two decimals.
pub(crate) fn to_mb(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}
