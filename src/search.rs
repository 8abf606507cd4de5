//! Similarity search over the chunk index.
//!
//! Embeds the query text with the configured [`Embedder`] and asks the
//! [`IndexStore`] for the nearest chunk documents, optionally restricted by
//! language or file extension.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use tracing::info;

use crate::embedding::{embed_query, Embedder};
use crate::index_store::{IndexStore, ScoredDocument};

/// Characters of chunk content shown per result.
const PREVIEW_CHARS: usize = 200;

/// Equality filters for the common CLI options. Extensions are accepted
/// with or without the leading dot.
pub fn build_filters(language: Option<&str>, extension: Option<&str>) -> BTreeMap<String, String> {
    let mut filters = BTreeMap::new();
    if let Some(language) = language {
        filters.insert("language".to_string(), language.to_lowercase());
    }
    if let Some(ext) = extension {
        let ext = if ext.starts_with('.') {
            ext.to_string()
        } else {
            format!(".{}", ext)
        };
        filters.insert("file_extension".to_string(), ext);
    }
    filters
}

pub async fn search_index(
    store: &dyn IndexStore,
    embedder: &dyn Embedder,
    query: &str,
    limit: usize,
    filters: &BTreeMap<String, String>,
) -> Result<Vec<ScoredDocument>> {
    if query.trim().is_empty() {
        bail!("Search query must not be empty");
    }
    if limit == 0 {
        return Ok(Vec::new());
    }

    let vector = embed_query(embedder, query).await?;
    let results = store.query(&vector, limit, filters).await?;
    info!(query, results = results.len(), "Vector search complete");
    Ok(results)
}

/// `1 - distance` as a percentage, floored at zero.
pub fn similarity_percent(distance: f32) -> f32 {
    (1.0 - distance).max(0.0) * 100.0
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

pub fn print_results(results: &[ScoredDocument]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    println!("Found {} results:", results.len());
    println!();
    for (i, hit) in results.iter().enumerate() {
        let doc = &hit.document;
        println!(
            "{}. {} (chunk {}/{})",
            i + 1,
            doc.file_path,
            doc.chunk_index + 1,
            doc.total_chunks
        );
        println!("   Language:   {}", doc.language);
        println!("   Similarity: {:.1}%", similarity_percent(hit.distance));
        if !doc.function_name.is_empty() {
            println!("   Function:   {}", doc.function_name);
        }
        if !doc.class_name.is_empty() {
            println!("   Class:      {}", doc.class_name);
        }
        println!("   Preview:    {}", preview(&doc.content));
        println!();
    }
}
