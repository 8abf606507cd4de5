//! SQLite-backed [`IndexStore`].
//!
//! Rows live in `chunk_documents`, scoped by index name so several indexes
//! can share one database file. Vectors are little-endian f32 BLOBs and
//! queries score every candidate row with cosine similarity in process.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{to_mb, validate_filters, IndexStats, IndexStore, ScoredDocument};
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::ChunkDocument;

pub struct SqliteIndexStore {
    pool: SqlitePool,
    name: String,
}

impl SqliteIndexStore {
    /// Expects a pool on which `run_migrations` has already run.
    pub fn new(pool: SqlitePool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn row_to_document(row: &SqliteRow) -> ChunkDocument {
    let blob: Vec<u8> = row.get("vector");
    ChunkDocument {
        id: row.get("id"),
        file_path: row.get("file_path"),
        file_name: row.get("file_name"),
        file_extension: row.get("file_extension"),
        language: row.get("language"),
        chunk_index: row.get("chunk_index"),
        total_chunks: row.get("total_chunks"),
        content: row.get("content"),
        function_name: row.get("function_name"),
        class_name: row.get("class_name"),
        imports: row.get("imports"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        vector: blob_to_vec(&blob),
    }
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    async fn upsert(&self, documents: &[ChunkDocument]) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(documents.len());

        for doc in documents {
            // A changed chunk gets a new identity; evict whatever held its slot.
            sqlx::query(
                "DELETE FROM chunk_documents
                 WHERE index_name = ? AND file_path = ? AND chunk_index = ? AND id != ?",
            )
            .bind(&self.name)
            .bind(&doc.file_path)
            .bind(doc.chunk_index)
            .bind(&doc.id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO chunk_documents (
                    id, index_name, file_path, file_name, file_extension, language,
                    chunk_index, total_chunks, content, function_name, class_name,
                    imports, created_at, updated_at, dims, vector
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(index_name, id) DO UPDATE SET
                    file_name = excluded.file_name,
                    file_extension = excluded.file_extension,
                    language = excluded.language,
                    total_chunks = excluded.total_chunks,
                    content = excluded.content,
                    function_name = excluded.function_name,
                    class_name = excluded.class_name,
                    imports = excluded.imports,
                    updated_at = excluded.updated_at,
                    dims = excluded.dims,
                    vector = excluded.vector
                "#,
            )
            .bind(&doc.id)
            .bind(&self.name)
            .bind(&doc.file_path)
            .bind(&doc.file_name)
            .bind(&doc.file_extension)
            .bind(&doc.language)
            .bind(doc.chunk_index)
            .bind(doc.total_chunks)
            .bind(&doc.content)
            .bind(&doc.function_name)
            .bind(&doc.class_name)
            .bind(&doc.imports)
            .bind(doc.created_at)
            .bind(doc.updated_at)
            .bind(doc.vector.len() as i64)
            .bind(vec_to_blob(&doc.vector))
            .execute(&mut *tx)
            .await?;

            ids.push(doc.id.clone());
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<ScoredDocument>> {
        validate_filters(filters)?;

        // Column names come from the validated allow-list.
        let mut sql = String::from("SELECT * FROM chunk_documents WHERE index_name = ?");
        for field in filters.keys() {
            sql.push_str(&format!(" AND {} = ?", field));
        }

        let mut query = sqlx::query(&sql).bind(&self.name);
        for value in filters.values() {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut hits: Vec<ScoredDocument> = rows
            .iter()
            .map(|row| {
                let document = row_to_document(row);
                ScoredDocument {
                    distance: 1.0 - cosine_similarity(vector, &document.vector),
                    document,
                }
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
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS docs,
                   COUNT(DISTINCT file_path) AS files,
                   COALESCE(SUM(LENGTH(CAST(content AS BLOB))), 0) AS text_bytes,
                   COALESCE(SUM(LENGTH(vector)), 0) AS vector_bytes
            FROM chunk_documents WHERE index_name = ?
            "#,
        )
        .bind(&self.name)
        .fetch_one(&self.pool)
        .await?;

        let docs: i64 = row.get("docs");
        let files: i64 = row.get("files");
        let text_bytes: i64 = row.get("text_bytes");
        let vector_bytes: i64 = row.get("vector_bytes");

        Ok(IndexStats {
            index_name: self.name.clone(),
            doc_count: docs as u64,
            file_count: files as u64,
            size_mb: to_mb(text_bytes as u64),
            vector_size_mb: to_mb(vector_bytes as u64),
        })
    }

    async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunk_documents WHERE index_name = ?")
            .bind(&self.name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self) -> Result<()> {
        let removed = self.clear().await?;
        tracing::info!(index = %self.name, removed, "Deleted index");
        Ok(())
    }
}
