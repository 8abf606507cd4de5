use anyhow::Result;
use sqlx::SqlitePool;

/// Create all tables and indexes. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Index documents, one row per chunk
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_documents (
            id TEXT NOT NULL,
            index_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_extension TEXT NOT NULL,
            language TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            total_chunks INTEGER NOT NULL,
            content TEXT NOT NULL,
            function_name TEXT NOT NULL DEFAULT '',
            class_name TEXT NOT NULL DEFAULT '',
            imports TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            dims INTEGER NOT NULL,
            vector BLOB NOT NULL,
            PRIMARY KEY (index_name, id),
            UNIQUE(index_name, file_path, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Fingerprint cache entries with absolute expiry
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS state_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_documents_index ON chunk_documents(index_name)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_documents_language ON chunk_documents(index_name, language)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_state_entries_expires ON state_entries(expires_at)")
        .execute(pool)
        .await?;

    Ok(())
}
