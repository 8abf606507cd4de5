//! Index and cache statistics.
//!
//! Prints what is indexed (documents, files, per-language breakdown, last
//! update) and what the analysis cache holds. Used by `prctx stats` and
//! `prctx cache stats`.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::index_store::{IndexStats, IndexStore, SqliteIndexStore};
use crate::state::StateStats;

/// Per-language breakdown of one index.
struct LanguageStats {
    language: String,
    doc_count: i64,
    file_count: i64,
}

/// Print index statistics for `config.index.name`.
pub async fn print_index_stats(config: &Config, pool: &SqlitePool) -> Result<()> {
    let store = SqliteIndexStore::new(pool.clone(), config.index.name.clone());
    let stats = store.stats().await?;

    let rows = sqlx::query(
        r#"
        SELECT language,
               COUNT(*) AS doc_count,
               COUNT(DISTINCT file_path) AS file_count
        FROM chunk_documents
        WHERE index_name = ?
        GROUP BY language
        ORDER BY doc_count DESC, language
        "#,
    )
    .bind(&config.index.name)
    .fetch_all(pool)
    .await?;

    let languages: Vec<LanguageStats> = rows
        .iter()
        .map(|row| LanguageStats {
            language: row.get("language"),
            doc_count: row.get("doc_count"),
            file_count: row.get("file_count"),
        })
        .collect();

    let last_updated: Option<i64> =
        sqlx::query_scalar("SELECT MAX(updated_at) FROM chunk_documents WHERE index_name = ?")
            .bind(&config.index.name)
            .fetch_one(pool)
            .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    print_index_summary(&stats, db_size, &config.db.path.display().to_string());
    println!(
        "  Updated:     {}",
        match last_updated {
            Some(ms) => format_ts_relative(ms / 1000),
            None => "never".to_string(),
        }
    );

    if !languages.is_empty() {
        println!();
        println!("  By language:");
        println!("  {:<16} {:>8} {:>8}", "LANGUAGE", "CHUNKS", "FILES");
        println!("  {}", "-".repeat(34));
        for l in &languages {
            println!("  {:<16} {:>8} {:>8}", l.language, l.doc_count, l.file_count);
        }
    }
    println!();
    Ok(())
}

fn print_index_summary(stats: &IndexStats, db_size: u64, db_path: &str) {
    println!("Index Stats: {}", stats.index_name);
    println!("{}", "=".repeat(13 + stats.index_name.len()));
    println!();
    println!("  Database:    {}", db_path);
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Chunks:      {}", stats.doc_count);
    println!("  Files:       {}", stats.file_count);
    println!("  Text:        {:.2} MB", stats.size_mb);
    println!("  Vectors:     {:.2} MB", stats.vector_size_mb);
}

pub fn print_cache_stats(stats: &StateStats) {
    println!("Cache Stats");
    println!("===========");
    println!();
    println!("  Live entries:  {}", stats.total_entries);
    for (kind, count) in &stats.per_kind {
        println!("    {:<14} {}", kind, count);
    }
    println!("  Expired:       {}", stats.expired);
    println!();
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        format_ts_iso(ts)
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        plural(delta / 60, "min")
    } else if delta < 86400 {
        plural(delta / 3600, "hour")
    } else if delta < 86400 * 30 {
        plural(delta / 86400, "day")
    } else {
        format_ts_iso(ts)
    }
}

fn plural(n: i64, unit: &str) -> String {
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
