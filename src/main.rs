//! # pr-context CLI (`prctx`)
//!
//! Indexes a repository into a searchable chunk index and answers "does
//! this ticket / pull request need reanalysis?" from the fingerprint cache.
//!
//! ## Usage
//!
//! ```bash
//! prctx --config ./config/prctx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `prctx init` | Create the SQLite database and run schema migrations |
//! | `prctx index` | Chunk, embed and upsert every candidate file under a root |
//! | `prctx search "<query>"` | Similarity search over indexed chunks |
//! | `prctx stats` | Index statistics |
//! | `prctx clear` | Remove every document from the index |
//! | `prctx cache stats` | Analysis cache statistics |
//! | `prctx cache invalidate <kind> <key>` | Drop one cached analysis |
//! | `prctx cache cleanup` | Count expired, not yet purged cache entries |
//! | `prctx check ticket <key>` | Decide whether a ticket needs reanalysis |
//! | `prctx check pr <key>` | Decide whether a pull request needs reanalysis |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;

use pr_context::change::{ChangeDetector, Decision};
use pr_context::config::{self, Config};
use pr_context::embedding::{create_embedder, Embedder};
use pr_context::index_store::{IndexStore, SqliteIndexStore};
use pr_context::models::ArtifactKind;
use pr_context::pipeline::IndexingPipeline;
use pr_context::state::{SqliteStateBackend, StateStore};
use pr_context::{db, logging, migrate, repo, search, stats};

/// Codebase chunk indexing and change detection for pull request
/// verification.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/prctx.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "prctx", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/prctx.toml")]
    config: PathBuf,

    /// Include targets and source locations in log lines.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Index a repository.
    ///
    /// Re-indexing overwrites unchanged chunks in place.
    Index {
        /// Repository root to index.
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Files per upsert batch. Defaults to `index.batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Clear the index before indexing (after the root is validated).
        #[arg(long)]
        force: bool,
    },

    /// Search indexed chunks.
    Search {
        query: String,

        /// Filter by language tag (e.g. `python`, `rust`).
        #[arg(long)]
        language: Option<String>,

        /// Filter by file extension (`py` or `.py`).
        #[arg(long)]
        extension: Option<String>,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Show index statistics.
    Stats,

    /// Remove every document from the configured index.
    Clear,

    /// Inspect or edit the analysis cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Decide whether an artifact needs reanalysis.
    Check {
        #[command(subcommand)]
        target: CheckTarget,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry counts per kind.
    Stats,
    /// Drop the cached analysis for one artifact.
    Invalidate {
        /// `ticket` or `pr`.
        kind: String,
        key: String,
    },
    /// Count entries past their expiry that are still stored.
    Cleanup,
}

#[derive(Subcommand)]
enum CheckTarget {
    /// Check a ticket's definition of done.
    Ticket {
        /// Ticket key, e.g. `PROJ-123`.
        key: String,

        /// File holding the definition-of-done text.
        #[arg(long)]
        dod_file: PathBuf,

        /// Requirement line; repeatable, order does not matter.
        #[arg(long = "requirement")]
        requirements: Vec<String>,

        /// Treat as stale without consulting the cache.
        #[arg(long)]
        force: bool,

        /// Cache the current fingerprint after checking.
        #[arg(long)]
        record: bool,
    },
    /// Check a pull request's head commit and changed files.
    Pr {
        /// Pull request key, e.g. `owner/repo#42`.
        key: String,

        /// Head commit SHA.
        #[arg(long)]
        sha: String,

        /// Changed file name; repeatable, order does not matter.
        #[arg(long = "file")]
        files: Vec<String>,

        #[arg(long)]
        force: bool,

        #[arg(long)]
        record: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Init => {
            let pool = open_db(&cfg).await?;
            println!("Database initialized successfully.");
            pool.close().await;
        }
        Commands::Index {
            root,
            batch_size,
            force,
        } => {
            let pool = open_db(&cfg).await?;
            run_index(&cfg, &pool, &root, batch_size, force).await?;
            pool.close().await;
        }
        Commands::Search {
            query,
            language,
            extension,
            limit,
        } => {
            let pool = open_db(&cfg).await?;
            let store = SqliteIndexStore::new(pool.clone(), cfg.index.name.clone());
            let embedder = require_embedder(&cfg)?;
            let filters = search::build_filters(language.as_deref(), extension.as_deref());
            let results =
                search::search_index(&store, embedder.as_ref(), &query, limit, &filters).await?;
            search::print_results(&results);
            pool.close().await;
        }
        Commands::Stats => {
            let pool = open_db(&cfg).await?;
            stats::print_index_stats(&cfg, &pool).await?;
            pool.close().await;
        }
        Commands::Clear => {
            let pool = open_db(&cfg).await?;
            let store = SqliteIndexStore::new(pool.clone(), cfg.index.name.clone());
            let removed = store.clear().await?;
            println!("Cleared {} documents from index '{}'.", removed, cfg.index.name);
            pool.close().await;
        }
        Commands::Cache { action } => {
            let pool = open_db(&cfg).await?;
            let store = state_store(&cfg, &pool);
            match action {
                CacheAction::Stats => stats::print_cache_stats(&store.stats().await?),
                CacheAction::Invalidate { kind, key } => {
                    let kind = parse_kind(&kind)?;
                    if store.invalidate(kind, &key).await {
                        println!("Invalidated {} {}.", kind, key);
                    } else {
                        println!("No cached analysis for {} {}.", kind, key);
                    }
                }
                CacheAction::Cleanup => {
                    println!("Expired entries: {}", store.count_expired().await);
                }
            }
            pool.close().await;
        }
        Commands::Check { target } => {
            let pool = open_db(&cfg).await?;
            let detector = ChangeDetector::new(Arc::new(state_store(&cfg, &pool)), &cfg.cache);
            run_check(&detector, target).await?;
            pool.close().await;
        }
    }

    Ok(())
}

async fn open_db(cfg: &Config) -> Result<SqlitePool> {
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;
    Ok(pool)
}

fn state_store(cfg: &Config, pool: &SqlitePool) -> StateStore {
    StateStore::new(Arc::new(SqliteStateBackend::new(pool.clone())), &cfg.cache)
}

fn require_embedder(cfg: &Config) -> Result<Arc<dyn Embedder>> {
    if !cfg.embedding.is_enabled() {
        bail!("An embedding provider is required. Set [embedding] provider = \"hash\" or \"openai\".");
    }
    Ok(Arc::from(create_embedder(&cfg.embedding)?))
}

fn parse_kind(kind: &str) -> Result<ArtifactKind> {
    ArtifactKind::parse(kind)
        .with_context(|| format!("Unknown artifact kind '{}'. Use 'ticket' or 'pr'.", kind))
}

async fn run_index(
    cfg: &Config,
    pool: &SqlitePool,
    root: &std::path::Path,
    batch_size: Option<usize>,
    force: bool,
) -> Result<()> {
    let store = Arc::new(SqliteIndexStore::new(pool.clone(), cfg.index.name.clone()));
    let embedder = require_embedder(cfg)?;

    let pipeline = IndexingPipeline::new(
        cfg,
        store,
        embedder,
        repo::validator_for(cfg.index.require_git),
    );
    let batch_size = batch_size.unwrap_or(cfg.index.batch_size);

    match pipeline.run(root, batch_size, force).await {
        Ok(report) => {
            if force {
                println!(
                    "Cleared {} documents before reindexing.",
                    report.documents_cleared
                );
            }
            println!("index {}", root.display());
            println!("  files indexed:  {}", report.files_indexed);
            println!("  chunks indexed: {}", report.chunks_indexed);
            println!("  files skipped:  {}", report.files_skipped);
            println!("  batches:        {}", report.batches_committed);
            println!("ok");
            Ok(())
        }
        Err(e) => {
            let committed = e.committed();
            if committed.documents_cleared > 0 {
                println!(
                    "Cleared {} documents before reindexing.",
                    committed.documents_cleared
                );
            }
            println!("index {}", root.display());
            println!("  files indexed:  {}", committed.files_indexed);
            println!("  chunks indexed: {}", committed.chunks_indexed);
            Err(e.into())
        }
    }
}

async fn run_check(detector: &ChangeDetector, target: CheckTarget) -> Result<()> {
    match target {
        CheckTarget::Ticket {
            key,
            dod_file,
            requirements,
            force,
            record,
        } => {
            let dod_text = std::fs::read_to_string(&dod_file)
                .with_context(|| format!("Failed to read {}", dod_file.display()))?;
            let decision = detector
                .check_ticket(&key, &dod_text, &requirements, force)
                .await;
            print_decision(ArtifactKind::Ticket, &key, &decision);
            if record {
                report_recorded(
                    detector
                        .record_ticket_analysis(&key, &dod_text, &requirements, None)
                        .await,
                );
            }
        }
        CheckTarget::Pr {
            key,
            sha,
            files,
            force,
            record,
        } => {
            let decision = detector.check_pull_request(&key, &sha, &files, force).await;
            print_decision(ArtifactKind::PullRequest, &key, &decision);
            if record {
                report_recorded(detector.record_pr_analysis(&key, &sha, &files, None).await);
            }
        }
    }
    Ok(())
}

fn print_decision(kind: ArtifactKind, key: &str, decision: &Decision) {
    match decision {
        Decision::Fresh(record) => println!(
            "{} {}: up to date (analyzed {})",
            kind,
            key,
            record.last_analyzed.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        Decision::Stale(reason) => println!("{} {}: reanalyze ({})", kind, key, reason),
    }
}

fn report_recorded(ok: bool) {
    if ok {
        println!("recorded");
    } else {
        println!("warning: could not record fingerprint");
    }
}
