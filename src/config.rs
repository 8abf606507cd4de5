//! TOML configuration.
//!
//! Every section has defaults, so an empty file is a valid configuration.
//! Components take the section they need in their constructor; nothing
//! reads configuration from global state.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/prctx.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in bytes.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_chunk_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Logical index name; documents of different indexes share one table.
    #[serde(default = "default_index_name")]
    pub name: String,
    #[serde(default = "default_index_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// Upper bound on files being read and chunked at once.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_upsert_timeout_secs")]
    pub upsert_timeout_secs: u64,
    /// Require the root to be a Git work tree.
    #[serde(default = "default_require_git")]
    pub require_git: bool,
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,
    #[serde(default = "default_included_extensions")]
    pub included_extensions: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: default_index_name(),
            batch_size: default_index_batch_size(),
            max_file_size_mb: default_max_file_size_mb(),
            workers: default_workers(),
            upsert_timeout_secs: default_upsert_timeout_secs(),
            require_git: default_require_git(),
            excluded_dirs: default_excluded_dirs(),
            included_extensions: default_included_extensions(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

impl IndexConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn upsert_timeout(&self) -> Duration {
        Duration::from_secs(self.upsert_timeout_secs)
    }
}

fn default_index_name() -> String {
    "pr_agent_codebase".to_string()
}
fn default_index_batch_size() -> usize {
    100
}
fn default_max_file_size_mb() -> u64 {
    10
}
fn default_workers() -> usize {
    8
}
fn default_upsert_timeout_secs() -> u64 {
    60
}
fn default_require_git() -> bool {
    true
}
fn default_excluded_dirs() -> Vec<String> {
    [
        ".git",
        "node_modules",
        "__pycache__",
        ".pytest_cache",
        "build",
        "dist",
        "target",
        ".venv",
        "venv",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_included_extensions() -> Vec<String> {
    [
        ".py", ".js", ".ts", ".java", ".cpp", ".c", ".h", ".hpp", ".cs", ".go", ".rs", ".rb",
        ".php", ".swift", ".kt", ".scala",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_embedding_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_embedding_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Storage lifetime of a cached record.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Maximum age at which a present record is still authoritative.
    #[serde(default = "default_force_refresh_threshold_secs")]
    pub force_refresh_threshold_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            default_ttl_secs: default_ttl_secs(),
            force_refresh_threshold_secs: default_force_refresh_threshold_secs(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn freshness_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.force_refresh_threshold_secs as i64)
    }
}

fn default_key_prefix() -> String {
    "pr_agent:state".to_string()
}
fn default_ttl_secs() -> u64 {
    3600
}
fn default_force_refresh_threshold_secs() -> u64 {
    7200
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Parse configuration from TOML text and validate it.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }

    if config.index.batch_size == 0 {
        bail!("index.batch_size must be > 0");
    }
    if config.index.workers == 0 {
        bail!("index.workers must be > 0");
    }
    if config.index.upsert_timeout_secs == 0 {
        bail!("index.upsert_timeout_secs must be > 0");
    }
    if config.index.name.trim().is_empty() {
        bail!("index.name must not be empty");
    }

    if config.cache.default_ttl_secs == 0 {
        bail!("cache.default_ttl_secs must be > 0");
    }
    if config.cache.key_prefix.is_empty() {
        bail!("cache.key_prefix must not be empty");
    }

    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "hash" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                bail!("embedding.model must be specified when provider is 'openai'");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, or openai.",
            other
        ),
    }

    match config.logging.level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => bail!("Unknown logging.level: '{}'", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.chunking.chunk_size, 512);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.index.batch_size, 100);
        assert_eq!(config.index.max_file_size_bytes(), 10 * 1024 * 1024);
        assert_eq!(config.cache.default_ttl_secs, 3600);
        assert_eq!(config.cache.force_refresh_threshold_secs, 7200);
        assert_eq!(config.cache.key_prefix, "pr_agent:state");
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.embedding.dims, 384);
        assert!(config.index.excluded_dirs.contains(&"node_modules".to_string()));
        assert!(config.index.included_extensions.contains(&".rs".to_string()));
    }

    #[test]
    fn test_overrides() {
        let config = parse_config(
            r#"
[chunking]
chunk_size = 1024
chunk_overlap = 0

[index]
batch_size = 10
require_git = false
included_extensions = [".py"]

[cache]
default_ttl_secs = 60
"#,
        )
        .unwrap();
        assert_eq!(config.chunking.chunk_size, 1024);
        assert_eq!(config.chunking.chunk_overlap, 0);
        assert_eq!(config.index.batch_size, 10);
        assert!(!config.index.require_git);
        assert_eq!(config.index.included_extensions, vec![".py".to_string()]);
        assert_eq!(config.cache.default_ttl(), Duration::from_secs(60));
        assert_eq!(config.cache.force_refresh_threshold_secs, 7200);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(parse_config("[chunking]\nchunk_size = 0").is_err());
        assert!(parse_config("[index]\nbatch_size = 0").is_err());
        assert!(parse_config("[cache]\ndefault_ttl_secs = 0").is_err());
        assert!(parse_config("[embedding]\nprovider = \"magic\"").is_err());
        assert!(parse_config("[embedding]\nprovider = \"openai\"").is_err());
        assert!(parse_config("[logging]\nlevel = \"loud\"").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
