//! Core data models used throughout the crate.
//!
//! These types represent the chunks and index documents that flow through
//! the indexing pipeline, and the fingerprint records kept by the state
//! store for change detection.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::chunk_identity;

/// Programming language inferred from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Java,
    Cpp,
    C,
    CSharp,
    Go,
    Rust,
    Ruby,
    Php,
    Swift,
    Kotlin,
    Scala,
    Unknown,
}

impl Language {
    /// Map a file extension (with or without the leading dot) to a language.
    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "py" => Language::Python,
            "js" => Language::JavaScript,
            "ts" => Language::TypeScript,
            "java" => Language::Java,
            "cpp" | "hpp" => Language::Cpp,
            "c" | "h" => Language::C,
            "cs" => Language::CSharp,
            "go" => Language::Go,
            "rs" => Language::Rust,
            "rb" => Language::Ruby,
            "php" => Language::Php,
            "swift" => Language::Swift,
            "kt" => Language::Kotlin,
            "scala" => Language::Scala,
            _ => Language::Unknown,
        }
    }

    pub fn from_path(path: &str) -> Self {
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(Language::from_extension)
            .unwrap_or(Language::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::C => "c",
            Language::CSharp => "csharp",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Swift => "swift",
            Language::Kotlin => "kotlin",
            Language::Scala => "scala",
            Language::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous, line-aligned slice of one file plus extracted metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    /// Path relative to the indexed root, `/`-separated.
    pub file_path: String,
    pub chunk_index: usize,
    /// Number of chunks emitted for the file. Set once all chunks exist.
    pub total_chunks: usize,
    /// First line covered by this chunk (0-based, inclusive).
    pub start_line: usize,
    /// Last line covered by this chunk (0-based, exclusive).
    pub end_line: usize,
    pub language: Language,
    pub function_name: Option<String>,
    pub class_name: Option<String>,
    /// Import lines joined with `"; "`.
    pub imports: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chunk {
    /// Deterministic identity used as the index document key.
    pub fn identity(&self) -> String {
        chunk_identity(&self.file_path, self.chunk_index, &self.content)
    }

    /// Convert into the document shape submitted to the index store.
    pub fn into_document(self, vector: Vec<f32>) -> ChunkDocument {
        let id = self.identity();
        let path = Path::new(&self.file_path);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let file_extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        ChunkDocument {
            id,
            file_path: self.file_path,
            file_name,
            file_extension,
            language: self.language.as_str().to_string(),
            chunk_index: self.chunk_index as i64,
            total_chunks: self.total_chunks as i64,
            content: self.content,
            function_name: self.function_name.unwrap_or_default(),
            class_name: self.class_name.unwrap_or_default(),
            imports: self.imports.unwrap_or_default(),
            created_at: self.created_at.timestamp_millis(),
            updated_at: self.updated_at.timestamp_millis(),
            vector,
        }
    }
}

/// The document shape stored in the index. Absent metadata is stored as
/// the empty string so it can be matched by equality filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDocument {
    pub id: String,
    pub file_path: String,
    pub file_name: String,
    pub file_extension: String,
    pub language: String,
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub content: String,
    pub function_name: String,
    pub class_name: String,
    pub imports: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip)]
    pub vector: Vec<f32>,
}

/// One structured finding inside an [`AnalysisResult`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    /// Analyzer-specific fields kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Finding {
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

pub const DEFAULT_ANALYZER_VERSION: &str = "0.1.0";

/// Outcome of an expensive analysis, cached alongside its fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<Finding>,
    #[serde(default)]
    pub recommendations: Vec<Finding>,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_analyzer_version")]
    pub analyzer_version: String,
}

fn default_analyzer_version() -> String {
    DEFAULT_ANALYZER_VERSION.to_string()
}

impl AnalysisResult {
    /// Build a result stamped now; `confidence` is clamped into `[0, 1]`.
    pub fn new(score: f64, confidence: f64) -> Self {
        Self {
            score,
            issues: Vec::new(),
            recommendations: Vec::new(),
            confidence: clamp_confidence(confidence),
            timestamp: Utc::now(),
            analyzer_version: default_analyzer_version(),
        }
    }

    pub fn with_issues(mut self, issues: Vec<Finding>) -> Self {
        self.issues = issues;
        self
    }

    pub fn with_recommendations(mut self, recommendations: Vec<Finding>) -> Self {
        self.recommendations = recommendations;
        self
    }
}

pub(crate) fn clamp_confidence(c: f64) -> f64 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

/// Kind of external artifact whose analysis is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Ticket,
    PullRequest,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Ticket, ArtifactKind::PullRequest];

    /// Namespace segment used in state keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Ticket => "ticket",
            ArtifactKind::PullRequest => "pull-request",
        }
    }

    /// Namespace segment used by schema v1 records (`jira` / `github`).
    pub fn legacy_segment(&self) -> &'static str {
        match self {
            ArtifactKind::Ticket => "jira",
            ArtifactKind::PullRequest => "github",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ticket" | "jira" => Some(ArtifactKind::Ticket),
            "pull-request" | "pr" | "github" => Some(ArtifactKind::PullRequest),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content fingerprint of one artifact version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Fingerprint {
    Ticket { content_hash: String },
    PullRequest { commit_sha: String, files_hash: String },
}

impl Fingerprint {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Fingerprint::Ticket { .. } => ArtifactKind::Ticket,
            Fingerprint::PullRequest { .. } => ArtifactKind::PullRequest,
        }
    }

    /// The content digest compared during change detection.
    pub fn content_hash(&self) -> &str {
        match self {
            Fingerprint::Ticket { content_hash } => content_hash,
            Fingerprint::PullRequest { files_hash, .. } => files_hash,
        }
    }
}

/// Last-analysis record for one ticket or pull request.
///
/// Keys are ticket ids (`PROJ-123`) or `owner/repo#number`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub key: String,
    pub fingerprint: Fingerprint,
    pub last_analyzed: DateTime<Utc>,
    #[serde(default)]
    pub result: Option<AnalysisResult>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl StateRecord {
    pub fn ticket(key: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self::new(
            key.into(),
            Fingerprint::Ticket {
                content_hash: content_hash.into(),
            },
        )
    }

    pub fn pull_request(
        key: impl Into<String>,
        commit_sha: impl Into<String>,
        files_hash: impl Into<String>,
    ) -> Self {
        Self::new(
            key.into(),
            Fingerprint::PullRequest {
                commit_sha: commit_sha.into(),
                files_hash: files_hash.into(),
            },
        )
    }

    fn new(key: String, fingerprint: Fingerprint) -> Self {
        Self {
            key,
            fingerprint,
            last_analyzed: Utc::now(),
            result: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_result(mut self, result: AnalysisResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn analyzed_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_analyzed = at;
        self
    }

    pub fn kind(&self) -> ArtifactKind {
        self.fingerprint.kind()
    }
}
