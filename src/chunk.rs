//! Line-window source chunker.
//!
//! Splits a file's text into overlapping [`Chunk`]s. Sizing is byte-oriented
//! but windows are line-aligned: the requested byte budget is converted into
//! a number of lines using the file's average line length.
//!
//! # Algorithm
//!
//! 1. Return nothing for empty or whitespace-only content.
//! 2. `avg = bytes / lines` (50 if the file somehow has no lines).
//! 3. `lines_per_chunk = max(1, round(chunk_size / avg))`,
//!    `overlap_lines = max(0, round(overlap / avg))`.
//! 4. Slide a window of `lines_per_chunk` lines, advancing by
//!    `max(1, lines_per_chunk - overlap_lines)`. Stop once a window reaches
//!    the last line.
//! 5. Drop whitespace-only windows without consuming an index.
//! 6. Back-fill `total_chunks` on every emitted chunk.
//!
//! Per-chunk metadata (function/class names, imports) comes from a
//! [`Tagger`]. The default [`HeuristicTagger`] scans lines independently and
//! never fails; a structural parser can be substituted without touching the
//! sizing logic.
//!
//! # Example
//!
//! ```rust
//! use pr_context::chunk::Chunker;
//!
//! let chunker = Chunker::new(512, 50);
//! let chunks = chunker.chunk("def main():\n    return 0\n", "app/main.py");
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].function_name.as_deref(), Some("main"));
//! ```

use chrono::Utc;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Language};

/// Average line length assumed when a file has no lines.
const DEFAULT_LINE_LENGTH: f64 = 50.0;

/// Metadata extracted from one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkTags {
    pub function_name: Option<String>,
    pub class_name: Option<String>,
    pub imports: Option<String>,
}

/// Best-effort metadata extraction for a chunk of source text.
///
/// Implementations must not panic on malformed input; absent matches yield
/// empty fields.
pub trait Tagger: Send + Sync {
    fn tag(&self, content: &str, language: Language) -> ChunkTags;
}

/// Line-by-line pattern matcher. Cheap, and knowingly incomplete.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTagger;

impl Tagger for HeuristicTagger {
    fn tag(&self, content: &str, language: Language) -> ChunkTags {
        ChunkTags {
            function_name: extract_function_name(content, language),
            class_name: extract_class_name(content, language),
            imports: extract_imports(content, language),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn extract_function_name(content: &str, language: Language) -> Option<String> {
    for line in content.lines().map(str::trim) {
        match language {
            Language::Python => {
                if let Some(rest) = line.strip_prefix("def ") {
                    return non_empty(rest.split('(').next().unwrap_or_default());
                }
            }
            Language::JavaScript | Language::TypeScript => {
                if let Some((_, rest)) = line.split_once("function ") {
                    return non_empty(rest.split('(').next().unwrap_or_default());
                }
            }
            _ => return None,
        }
    }
    None
}

fn extract_class_name(content: &str, language: Language) -> Option<String> {
    for line in content.lines().map(str::trim) {
        match language {
            Language::Python => {
                if let Some(rest) = line.strip_prefix("class ") {
                    let name = rest.split(['(', ':']).next().unwrap_or_default();
                    return non_empty(name);
                }
            }
            Language::Java | Language::CSharp | Language::Cpp => {
                if let Some((_, rest)) = line.split_once("class ") {
                    if let Some(token) = rest.split_whitespace().next() {
                        return non_empty(token);
                    }
                }
            }
            _ => return None,
        }
    }
    None
}

fn extract_imports(content: &str, language: Language) -> Option<String> {
    let imports: Vec<&str> = match language {
        Language::Python => content
            .lines()
            .map(str::trim)
            .filter(|l| l.starts_with("import ") || l.starts_with("from "))
            .collect(),
        Language::JavaScript
        | Language::TypeScript
        | Language::Java
        | Language::Kotlin
        | Language::Scala
        | Language::Swift
        | Language::Go => content
            .lines()
            .map(str::trim)
            .filter(|l| l.starts_with("import "))
            .collect(),
        _ => Vec::new(),
    };

    if imports.is_empty() {
        None
    } else {
        Some(imports.join("; "))
    }
}

/// Window sizes derived for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    pub lines_per_chunk: usize,
    pub overlap_lines: usize,
}

impl WindowPlan {
    /// Lines advanced between consecutive windows; always at least one.
    pub fn step(&self) -> usize {
        self.lines_per_chunk.saturating_sub(self.overlap_lines).max(1)
    }
}

/// Convert a byte budget into a line window for the given content.
pub fn plan_windows(content: &str, line_count: usize, chunk_size: usize, overlap: usize) -> WindowPlan {
    let avg = if line_count == 0 {
        DEFAULT_LINE_LENGTH
    } else {
        content.len() as f64 / line_count as f64
    };
    // Every line contributes at least its newline, so avg > 0 for non-empty content.
    let avg = if avg > 0.0 { avg } else { DEFAULT_LINE_LENGTH };

    let lines_per_chunk = ((chunk_size as f64 / avg).round() as usize).max(1);
    let overlap_lines = (overlap as f64 / avg).round() as usize;

    WindowPlan {
        lines_per_chunk,
        overlap_lines,
    }
}

/// Splits file contents into overlapping, metadata-tagged chunks.
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    tagger: Box<dyn Tagger>,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
            tagger: Box::new(HeuristicTagger),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Replace the metadata tagger.
    pub fn with_tagger(mut self, tagger: Box<dyn Tagger>) -> Self {
        self.tagger = tagger;
        self
    }

    pub fn chunk(&self, content: &str, file_path: &str) -> Vec<Chunk> {
        chunk_with(
            content,
            file_path,
            self.chunk_size,
            self.overlap,
            self.tagger.as_ref(),
        )
    }
}

/// Chunk `content` using the default [`HeuristicTagger`].
pub fn chunk_file(content: &str, file_path: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    chunk_with(content, file_path, chunk_size, overlap, &HeuristicTagger)
}

fn chunk_with(
    content: &str,
    file_path: &str,
    chunk_size: usize,
    overlap: usize,
    tagger: &dyn Tagger,
) -> Vec<Chunk> {
    if content.trim().is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = content.split('\n').collect();
    let plan = plan_windows(content, lines.len(), chunk_size, overlap);
    let step = plan.step();
    let language = Language::from_path(file_path);
    let now = Utc::now();

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut start = 0;

    while start < lines.len() {
        let end = (start + plan.lines_per_chunk).min(lines.len());
        let text = lines[start..end].join("\n");

        if !text.trim().is_empty() {
            let tags = tagger.tag(&text, language);
            chunks.push(Chunk {
                content: text,
                file_path: file_path.to_string(),
                chunk_index: chunks.len(),
                total_chunks: 0,
                start_line: start,
                end_line: end,
                language,
                function_name: tags.function_name,
                class_name: tags.class_name,
                imports: tags.imports,
                created_at: now,
                updated_at: now,
            });
        }

        if end == lines.len() {
            break;
        }
        start += step;
    }

    let total = chunks.len();
    for chunk in &mut chunks {
        chunk.total_chunks = total;
    }

    chunks
}
