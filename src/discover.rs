//! Source file discovery.
//!
//! Walks a directory tree and yields candidate files for chunking, in a
//! deterministic (path-sorted) order. A file is a candidate when:
//!
//! - no ancestor directory name is in `excluded_dirs`,
//! - its relative path matches none of `exclude_globs`,
//! - its extension is in `included_extensions`,
//! - it is no larger than `max_file_size_mb`,
//! - its first 1024 bytes contain no NUL byte.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::IndexConfig;

/// Bytes sniffed for NUL when detecting binary files.
const BINARY_SNIFF_LEN: usize = 1024;

/// A file selected for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Path relative to the root, `/`-separated on every platform.
    pub relative: String,
    pub size: u64,
}

pub struct FileDiscoverer {
    excluded_dirs: HashSet<String>,
    included_extensions: HashSet<String>,
    exclude_set: GlobSet,
    max_size_bytes: u64,
    follow_symlinks: bool,
}

impl FileDiscoverer {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let included_extensions = config
            .included_extensions
            .iter()
            .map(|e| normalize_extension(e))
            .collect();

        Ok(Self {
            excluded_dirs: config.excluded_dirs.iter().cloned().collect(),
            included_extensions,
            exclude_set: build_globset(&config.exclude_globs)?,
            max_size_bytes: config.max_file_size_bytes(),
            follow_symlinks: config.follow_symlinks,
        })
    }

    pub fn discover(&self, root: &Path) -> Result<Vec<DiscoveredFile>> {
        let mut files = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(self.follow_symlinks)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.is_excluded_dir(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = to_slash(relative);

            if self.exclude_set.is_match(&rel_str) {
                continue;
            }

            let ext = path
                .extension()
                .map(|e| normalize_extension(&e.to_string_lossy()))
                .unwrap_or_default();
            if !self.included_extensions.contains(&ext) {
                continue;
            }

            let size = match entry.metadata() {
                Ok(m) => m.len(),
                Err(e) => {
                    warn!(file = %rel_str, error = %e, "Skipping file without metadata");
                    continue;
                }
            };
            if size > self.max_size_bytes {
                warn!(file = %rel_str, size, "Skipping large file");
                continue;
            }

            if is_binary_file(path) {
                debug!(file = %rel_str, "Skipping binary file");
                continue;
            }

            files.push(DiscoveredFile {
                path: path.to_path_buf(),
                relative: rel_str,
                size,
            });
        }

        // Sort for deterministic ordering
        files.sort_by(|a, b| a.relative.cmp(&b.relative));

        info!(count = files.len(), root = %root.display(), "Discovered files for indexing");
        Ok(files)
    }

    fn is_excluded_dir(&self, entry: &DirEntry) -> bool {
        entry.file_type().is_dir()
            && self
                .excluded_dirs
                .contains(entry.file_name().to_string_lossy().as_ref())
    }
}

/// `".PY"`, `"py"` and `".py"` all become `".py"`.
fn normalize_extension(ext: &str) -> String {
    format!(".{}", ext.trim().trim_start_matches('.').to_ascii_lowercase())
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// A file is binary if its first bytes contain NUL. Unreadable files count
/// as binary.
pub fn is_binary_file(path: &Path) -> bool {
    let mut buf = [0u8; BINARY_SNIFF_LEN];
    let read = File::open(path).and_then(|mut f| f.read(&mut buf));
    match read {
        Ok(n) => buf[..n].contains(&0),
        Err(_) => true,
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
