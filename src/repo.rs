//! Source root validation.
//!
//! The indexing pipeline asks a [`RootValidator`] whether a path is a usable
//! source tree before doing any work.

use anyhow::{bail, Result};
use std::path::Path;
use std::process::Command;

pub trait RootValidator: Send + Sync {
    fn validate(&self, root: &Path) -> Result<()>;
}

/// Accepts any existing, readable directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryValidator;

impl RootValidator for DirectoryValidator {
    fn validate(&self, root: &Path) -> Result<()> {
        if !root.exists() {
            bail!("path does not exist");
        }
        if !root.is_dir() {
            bail!("path is not a directory");
        }
        std::fs::read_dir(root).map_err(|e| anyhow::anyhow!("directory is not readable: {}", e))?;
        Ok(())
    }
}

/// Requires a Git work tree: `.git` at the root, or `git rev-parse`
/// confirming the path is inside one.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitRootValidator;

impl RootValidator for GitRootValidator {
    fn validate(&self, root: &Path) -> Result<()> {
        DirectoryValidator.validate(root)?;

        if root.join(".git").exists() {
            return Ok(());
        }

        let inside = Command::new("git")
            .arg("-C")
            .arg(root)
            .args(["rev-parse", "--is-inside-work-tree"])
            .output()
            .map(|o| o.status.success() && String::from_utf8_lossy(&o.stdout).trim() == "true")
            .unwrap_or(false);

        if !inside {
            bail!("no Git repository found");
        }
        Ok(())
    }
}

/// Pick the validator for the `index.require_git` setting.
pub fn validator_for(require_git: bool) -> Box<dyn RootValidator> {
    if require_git {
        Box::new(GitRootValidator)
    } else {
        Box::new(DirectoryValidator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_directory_validator() {
        let tmp = TempDir::new().unwrap();
        assert!(DirectoryValidator.validate(tmp.path()).is_ok());
        assert!(DirectoryValidator
            .validate(&tmp.path().join("missing"))
            .is_err());

        let file = tmp.path().join("f.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(DirectoryValidator.validate(&file).is_err());
    }

    #[test]
    fn test_git_validator_accepts_dot_git() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join(".git")).unwrap();
        assert!(GitRootValidator.validate(tmp.path()).is_ok());
    }

    #[test]
    fn test_git_validator_rejects_missing_path() {
        let tmp = TempDir::new().unwrap();
        assert!(GitRootValidator.validate(&tmp.path().join("nope")).is_err());
    }
}
