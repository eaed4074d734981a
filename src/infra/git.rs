//! Git operations
//!
//! The package repository is a git checkout with one directory per
//! package. Batches run against a clean tree: reset, pull, diff against
//! the last batch's commit, and optionally push afterwards.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Command;

use regex::Regex;

use crate::error::GitError;

/// Git operations on the package repository
#[derive(Debug, Clone)]
pub struct GitRepo {
    repodir: PathBuf,
}

impl GitRepo {
    /// Operate on the repository at `repodir`
    pub fn new(repodir: PathBuf) -> Self {
        Self { repodir }
    }

    fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repodir)
            .output()
            .map_err(|e| GitError::Spawn {
                error: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(GitError::CommandFailed {
                args: args.iter().map(|s| s.to_string()).collect(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        String::from_utf8(output.stdout)
            .map_err(|e| GitError::BadOutput(e.to_string()))
    }

    /// Short name of the currently checked-out branch
    pub fn current_branch(&self) -> Result<String, GitError> {
        Ok(self.run(&["symbolic-ref", "--short", "HEAD"])?.trim().to_string())
    }

    /// Commit hash of HEAD
    pub fn head_commit(&self) -> Result<String, GitError> {
        Ok(self.run(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    /// Throw away local modifications
    pub fn reset_hard(&self) -> Result<(), GitError> {
        self.run(&["reset", "--hard"]).map(|_| ())
    }

    /// Bring the checkout up to date
    pub fn pull(&self) -> Result<(), GitError> {
        self.run(&["pull", "--no-edit"]).map(|_| ())
    }

    /// Publish local commits
    pub fn push(&self) -> Result<(), GitError> {
        self.run(&["push"]).map(|_| ())
    }

    /// Paths changed between two commits
    pub fn diff_files(&self, old: &str, new: &str) -> Result<Vec<String>, GitError> {
        let output = self.run(&["diff", "--name-only", old, new])?;
        Ok(output.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }

    /// Package directories touched between two commits
    pub fn changed_packages(&self, old: &str, new: &str) -> Result<HashSet<String>, GitError> {
        Ok(changed_packages_from_paths(self.diff_files(old, new)?))
    }

    /// Contents of a file at a given commit, None if it did not exist
    pub fn show_file(&self, rev: &str, path: &str) -> Result<Option<String>, GitError> {
        match self.run(&["show", &format!("{rev}:{path}")]) {
            Ok(content) => Ok(Some(content)),
            Err(GitError::CommandFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Whether the recipe's release counter differs between two commits
    pub fn pkgrel_changed(
        &self,
        old: &str,
        new: &str,
        recipe_path: &str,
    ) -> Result<bool, GitError> {
        let old_rel = self
            .show_file(old, recipe_path)?
            .as_deref()
            .and_then(extract_pkgrel);
        let new_rel = self
            .show_file(new, recipe_path)?
            .as_deref()
            .and_then(extract_pkgrel);
        Ok(match (old_rel, new_rel) {
            (Some(o), Some(n)) => o != n,
            _ => false,
        })
    }
}

/// First path component of every path that lives inside a directory
pub fn changed_packages_from_paths(paths: Vec<String>) -> HashSet<String> {
    paths
        .into_iter()
        .filter_map(|path| {
            let (first, rest) = path.split_once('/')?;
            if rest.is_empty() {
                None
            } else {
                Some(first.to_string())
            }
        })
        .collect()
}

/// The `pkgrel=` value of a build recipe
pub fn extract_pkgrel(recipe: &str) -> Option<String> {
    let re = Regex::new(r"(?m)^pkgrel=([^\s#]+)").ok()?;
    re.captures(recipe)
        .map(|caps| caps[1].trim_matches(|c| c == '"' || c == '\'').to_string())
}
