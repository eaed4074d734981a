//! Per-package build metadata
//!
//! Each managed package directory carries a `lilac.toml` describing its
//! maintainers, upstream update sources, dependencies on other managed
//! packages, and cross-package rebuild triggers. Loading failures do not
//! abort the batch; they mark the package as failed so dependents are
//! reported instead of silently skipped.

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use crate::config::defaults::INFO_FILE;
use crate::error::InfoError;

/// An upstream update source watched by the version checker
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct UpdateSource {
    /// Checker backend name ("github", "pypi", "manual", ...)
    pub source: String,

    /// Minimum interval between rebuilds from this source, e.g. "3d" or "12h"
    #[serde(default)]
    pub throttle: Option<String>,
}

/// A cross-package rebuild trigger entry
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OnBuildEntry {
    /// The watched pkgbase
    pub pkgbase: String,
}

/// Parsed metadata for one managed package
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct LilacInfo {
    /// Canonical package name; filled from the directory name
    #[serde(default)]
    pub pkgbase: String,

    /// Maintainer addresses for error reports
    #[serde(default)]
    pub maintainers: Vec<String>,

    /// Update sources, index-aligned with the version checker's results
    #[serde(default)]
    pub update_on: Vec<UpdateSource>,

    /// Rebuild this package whenever one of these is rebuilt
    #[serde(default)]
    pub update_on_build: Vec<OnBuildEntry>,

    /// Runtime dependencies; "dir" or "dir/pkgname"
    #[serde(default)]
    pub repo_depends: Vec<String>,

    /// Build-time dependencies; same syntax as `repo_depends`
    #[serde(default)]
    pub build_depends: Vec<String>,

    /// Unmanaged packages keep their directory but are never scheduled
    #[serde(default = "default_managed")]
    pub managed: bool,
}

fn default_managed() -> bool {
    true
}

impl LilacInfo {
    /// Parse metadata from TOML, stamping the owning directory name
    pub fn from_toml(pkgbase: &str, content: &str) -> Result<Self, InfoError> {
        let mut info: Self = toml::from_str(content).map_err(|e| InfoError::Parse {
            dir: pkgbase.to_string(),
            error: e.to_string(),
        })?;
        info.pkgbase = pkgbase.to_string();
        Ok(info)
    }

    /// Throttle intervals keyed by update-source index, in seconds
    pub fn throttle_info(&self) -> HashMap<usize, i64> {
        self.update_on
            .iter()
            .enumerate()
            .filter_map(|(idx, src)| {
                let spec = src.throttle.as_deref()?;
                parse_interval(spec).map(|secs| (idx, secs))
            })
            .collect()
    }
}

/// Result of loading all package metadata under a repository
#[derive(Debug, Default)]
pub struct LoadedInfos {
    /// Successfully parsed, managed packages keyed by pkgbase
    pub infos: HashMap<String, LilacInfo>,
    /// Packages whose metadata failed to load
    pub failed: Vec<String>,
}

/// Load metadata for every package directory under `repodir`.
///
/// Directories without a metadata file are not packages and are skipped;
/// unparsable metadata lands the package in [`LoadedInfos::failed`].
pub fn load_managed(repodir: &Path) -> LoadedInfos {
    let mut loaded = LoadedInfos::default();

    let entries = match std::fs::read_dir(repodir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("Cannot read repository directory {}: {e}", repodir.display());
            return loaded;
        }
    };

    for entry in entries.flatten() {
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(String::from) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let info_path = entry.path().join(INFO_FILE);
        if !info_path.exists() {
            continue;
        }

        let content = match std::fs::read_to_string(&info_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("Failed to read metadata for {name}: {e}");
                loaded.failed.push(name);
                continue;
            }
        };
        match LilacInfo::from_toml(&name, &content) {
            Ok(info) if info.managed => {
                loaded.infos.insert(name, info);
            }
            Ok(_) => {
                tracing::debug!("Skipping unmanaged package {name}");
            }
            Err(e) => {
                tracing::error!("{e}");
                loaded.failed.push(name);
            }
        }
    }

    loaded
}

/// Parse an interval like "3d", "12h", "90m", "45s" or "1d12h" into seconds
pub fn parse_interval(spec: &str) -> Option<i64> {
    let re = Regex::new(r"^(?:(\d+)d)?(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$").ok()?;
    let caps = re.captures(spec.trim())?;

    let field = |i: usize| -> i64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .unwrap_or(0)
    };

    let total = field(1) * 86400 + field(2) * 3600 + field(3) * 60 + field(4);
    if total > 0 {
        Some(total)
    } else {
        None
    }
}
