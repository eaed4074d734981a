//! Version checker interface
//!
//! The upstream version checker is an external collaborator: it consumes
//! the per-package update sources and produces `(oldver, newver)` pairs.
//! Only the data types and the calling contract live here.

use std::collections::{HashMap, HashSet};

use anyhow::Result;

use crate::core::pkginfo::LilacInfo;

/// One update source's result for one package
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NvResult {
    /// Version recorded at the last acknowledged build, if any
    pub oldver: Option<String>,
    /// Version reported upstream, if the check produced one
    pub newver: Option<String>,
    /// Checker backend name, mirrors `update_on[idx].source`
    pub source: String,
}

impl NvResult {
    /// Whether this source reports a version change
    pub fn changed(&self) -> bool {
        self.newver.is_some() && self.oldver != self.newver
    }
}

/// Per-package version data, index-aligned with `update_on`
pub type NvData = HashMap<String, Vec<NvResult>>;

/// Everything one checker run produced
#[derive(Debug, Default)]
pub struct NvReport {
    /// Per-package source results
    pub results: NvData,
    /// Packages whose version check failed outright
    pub unknown: HashSet<String>,
}

/// The upstream version checker
pub trait VersionChecker {
    /// Check the given packages' update sources
    fn check(&self, infos: &[&LilacInfo], proxy: Option<&str>) -> Result<NvReport>;

    /// Acknowledge the pending new versions of the given packages
    fn take(&self, pkgbases: &[String]) -> Result<()>;
}

/// Checker used when no real one is wired: nothing ever changes
#[derive(Debug, Default)]
pub struct NullChecker;

impl VersionChecker for NullChecker {
    fn check(&self, infos: &[&LilacInfo], _proxy: Option<&str>) -> Result<NvReport> {
        tracing::warn!("No version checker configured; packages keep their versions");
        let results = infos
            .iter()
            .map(|info| {
                let rs = info
                    .update_on
                    .iter()
                    .map(|src| NvResult {
                        oldver: None,
                        newver: None,
                        source: src.source.clone(),
                    })
                    .collect();
                (info.pkgbase.clone(), rs)
            })
            .collect();
        Ok(NvReport {
            results,
            unknown: HashSet::new(),
        })
    }

    fn take(&self, _pkgbases: &[String]) -> Result<()> {
        Ok(())
    }
}

/// The first changed source's new version, used for display
pub fn primary_new_version(results: &[NvResult]) -> Option<&str> {
    results
        .iter()
        .find(|r| r.changed())
        .and_then(|r| r.newver.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changed() {
        let mk = |old: Option<&str>, new: Option<&str>| NvResult {
            oldver: old.map(String::from),
            newver: new.map(String::from),
            source: "github".to_string(),
        };
        assert!(mk(Some("1.0"), Some("1.1")).changed());
        assert!(mk(None, Some("1.0")).changed());
        assert!(!mk(Some("1.0"), Some("1.0")).changed());
        assert!(!mk(Some("1.0"), None).changed());
    }

    #[test]
    fn test_primary_new_version() {
        let results = vec![
            NvResult {
                oldver: Some("2".to_string()),
                newver: Some("2".to_string()),
                source: "pypi".to_string(),
            },
            NvResult {
                oldver: Some("1".to_string()),
                newver: Some("3".to_string()),
                source: "github".to_string(),
            },
        ];
        assert_eq!(primary_new_version(&results), Some("3"));
        assert_eq!(primary_new_version(&results[..1]), None);
    }
}
