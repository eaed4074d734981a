//! Persistent batch state
//!
//! The store file records the commit the last batch ran against and the
//! packages that failed, so the next invocation is incremental.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::StoreError;

/// Failure record for one package
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedInfo {
    /// Dependency names that were missing; empty if the failure was
    /// unrelated to dependencies
    #[serde(default)]
    pub missing: Vec<String>,
}

/// State carried between invocations
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Store {
    /// Commit of the last batch that ran to completion
    #[serde(default)]
    pub last_commit: Option<String>,

    /// Failure records keyed by pkgbase
    #[serde(default)]
    pub failed: HashMap<String, FailedInfo>,
}

impl Store {
    /// Load the store, returning an empty one if the file does not exist
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| StoreError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| StoreError::Parse { source: e })
    }

    /// Write the store to disk
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| StoreError::Serialize { source: e })?;
        std::fs::write(path, content).map_err(|e| StoreError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Failure records as a plain map of missing-dependency lists
    pub fn failed_map(&self) -> HashMap<String, Vec<String>> {
        self.failed
            .iter()
            .map(|(pkgbase, info)| (pkgbase.clone(), info.missing.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_store_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::load(&dir.path().join("store")).unwrap();
        assert_eq!(store, Store::default());
    }

    #[test]
    fn test_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");

        let store = Store {
            last_commit: Some("0123abcd".to_string()),
            failed: HashMap::from([
                (
                    "foo".to_string(),
                    FailedInfo {
                        missing: vec!["libbar".to_string()],
                    },
                ),
                ("baz".to_string(), FailedInfo::default()),
            ]),
        };
        store.save(&path).unwrap();

        let loaded = Store::load(&path).unwrap();
        assert_eq!(loaded, store);
        assert_eq!(
            loaded.failed_map().get("foo"),
            Some(&vec!["libbar".to_string()])
        );
    }

    #[test]
    fn test_bad_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        std::fs::write(&path, "last_commit = [[[").unwrap();
        assert!(Store::load(&path).is_err());
    }
}
