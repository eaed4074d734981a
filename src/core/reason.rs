//! Build reasons
//!
//! Every package attempted in a batch carries one or more reasons saying
//! why it is being rebuilt. Reasons order the batch: each variant maps to
//! a priority class, lower classes are scheduled earlier.

use serde::Serialize;

use crate::config::defaults::DEFAULT_PRIORITY;

/// Why a package is being built this batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BuildReason {
    /// The recipe's release counter was bumped
    UpdatedPkgrel,

    /// One or more upstream sources reported a new version
    NvChecker {
        /// Changed update sources as (source index, source name)
        items: Vec<(usize, String)>,
        /// The (old, new) version pair per changed source
        changes: Vec<(String, String)>,
    },

    /// Pulled in because another package in the batch depends on it
    Depended {
        /// The package that needs this one
        depender: String,
    },

    /// Failed last time and its recipe has changed since
    UpdatedFailed,

    /// Failed last time because of missing dependencies
    FailedByDeps {
        /// The dependency names that were missing
        deps: Vec<String>,
    },

    /// Requested on the command line
    Cmdline {
        /// Opaque tag forwarded to the build worker
        runner: Option<String>,
    },

    /// Triggered because a package it watches was rebuilt
    OnBuild {
        /// The watched pkgbases
        update_on_build: Vec<String>,
    },
}

impl BuildReason {
    /// Priority class of this reason alone, lower is sooner.
    ///
    /// `Depended` has no class of its own: its urgency comes from the
    /// reverse-dependency closure (see [`crate::core::graph::building_priority`]).
    pub fn priority_class(&self) -> Option<u32> {
        match self {
            Self::UpdatedPkgrel => Some(0),
            Self::NvChecker { items, .. } => Some(nvchecker_priority(items)),
            Self::Depended { .. } => None,
            Self::UpdatedFailed => Some(2),
            Self::FailedByDeps { .. } => Some(3),
            Self::Cmdline { .. } => Some(3),
            Self::OnBuild { .. } => Some(3),
        }
    }
}

/// Priority of an NvChecker reason from its changed sources.
///
/// A manually-tracked source outranks everything; multiple changed
/// sources, or a changed non-primary source, still jump the queue.
fn nvchecker_priority(items: &[(usize, String)]) -> u32 {
    if items.iter().any(|(_, source)| source == "manual") {
        return 0;
    }
    match items.first() {
        Some(&(idx, _)) if items.len() > 1 || idx > 0 => 1,
        Some(_) => 3,
        None => DEFAULT_PRIORITY,
    }
}

impl std::fmt::Display for BuildReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpdatedPkgrel => write!(f, "pkgrel updated"),
            Self::NvChecker { changes, .. } => {
                let pairs: Vec<String> = changes
                    .iter()
                    .map(|(old, new)| format!("{old} -> {new}"))
                    .collect();
                write!(f, "new version: {}", pairs.join(", "))
            }
            Self::Depended { depender } => write!(f, "needed by {depender}"),
            Self::UpdatedFailed => write!(f, "failed previously and recipe changed"),
            Self::FailedByDeps { deps } => {
                write!(f, "failed previously for missing {}", deps.join(", "))
            }
            Self::Cmdline { runner: Some(r) } => write!(f, "requested on command line by {r}"),
            Self::Cmdline { runner: None } => write!(f, "requested on command line"),
            Self::OnBuild { update_on_build } => {
                write!(f, "rebuilt with {}", update_on_build.join(", "))
            }
        }
    }
}

/// Render a reason list the way reports and commit messages show it
pub fn display_reasons(reasons: &[BuildReason]) -> String {
    reasons
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
