//! Build worker interface
//!
//! The worker that actually builds a package is an external collaborator.
//! The scheduler hands it a fully described job and gets back a result,
//! the built version, and resource usage. Missing dependencies are a
//! result variant, not an error path.

use std::path::PathBuf;
use std::time::Duration;

use crate::core::graph::Dependency;

/// The unit handed to a worker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PkgToBuild {
    /// Package to build
    pub pkgbase: String,
    /// Version context for `update_on_build` handling, as (old, new) pairs
    pub on_build_vers: Vec<(String, String)>,
}

impl PkgToBuild {
    /// A job with no version context
    pub fn new(pkgbase: &str) -> Self {
        Self {
            pkgbase: pkgbase.to_string(),
            on_build_vers: Vec::new(),
        }
    }
}

/// Everything a worker needs for one build
#[derive(Debug, Clone)]
pub struct BuildJob {
    /// The package and its version context
    pub to_build: PkgToBuild,
    /// Commit-message template: package, target version, reasons
    pub commit_msg: String,
    /// Build-time dependencies the worker must make available
    pub build_deps: Vec<Dependency>,
    /// Per-batch directory for the package's build log
    pub logdir: PathBuf,
}

/// Resource usage of a build
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rusage {
    /// CPU time consumed
    pub cputime: Duration,
    /// Peak memory in bytes
    pub memory: u64,
}

/// Why a build failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildFailure {
    /// Dependencies could not be installed
    MissingDependencies(Vec<String>),
    /// Anything else
    Error(String),
}

/// What a build produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildResult {
    /// Built and published
    Successful,
    /// Built but held for manual publishing
    Staged,
    /// The worker decided not to build, with its explanation
    Skipped(String),
    /// The build failed
    Failed(BuildFailure),
}

impl BuildResult {
    /// Short class name for logs and database rows
    pub fn class(&self) -> &'static str {
        match self {
            Self::Successful => "successful",
            Self::Staged => "staged",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

/// A completed build as reported by the worker
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// Result class
    pub result: BuildResult,
    /// Version string of what was built, when known
    pub version: Option<String>,
    /// Wall time of the build
    pub elapsed: Duration,
    /// Resource usage, when the worker could measure it
    pub rusage: Option<Rusage>,
}

impl BuildOutcome {
    /// An outcome with only a result class, for tests and stub workers
    pub fn of(result: BuildResult) -> Self {
        Self {
            result,
            version: None,
            elapsed: Duration::ZERO,
            rusage: None,
        }
    }
}

/// The external build worker
///
/// `worker_id` identifies the pool slot; workers use it for log tagging
/// and mount isolation. Implementations must be callable from multiple
/// threads at once.
pub trait BuildWorker: Send + Sync {
    /// Run one build to completion
    fn build(&self, worker_id: usize, job: &BuildJob) -> BuildOutcome;
}
