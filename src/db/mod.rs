//! Database interface
//!
//! The scheduler can optionally record batch state and consume history
//! from a database. The server-backed implementation lives with the
//! deployment; this module defines the contract plus an in-memory
//! implementation used by tests and by runs without a configured server.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::DbError;

/// Status of a package within the current batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkgStatus {
    /// Queued, not yet picked
    Pending,
    /// Handed to a worker
    Building,
    /// Finalized, whatever the result
    Done,
}

impl PkgStatus {
    /// Column value
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Building => "building",
            Self::Done => "done",
        }
    }
}

/// Historical resource usage of a package's last build
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RusageRecord {
    /// CPU time consumed
    pub cputime: Duration,
    /// Peak memory in bytes
    pub memory: u64,
    /// Wall time of the build
    pub elapsed: Duration,
}

impl RusageRecord {
    /// CPU time over wall time; 1.0 when wall time is unknown
    pub fn cpu_intensity(&self) -> f64 {
        if self.elapsed.is_zero() {
            1.0
        } else {
            self.cputime.as_secs_f64() / self.elapsed.as_secs_f64()
        }
    }
}

/// One appended build record
#[derive(Debug, Clone, Default)]
pub struct PkgLogRow {
    pub pkgbase: String,
    pub nv_version: Option<String>,
    pub pkg_version: Option<String>,
    pub elapsed: Duration,
    pub result: String,
    pub cputime: Option<Duration>,
    pub memory: Option<u64>,
    pub msg: Option<String>,
    pub build_reasons: String,
    pub maintainers: String,
}

/// The optional batch database
pub trait Database: Send + Sync {
    /// Rewrite the current-batch table: every package pending, in order
    fn init_batch(&self, pkgs: &[(String, String)]) -> Result<(), DbError>;

    /// Move one package to a new status
    fn set_package_status(&self, pkgbase: &str, status: PkgStatus) -> Result<(), DbError>;

    /// Append one build record
    fn log_build(&self, row: &PkgLogRow) -> Result<(), DbError>;

    /// Record a batch lifecycle event ("start" with the log dir, "stop")
    fn record_batch_event(&self, event: &str, logdir: Option<&str>) -> Result<(), DbError>;

    /// Last-build resource usage for the given packages, where known
    fn get_pkgs_last_rusage(
        &self,
        pkgs: &[String],
    ) -> Result<HashMap<String, RusageRecord>, DbError>;

    /// Last successful build times for the given packages
    fn get_pkgs_last_success_times(
        &self,
        pkgs: &[String],
    ) -> Result<Vec<(String, DateTime<Utc>)>, DbError>;

    /// Current (old, new) version pairs for `update_on_build` targets
    fn get_update_on_build_vers(
        &self,
        items: &[String],
    ) -> Result<Vec<(String, String)>, DbError>;

    /// Whether the package's most recent recorded build failed
    fn is_last_build_failed(&self, pkgbase: &str) -> Result<bool, DbError>;
}

#[derive(Debug, Default)]
struct MemoryTables {
    pkgcurrent: Vec<(String, String, String)>,
    pkglog: Vec<PkgLogRow>,
    batch_events: Vec<(String, Option<String>)>,
    rusage: HashMap<String, RusageRecord>,
    success_times: HashMap<String, DateTime<Utc>>,
    on_build_vers: HashMap<String, (String, String)>,
    last_failed: HashMap<String, bool>,
    fail_on_build_vers: bool,
}

/// In-memory database, usable as a test double and as the default when no
/// server is configured
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: Mutex<MemoryTables>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed last-build resource usage
    pub fn set_last_rusage(&self, pkgbase: &str, record: RusageRecord) {
        self.tables
            .lock()
            .unwrap()
            .rusage
            .insert(pkgbase.to_string(), record);
    }

    /// Seed a last successful build time
    pub fn set_last_success_time(&self, pkgbase: &str, when: DateTime<Utc>) {
        self.tables
            .lock()
            .unwrap()
            .success_times
            .insert(pkgbase.to_string(), when);
    }

    /// Seed the version pair reported for an `update_on_build` target
    pub fn set_on_build_vers(&self, pkgbase: &str, oldver: &str, newver: &str) {
        self.tables.lock().unwrap().on_build_vers.insert(
            pkgbase.to_string(),
            (oldver.to_string(), newver.to_string()),
        );
    }

    /// Seed the last-build-failed flag
    pub fn set_last_build_failed(&self, pkgbase: &str, failed: bool) {
        self.tables
            .lock()
            .unwrap()
            .last_failed
            .insert(pkgbase.to_string(), failed);
    }

    /// Make `get_update_on_build_vers` fail, for error-path tests
    pub fn fail_on_build_vers(&self, fail: bool) {
        self.tables.lock().unwrap().fail_on_build_vers = fail;
    }

    /// Snapshot of the current-batch table as (pkgbase, status)
    pub fn pkgcurrent(&self) -> Vec<(String, String)> {
        self.tables
            .lock()
            .unwrap()
            .pkgcurrent
            .iter()
            .map(|(p, s, _)| (p.clone(), s.clone()))
            .collect()
    }

    /// Snapshot of appended build records
    pub fn pkglog(&self) -> Vec<PkgLogRow> {
        self.tables.lock().unwrap().pkglog.clone()
    }

    /// Snapshot of batch lifecycle events
    pub fn batch_events(&self) -> Vec<(String, Option<String>)> {
        self.tables.lock().unwrap().batch_events.clone()
    }
}

impl Database for MemoryDatabase {
    fn init_batch(&self, pkgs: &[(String, String)]) -> Result<(), DbError> {
        let mut tables = self.tables.lock().unwrap();
        tables.pkgcurrent = pkgs
            .iter()
            .map(|(pkgbase, reasons)| {
                (
                    pkgbase.clone(),
                    PkgStatus::Pending.as_str().to_string(),
                    reasons.clone(),
                )
            })
            .collect();
        Ok(())
    }

    fn set_package_status(&self, pkgbase: &str, status: PkgStatus) -> Result<(), DbError> {
        let mut tables = self.tables.lock().unwrap();
        for row in tables.pkgcurrent.iter_mut() {
            if row.0 == pkgbase {
                row.1 = status.as_str().to_string();
            }
        }
        Ok(())
    }

    fn log_build(&self, row: &PkgLogRow) -> Result<(), DbError> {
        self.tables.lock().unwrap().pkglog.push(row.clone());
        Ok(())
    }

    fn record_batch_event(&self, event: &str, logdir: Option<&str>) -> Result<(), DbError> {
        self.tables
            .lock()
            .unwrap()
            .batch_events
            .push((event.to_string(), logdir.map(String::from)));
        Ok(())
    }

    fn get_pkgs_last_rusage(
        &self,
        pkgs: &[String],
    ) -> Result<HashMap<String, RusageRecord>, DbError> {
        let tables = self.tables.lock().unwrap();
        Ok(pkgs
            .iter()
            .filter_map(|p| tables.rusage.get(p).map(|r| (p.clone(), *r)))
            .collect())
    }

    fn get_pkgs_last_success_times(
        &self,
        pkgs: &[String],
    ) -> Result<Vec<(String, DateTime<Utc>)>, DbError> {
        let tables = self.tables.lock().unwrap();
        Ok(pkgs
            .iter()
            .filter_map(|p| tables.success_times.get(p).map(|t| (p.clone(), *t)))
            .collect())
    }

    fn get_update_on_build_vers(
        &self,
        items: &[String],
    ) -> Result<Vec<(String, String)>, DbError> {
        let tables = self.tables.lock().unwrap();
        if tables.fail_on_build_vers {
            return Err(DbError::Query("update_on_build lookup failed".to_string()));
        }
        Ok(items
            .iter()
            .map(|p| {
                tables
                    .on_build_vers
                    .get(p)
                    .cloned()
                    .unwrap_or_else(|| (String::new(), String::new()))
            })
            .collect())
    }

    fn is_last_build_failed(&self, pkgbase: &str) -> Result<bool, DbError> {
        Ok(*self
            .tables
            .lock()
            .unwrap()
            .last_failed
            .get(pkgbase)
            .unwrap_or(&false))
    }
}
