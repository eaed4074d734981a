//! Error reporting
//!
//! Per-package error reports are addressed to the package's maintainers.
//! Delivery (mail, tickets) belongs to the repository manager; the
//! scheduler only knows this interface. The default sink writes reports
//! to the log so nothing is lost when no manager is wired up.

use std::sync::Mutex;

/// Sink for per-package error reports
pub trait Reporter: Send + Sync {
    /// Report a problem with one package to its maintainers
    fn error_report(&self, pkgbase: &str, maintainers: &[String], subject: &str, body: &str);
}

/// Reporter that routes everything to the log
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn error_report(&self, pkgbase: &str, maintainers: &[String], subject: &str, body: &str) {
        tracing::error!(
            pkgbase,
            maintainers = maintainers.join(", "),
            "{subject}: {body}"
        );
    }
}

/// A captured error report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub pkgbase: String,
    pub maintainers: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Reporter that collects reports in memory, for tests
#[derive(Debug, Default)]
pub struct MemoryReporter {
    reports: Mutex<Vec<Report>>,
}

impl MemoryReporter {
    /// All reports captured so far
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }
}

impl Reporter for MemoryReporter {
    fn error_report(&self, pkgbase: &str, maintainers: &[String], subject: &str, body: &str) {
        self.reports.lock().unwrap().push(Report {
            pkgbase: pkgbase.to_string(),
            maintainers: maintainers.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
    }
}
