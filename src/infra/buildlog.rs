//! Structured build log
//!
//! Two files in the state directory: `build.log` for humans and
//! `build-log.json` with one JSON object per line for machines. Every
//! build outcome and batch lifecycle event lands in both.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;

use crate::config::defaults::{BUILD_LOG_FILE, BUILD_LOG_JSON_FILE};

/// One structured log record
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildEvent {
    /// What happened ("batch_start", "built", "failed", ...)
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pkgbase: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub nv_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pkg_version: Option<String>,

    /// Wall time in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

#[derive(Debug, Serialize)]
struct BuildRecord<'a> {
    logger_name: &'a str,
    ts: String,
    #[serde(flatten)]
    event: &'a BuildEvent,
}

/// Append-only writer for the two build logs
#[derive(Debug)]
pub struct BuildLogger {
    logger_name: String,
    human: Mutex<File>,
    json: Mutex<File>,
}

impl BuildLogger {
    /// Open (appending) the log files in `statedir`
    pub fn open(statedir: &Path, logger_name: &str) -> std::io::Result<Self> {
        let append = |name: &str| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(statedir.join(name))
        };
        Ok(Self {
            logger_name: logger_name.to_string(),
            human: Mutex::new(append(BUILD_LOG_FILE)?),
            json: Mutex::new(append(BUILD_LOG_JSON_FILE)?),
        })
    }

    /// Write one event to both logs
    pub fn log(&self, event: &BuildEvent) {
        let ts = Utc::now().to_rfc3339();

        let mut line = format!("[{ts}] {}", event.event);
        if let Some(pkgbase) = &event.pkgbase {
            line.push_str(&format!(" {pkgbase}"));
        }
        if let Some(version) = &event.pkg_version {
            line.push_str(&format!(" {version}"));
        }
        if let Some(elapsed) = event.elapsed {
            line.push_str(&format!(" [{elapsed:.1}s]"));
        }
        if let Some(msg) = &event.msg {
            line.push_str(&format!(": {msg}"));
        }
        if let Ok(mut file) = self.human.lock() {
            let _ = writeln!(file, "{line}");
        }

        let record = BuildRecord {
            logger_name: &self.logger_name,
            ts,
            event,
        };
        if let Ok(json) = serde_json::to_string(&record) {
            if let Ok(mut file) = self.json.lock() {
                let _ = writeln!(file, "{json}");
            }
        }
    }
}
