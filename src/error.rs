//! Error types for lilac
//!
//! Domain-specific error types using thiserror. Startup errors are fatal;
//! everything else is recovered per package so the batch keeps going.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised before any build work starts
#[derive(Error, Debug)]
pub enum SetupError {
    /// Repository is on the wrong branch
    #[error("Repository is on branch '{branch}', expected master or main")]
    WrongBranch { branch: String },

    /// Another instance holds the state-directory lock
    #[error("Another lilac instance is running (lock held by pid {pid})")]
    LockHeld { pid: u32 },

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(#[from] SettingsError),

    /// State directory cannot be prepared
    #[error("Failed to prepare state directory '{path}': {error}")]
    StateDir { path: PathBuf, error: String },

    /// Prerun command failed
    #[error("Prerun command {argv:?} exited with {status}")]
    Prerun { argv: Vec<String>, status: i32 },
}

/// Configuration file errors
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Config file not found
    #[error("Config file not found at '{path}'")]
    NotFound { path: PathBuf },

    /// IO error reading the config file
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },

    /// TOML parse error
    #[error("Failed to parse config: {source}")]
    Parse { source: toml::de::Error },

    /// Semantic validation errors, all of them
    #[error("Invalid config: {}", errors.join("; "))]
    Invalid { errors: Vec<String> },
}

/// Git operation errors
#[derive(Error, Debug)]
pub enum GitError {
    /// Underlying git command failed
    #[error("git {args:?} failed: {stderr}")]
    CommandFailed { args: Vec<String>, stderr: String },

    /// git binary could not be spawned
    #[error("Failed to run git: {error}")]
    Spawn { error: String },

    /// Output was not valid UTF-8 or had an unexpected shape
    #[error("Unexpected git output: {0}")]
    BadOutput(String),
}

/// Persistent store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error on the store file
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },

    /// Store file parse error
    #[error("Failed to parse store: {source}")]
    Parse { source: toml::de::Error },

    /// Store serialization error
    #[error("Failed to serialize store: {source}")]
    Serialize { source: toml::ser::Error },
}

/// Package metadata loading errors
#[derive(Error, Debug)]
pub enum InfoError {
    /// Metadata file missing for a package directory
    #[error("No metadata file in package directory '{dir}'")]
    Missing { dir: String },

    /// Metadata parse error
    #[error("Failed to parse metadata for '{dir}': {error}")]
    Parse { dir: String, error: String },
}

/// Database access errors
#[derive(Error, Debug)]
pub enum DbError {
    /// Query failed
    #[error("Database query failed: {0}")]
    Query(String),

    /// Connection failed
    #[error("Database connection failed: {0}")]
    Connect(String),
}

/// Top-level lilac error type
#[derive(Error, Debug)]
pub enum LilacError {
    /// Setup error
    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),

    /// Git error
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Database error
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    /// IO error
    #[error("IO error: {source}")]
    Io { source: std::io::Error },

    /// Generic error
    #[error("{0}")]
    Generic(String),
}
