//! Command-line interface module
//!
//! This module handles argument parsing and collaborator wiring.
//! It contains no scheduling logic - that belongs in the [`crate::core`]
//! module.

pub mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use crate::config::defaults::CONFIG_FILE;
use crate::core::assign::CmdlineTarget;
use crate::core::batch::{run_batch, Collaborators};
use crate::core::graph::DestdirResolver;
use crate::core::nv::NullChecker;
use crate::core::report::LogReporter;
use crate::core::settings::Settings;
use crate::db::MemoryDatabase;
use crate::infra::resources::SystemResources;
use crate::infra::subprocess::{CommandWorker, SkipAllWorker};

/// Version string stamped with build info
pub const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_GIT_SHA"),
    " ",
    env!("VERGEN_BUILD_TIMESTAMP"),
    ")"
);

/// Lilac - batch build scheduler for a curated package repository
///
/// With no arguments, run a full batch over all managed packages. With
/// arguments, build only the named packages and their dependencies.
#[derive(Parser, Debug)]
#[command(name = "lilac")]
#[command(author, version = VERSION, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = CONFIG_FILE)]
    pub config: PathBuf,

    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Packages to build as pkgbase[:runner]
    pub packages: Vec<String>,
}

impl Cli {
    /// Execute a batch
    pub async fn run(self) -> Result<()> {
        let settings = Settings::load(&self.config)
            .with_context(|| format!("Failed to load {}", self.config.display()))?;
        let targets: Vec<CmdlineTarget> = self
            .packages
            .iter()
            .map(|arg| CmdlineTarget::parse(arg))
            .collect();

        let collab = wire_collaborators(&settings);
        let summary = run_batch(&settings, &targets, collab)?;

        if summary.interrupted {
            println!(
                "{} batch interrupted: {} built, {} failed",
                output::status::WARNING,
                summary.built.len(),
                summary.failed.len()
            );
        } else {
            println!(
                "{} batch finished: {} attempted, {} built, {} failed",
                output::status::SUCCESS,
                summary.attempted,
                summary.built.len(),
                summary.failed.len()
            );
        }
        for pkgbase in &summary.failed {
            println!("{} {pkgbase}", output::status::ERROR);
        }
        Ok(())
    }
}

/// Wire the default collaborators from the configuration
fn wire_collaborators(settings: &Settings) -> Collaborators {
    let worker: Arc<dyn crate::core::worker::BuildWorker> = match &settings.misc.worker {
        Some(argv) if !argv.is_empty() => Arc::new(CommandWorker::new(
            argv.clone(),
            settings.repository.repodir.clone(),
        )),
        _ => Arc::new(SkipAllWorker),
    };

    let db: Option<Arc<dyn crate::db::Database>> = settings.lilac.dburl.as_ref().map(|url| {
        tracing::info!("Recording batch state in memory for {url}");
        Arc::new(MemoryDatabase::new()) as Arc<dyn crate::db::Database>
    });

    Collaborators {
        worker,
        checker: Box::new(NullChecker),
        db,
        reporter: Arc::new(LogReporter),
        resolver: Arc::new(DestdirResolver::new(settings.repository.destdir.clone())),
        resources: Arc::new(SystemResources),
    }
}
