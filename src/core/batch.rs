//! Batch controller
//!
//! Owns one invocation end to end: reset the repository, load metadata,
//! assign reasons, drive the scheduler to quiescence, and persist state
//! in a finalize step that also runs after an interrupt.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use crate::config::defaults::{LOG_SUBDIR, RECIPE_FILE, STORE_FILE};
use crate::core::assign::{assign_reasons, care_set, AssignInput, CmdlineTarget};
use crate::core::graph::{build_depmaps, build_graph, DepMap, DepResolver};
use crate::core::nv::{primary_new_version, NvData, NvReport, VersionChecker};
use crate::core::pkginfo::{load_managed, LilacInfo};
use crate::core::reason::{display_reasons, BuildReason};
use crate::core::report::Reporter;
use crate::core::settings::Settings;
use crate::core::sorter::BuildSorter;
use crate::core::state::{FailedInfo, Store};
use crate::core::worker::{BuildJob, BuildWorker, PkgToBuild};
use crate::db::{Database, PkgStatus};
use crate::error::{LilacError, SetupError};
use crate::infra::buildlog::{BuildEvent, BuildLogger};
use crate::infra::git::GitRepo;
use crate::infra::lockfile::ProcessLock;
use crate::infra::resources::ResourceSampler;
use crate::infra::subprocess::{run_postrun, run_prerun};

/// The external collaborators a batch talks to
pub struct Collaborators {
    pub worker: Arc<dyn BuildWorker>,
    pub checker: Box<dyn VersionChecker>,
    pub db: Option<Arc<dyn Database>>,
    pub reporter: Arc<dyn Reporter>,
    pub resolver: Arc<dyn DepResolver>,
    pub resources: Arc<dyn ResourceSampler>,
}

/// All mutable state of one running batch
pub struct Batch {
    pub name: String,
    pub max_concurrency: usize,
    pub infos: HashMap<String, LilacInfo>,
    pub depmap: DepMap,
    pub build_depmap: DepMap,
    pub nvdata: NvData,
    pub build_reasons: HashMap<String, Vec<BuildReason>>,
    pub sorter: BuildSorter,
    /// pkgbase -> missing dependency names; empty when unrelated to deps
    pub failed: HashMap<String, Vec<String>>,
    pub built: HashSet<String>,
    /// Packages actually handed to a worker this batch
    pub attempted: HashSet<String>,
    pub db: Option<Arc<dyn Database>>,
    pub reporter: Arc<dyn Reporter>,
    pub resolver: Arc<dyn DepResolver>,
    pub resources: Arc<dyn ResourceSampler>,
    pub worker: Arc<dyn BuildWorker>,
    pub logdir: PathBuf,
    pub buildlog: Option<Arc<BuildLogger>>,
}

impl Batch {
    /// Maintainers of a package, empty when unknown
    pub(crate) fn maintainers_of(&self, pkgbase: &str) -> Vec<String> {
        self.infos
            .get(pkgbase)
            .map(|i| i.maintainers.clone())
            .unwrap_or_default()
    }

    /// Finalize a package in the sorter and the database
    pub(crate) fn mark_done(&mut self, pkgbase: &str) {
        self.sorter.done(pkgbase);
        if let Some(db) = &self.db {
            if let Err(e) = db.set_package_status(pkgbase, PkgStatus::Done) {
                tracing::warn!("Cannot update status of {pkgbase}: {e}");
            }
        }
    }

    /// Write one structured build-log event, when logging is wired
    pub(crate) fn log_event(&self, event: BuildEvent) {
        if let Some(log) = &self.buildlog {
            log.log(&event);
        }
    }

    /// Assemble the job for a picked package
    pub(crate) fn make_job(&self, to_build: PkgToBuild) -> BuildJob {
        let pkgbase = &to_build.pkgbase;
        let reasons = self
            .build_reasons
            .get(pkgbase)
            .map(|rs| display_reasons(rs))
            .unwrap_or_default();
        let commit_msg = match self
            .nvdata
            .get(pkgbase)
            .and_then(|rs| primary_new_version(rs))
        {
            Some(version) => format!("{pkgbase}: auto updated to {version}\n\n{reasons}"),
            None => format!("{pkgbase}: auto rebuilt\n\n{reasons}"),
        };
        BuildJob {
            build_deps: self
                .build_depmap
                .get(pkgbase)
                .cloned()
                .unwrap_or_default(),
            commit_msg,
            logdir: self.logdir.clone(),
            to_build,
        }
    }
}

/// What a finished batch looks like
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub built: Vec<String>,
    pub failed: Vec<String>,
    pub attempted: usize,
    pub interrupted: bool,
}

/// Run one full batch
pub fn run_batch(
    settings: &Settings,
    targets: &[CmdlineTarget],
    collab: Collaborators,
) -> Result<BatchSummary, LilacError> {
    settings.apply_envvars();

    let statedir = &settings.lilac.statedir;
    std::fs::create_dir_all(statedir).map_err(|e| SetupError::StateDir {
        path: statedir.clone(),
        error: e.to_string(),
    })?;
    let _lock = ProcessLock::acquire(statedir)?;

    let git = GitRepo::new(settings.repository.repodir.clone());
    let branch = git.current_branch()?;
    if branch != "master" && branch != "main" {
        return Err(SetupError::WrongBranch { branch }.into());
    }
    git.reset_hard()?;
    git.pull()?;
    run_prerun(&settings.misc.prerun)?;

    let store_path = statedir.join(STORE_FILE);
    let mut store = Store::load(&store_path)?;
    let prior_failed = store.failed_map();

    let loaded = load_managed(&settings.repository.repodir);
    let infos = loaded.infos;
    let failed: HashMap<String, Vec<String>> = loaded
        .failed
        .iter()
        .map(|pkgbase| (pkgbase.clone(), Vec::new()))
        .collect();

    let (depmap, build_depmap) = build_depmaps(&infos);
    let head = git.head_commit()?;
    let care = care_set(&infos, &depmap, targets);

    let (recipe_changed, pkgrel_changed) =
        diff_recipes(&git, store.last_commit.as_deref(), &head, &infos);

    let care_infos: Vec<&LilacInfo> = care.iter().filter_map(|p| infos.get(p)).collect();
    let NvReport {
        results: nvdata,
        unknown: nv_unknown,
    } = match collab
        .checker
        .check(&care_infos, settings.nvchecker.proxy.as_deref())
    {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Version check failed: {e}");
            NvReport::default()
        }
    };

    let mut build_reasons = assign_reasons(&AssignInput {
        infos: &infos,
        nvdata: &nvdata,
        nv_unknown: &nv_unknown,
        recipe_changed: &recipe_changed,
        pkgrel_changed: &pkgrel_changed,
        prior_failed: &prior_failed,
        targets,
        care: &care,
        db: collab.db.as_deref(),
        now: Utc::now(),
    });

    let graph = build_graph(
        &depmap,
        &infos,
        &mut build_reasons,
        collab.resolver.as_ref(),
        |pkgbase| match &collab.db {
            Some(db) => db.is_last_build_failed(pkgbase).unwrap_or(false),
            None => prior_failed.contains_key(pkgbase),
        },
        collab.reporter.as_ref(),
    );
    let sorter = BuildSorter::new(&graph, &build_reasons);

    let logdir = statedir
        .join(LOG_SUBDIR)
        .join(Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string());
    if let Err(e) = std::fs::create_dir_all(&logdir) {
        tracing::warn!("Cannot create log directory {}: {e}", logdir.display());
    }
    let buildlog = match BuildLogger::open(statedir, &settings.lilac.name) {
        Ok(log) => Some(Arc::new(log)),
        Err(e) => {
            tracing::warn!("Cannot open build logs: {e}");
            None
        }
    };

    if let Some(db) = &collab.db {
        let mut rows: Vec<(String, String)> = build_reasons
            .iter()
            .map(|(pkgbase, reasons)| {
                (
                    pkgbase.clone(),
                    serde_json::to_string(reasons).unwrap_or_default(),
                )
            })
            .collect();
        rows.sort();
        if let Err(e) = db.init_batch(&rows) {
            tracing::warn!("Cannot initialize batch state: {e}");
        }
        if let Err(e) = db.record_batch_event("start", logdir.to_str()) {
            tracing::warn!("Cannot record batch start: {e}");
        }
    }

    let mut batch = Batch {
        name: settings.lilac.name.clone(),
        max_concurrency: settings.lilac.max_concurrency,
        infos,
        depmap,
        build_depmap,
        nvdata,
        build_reasons,
        sorter,
        failed,
        built: HashSet::new(),
        attempted: HashSet::new(),
        db: collab.db.clone(),
        reporter: collab.reporter.clone(),
        resolver: collab.resolver.clone(),
        resources: collab.resources.clone(),
        worker: collab.worker.clone(),
        logdir,
        buildlog,
    };

    batch.log_event(BuildEvent {
        event: "batch_start".to_string(),
        ..Default::default()
    });

    batch.drive();

    // Everything below must run even after an interrupt.
    finalize(
        settings,
        &mut store,
        &store_path,
        &head,
        &batch,
        &prior_failed,
        &git,
        collab.checker.as_ref(),
    );

    let mut built: Vec<String> = batch.built.iter().cloned().collect();
    built.sort();
    let mut failed: Vec<String> = batch.failed.keys().cloned().collect();
    failed.sort();
    Ok(BatchSummary {
        built,
        failed,
        attempted: batch.attempted.len(),
        interrupted: crate::infra::signals::interrupted(),
    })
}

/// Changed packages and changed release counters since the last batch
fn diff_recipes(
    git: &GitRepo,
    last_commit: Option<&str>,
    head: &str,
    infos: &HashMap<String, LilacInfo>,
) -> (HashSet<String>, HashSet<String>) {
    let Some(old) = last_commit else {
        return (HashSet::new(), HashSet::new());
    };
    if old == head {
        return (HashSet::new(), HashSet::new());
    }

    let changed: HashSet<String> = match git.changed_packages(old, head) {
        Ok(changed) => changed
            .into_iter()
            .filter(|p| infos.contains_key(p))
            .collect(),
        Err(e) => {
            tracing::warn!("Cannot diff against last batch commit {old}: {e}");
            return (HashSet::new(), HashSet::new());
        }
    };

    let mut pkgrel_changed = HashSet::new();
    for pkgbase in &changed {
        let recipe_path = format!("{pkgbase}/{RECIPE_FILE}");
        match git.pkgrel_changed(old, head, &recipe_path) {
            Ok(true) => {
                pkgrel_changed.insert(pkgbase.clone());
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("Cannot compare recipe of {pkgbase}: {e}"),
        }
    }
    (changed, pkgrel_changed)
}

/// Persist state, acknowledge versions, reset and push, run hooks.
///
/// Failures here are logged, never raised: partial persistence beats
/// none after a long batch.
#[allow(clippy::too_many_arguments)]
fn finalize(
    settings: &Settings,
    store: &mut Store,
    store_path: &std::path::Path,
    head: &str,
    batch: &Batch,
    prior_failed: &HashMap<String, Vec<String>>,
    git: &GitRepo,
    checker: &dyn VersionChecker,
) {
    store.last_commit = Some(head.to_string());

    store
        .failed
        .retain(|pkgbase, _| batch.infos.contains_key(pkgbase) && !batch.built.contains(pkgbase));
    for (pkgbase, missing) in &batch.failed {
        store.failed.insert(
            pkgbase.clone(),
            FailedInfo {
                missing: missing.clone(),
            },
        );
    }
    if let Err(e) = store.save(store_path) {
        tracing::error!("Cannot persist batch state: {e}");
    }

    let has_nv_change = |pkgbase: &String| {
        batch
            .nvdata
            .get(pkgbase)
            .map(|rs| rs.iter().any(|r| r.changed()))
            .unwrap_or(false)
    };
    let mut take: Vec<String> = if settings.lilac.rebuild_failed_pkgs {
        batch.built.iter().filter(|p| has_nv_change(p)).cloned().collect()
    } else {
        batch
            .attempted
            .iter()
            .filter(|pkgbase| {
                batch
                    .build_reasons
                    .get(*pkgbase)
                    .map(|rs| rs.iter().any(|r| matches!(r, BuildReason::NvChecker { .. })))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    };
    take.sort();
    if !take.is_empty() {
        if let Err(e) = checker.take(&take) {
            tracing::warn!("Cannot acknowledge versions: {e}");
        }
    }

    if let Err(e) = git.reset_hard() {
        tracing::warn!("Cannot reset repository: {e}");
    }
    if settings.lilac.git_push {
        if let Err(e) = git.push() {
            tracing::warn!("Cannot push repository: {e}");
        }
    }
    run_postrun(&settings.misc.postrun);

    if let Some(db) = &batch.db {
        if let Err(e) = db.record_batch_event("stop", None) {
            tracing::warn!("Cannot record batch stop: {e}");
        }
    }
    batch.log_event(BuildEvent {
        event: "batch_stop".to_string(),
        ..Default::default()
    });

    // prior_failed is what the batch started from; anything new is worth a line
    for pkgbase in batch.failed.keys() {
        if !prior_failed.contains_key(pkgbase) {
            tracing::info!("New failure this batch: {pkgbase}");
        }
    }
}
