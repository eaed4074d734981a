//! Common test utilities and helpers
//!
//! Builds fully wired [`Batch`] values from compact scenario
//! descriptions, with recording collaborator doubles in place of the
//! external worker, database and reporter.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use lilac::core::assign::{assign_reasons, care_set, AssignInput, CmdlineTarget};
use lilac::core::batch::Batch;
use lilac::core::graph::{build_depmaps, build_graph, DepResolver, Dependency};
use lilac::core::nv::{NvData, NvResult};
use lilac::core::pkginfo::{LilacInfo, OnBuildEntry, UpdateSource};
use lilac::core::sorter::BuildSorter;
use lilac::core::worker::{BuildJob, BuildOutcome, BuildResult, BuildWorker};
use lilac::core::report::MemoryReporter;
use lilac::db::{Database, MemoryDatabase};
use lilac::infra::resources::StaticResources;

/// Worker double: scripted results, recorded order and concurrency
#[derive(Debug, Default)]
pub struct RecordingWorker {
    results: Mutex<HashMap<String, BuildResult>>,
    delay: Option<Duration>,
    events: Mutex<Vec<(String, &'static str)>>,
    jobs: Mutex<Vec<BuildJob>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl RecordingWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Worker that holds each build briefly so builds can overlap
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Script the result for one package; everything else succeeds
    pub fn set_result(&self, pkgbase: &str, result: BuildResult) {
        self.results
            .lock()
            .unwrap()
            .insert(pkgbase.to_string(), result);
    }

    /// Packages in the order their builds started
    pub fn submission_order(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, kind)| *kind == "start")
            .map(|(pkgbase, _)| pkgbase.clone())
            .collect()
    }

    /// Raw (pkgbase, "start"/"end") event stream
    pub fn events(&self) -> Vec<(String, &'static str)> {
        self.events.lock().unwrap().clone()
    }

    /// Jobs as handed over by the driver
    pub fn jobs(&self) -> Vec<BuildJob> {
        self.jobs.lock().unwrap().clone()
    }

    /// Highest number of concurrently running builds observed
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// True when `before`'s build ended before `after`'s started
    pub fn finished_before(&self, before: &str, after: &str) -> bool {
        let events = self.events.lock().unwrap();
        let end = events
            .iter()
            .position(|(p, kind)| p == before && *kind == "end");
        let start = events
            .iter()
            .position(|(p, kind)| p == after && *kind == "start");
        match (end, start) {
            (Some(end), Some(start)) => end < start,
            _ => false,
        }
    }
}

impl BuildWorker for RecordingWorker {
    fn build(&self, _worker_id: usize, job: &BuildJob) -> BuildOutcome {
        let pkgbase = job.to_build.pkgbase.clone();
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.events.lock().unwrap().push((pkgbase.clone(), "start"));
        self.jobs.lock().unwrap().push(job.clone());

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let result = self
            .results
            .lock()
            .unwrap()
            .get(&pkgbase)
            .cloned()
            .unwrap_or(BuildResult::Successful);

        self.events.lock().unwrap().push((pkgbase, "end"));
        self.running.fetch_sub(1, Ordering::SeqCst);

        BuildOutcome {
            result,
            version: Some("1-1".to_string()),
            elapsed: Duration::from_millis(1),
            rusage: None,
        }
    }
}

/// Resolver double answering from a fixed set of satisfied pkgnames
#[derive(Debug, Default)]
pub struct SetResolver {
    resolved: HashSet<String>,
}

impl SetResolver {
    pub fn resolving(names: &[&str]) -> Self {
        Self {
            resolved: names.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl DepResolver for SetResolver {
    fn resolve(&self, dep: &Dependency) -> bool {
        self.resolved.contains(&dep.pkgname)
    }
}

/// Compact description of a batch under test
pub struct Scenario {
    pub infos: HashMap<String, LilacInfo>,
    pub nvdata: NvData,
    pub prior_failed: HashMap<String, Vec<String>>,
    pub pkgrel_changed: HashSet<String>,
    pub targets: Vec<CmdlineTarget>,
    pub max_concurrency: usize,
    pub worker: Arc<RecordingWorker>,
    pub reporter: Arc<MemoryReporter>,
    pub resolver: Arc<SetResolver>,
    pub resources: Arc<StaticResources>,
    pub db: Option<Arc<MemoryDatabase>>,
}

impl Scenario {
    pub fn new() -> Self {
        Self {
            infos: HashMap::new(),
            nvdata: NvData::new(),
            prior_failed: HashMap::new(),
            pkgrel_changed: HashSet::new(),
            targets: Vec::new(),
            max_concurrency: 1,
            worker: Arc::new(RecordingWorker::new()),
            reporter: Arc::new(MemoryReporter::default()),
            resolver: Arc::new(SetResolver::default()),
            resources: Arc::new(StaticResources::new(1.5, u64::MAX / 2)),
            db: None,
        }
    }

    /// Add a managed package with runtime dependencies
    pub fn package(mut self, pkgbase: &str, deps: &[&str]) -> Self {
        self.infos.insert(
            pkgbase.to_string(),
            LilacInfo {
                pkgbase: pkgbase.to_string(),
                maintainers: vec![format!("{pkgbase}@example.com")],
                update_on: vec![UpdateSource {
                    source: "github".to_string(),
                    throttle: None,
                }],
                repo_depends: deps.iter().map(|d| d.to_string()).collect(),
                managed: true,
                ..Default::default()
            },
        );
        self
    }

    /// Declare that `pkgbase` watches `watched` for rebuilds
    pub fn on_build(mut self, pkgbase: &str, watched: &[&str]) -> Self {
        self.infos
            .get_mut(pkgbase)
            .expect("package must be declared first")
            .update_on_build = watched
            .iter()
            .map(|w| OnBuildEntry {
                pkgbase: w.to_string(),
            })
            .collect();
        self
    }

    /// Record an upstream version change for a package
    pub fn nv_change(mut self, pkgbase: &str, old: &str, new: &str) -> Self {
        self.nvdata.insert(
            pkgbase.to_string(),
            vec![NvResult {
                oldver: Some(old.to_string()),
                newver: Some(new.to_string()),
                source: "github".to_string(),
            }],
        );
        self
    }

    pub fn prior_failed(mut self, pkgbase: &str, missing: &[&str]) -> Self {
        self.prior_failed.insert(
            pkgbase.to_string(),
            missing.iter().map(|m| m.to_string()).collect(),
        );
        self
    }

    /// Record a release-counter bump for a package
    pub fn pkgrel_changed(mut self, pkgbase: &str) -> Self {
        self.pkgrel_changed.insert(pkgbase.to_string());
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn with_db(mut self) -> Self {
        self.db = Some(Arc::new(MemoryDatabase::new()));
        self
    }

    pub fn with_worker(mut self, worker: RecordingWorker) -> Self {
        self.worker = Arc::new(worker);
        self
    }

    pub fn with_resolver(mut self, resolver: SetResolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn with_resources(mut self, cpu_ratio: f64, memory_available: u64) -> Self {
        self.resources = Arc::new(StaticResources::new(cpu_ratio, memory_available));
        self
    }

    /// Run reason assignment and graph building, yielding a driveable batch
    pub fn into_batch(mut self) -> Batch {
        // every managed package was version-checked; default to no change
        for pkgbase in self.infos.keys() {
            self.nvdata.entry(pkgbase.clone()).or_insert_with(|| {
                vec![NvResult {
                    oldver: Some("1".to_string()),
                    newver: Some("1".to_string()),
                    source: "github".to_string(),
                }]
            });
        }

        let (depmap, build_depmap) = build_depmaps(&self.infos);
        let care = care_set(&self.infos, &depmap, &self.targets);
        let nv_unknown = HashSet::new();
        let recipe_changed = HashSet::new();
        let pkgrel_changed = self.pkgrel_changed.clone();

        let mut build_reasons = assign_reasons(&AssignInput {
            infos: &self.infos,
            nvdata: &self.nvdata,
            nv_unknown: &nv_unknown,
            recipe_changed: &recipe_changed,
            pkgrel_changed: &pkgrel_changed,
            prior_failed: &self.prior_failed,
            targets: &self.targets,
            care: &care,
            db: self.db.as_deref().map(|db| db as &dyn Database),
            now: Utc::now(),
        });

        let prior_failed = self.prior_failed.clone();
        let graph = build_graph(
            &depmap,
            &self.infos,
            &mut build_reasons,
            self.resolver.as_ref(),
            |pkgbase| prior_failed.contains_key(pkgbase),
            self.reporter.as_ref(),
        );
        let sorter = BuildSorter::new(&graph, &build_reasons);

        Batch {
            name: "lilac-test".to_string(),
            max_concurrency: self.max_concurrency,
            infos: self.infos,
            depmap,
            build_depmap,
            nvdata: self.nvdata,
            build_reasons,
            sorter,
            failed: HashMap::new(),
            built: HashSet::new(),
            attempted: HashSet::new(),
            db: self.db.map(|db| db as Arc<dyn Database>),
            reporter: self.reporter,
            resolver: self.resolver,
            resources: self.resources,
            worker: self.worker,
            logdir: std::env::temp_dir(),
            buildlog: None,
        }
    }
}
