//! Build driving
//!
//! A bounded pool of worker threads drains a job channel and reports
//! results back over a result channel. The scheduler itself stays on the
//! main thread: it picks, submits, then blocks until at least one result
//! arrives. All shared maps are touched only between waits. An interrupt
//! stops submission and lets the pool drain.

use std::collections::HashSet;
use std::sync::{mpsc, Arc, Mutex};

use crate::cli::output;
use crate::core::batch::Batch;
use crate::core::graph::Dependency;
use crate::core::nv::primary_new_version;
use crate::core::reason::display_reasons;
use crate::core::worker::{BuildFailure, BuildJob, BuildOutcome, BuildResult};
use crate::db::{PkgLogRow, PkgStatus};
use crate::infra::buildlog::BuildEvent;
use crate::infra::signals;

impl Batch {
    /// Run the batch to quiescence
    pub fn drive(&mut self) {
        let progress = output::create_batch_bar(self.build_reasons.len() as u64);

        let (job_tx, job_rx) = mpsc::channel::<BuildJob>();
        let (result_tx, result_rx) = mpsc::channel::<(String, BuildOutcome)>();
        let job_rx = Mutex::new(job_rx);
        let worker = Arc::clone(&self.worker);
        let pool_size = self.max_concurrency;

        std::thread::scope(|scope| {
            for worker_id in 0..pool_size {
                let job_rx = &job_rx;
                let result_tx = result_tx.clone();
                let worker = Arc::clone(&worker);
                scope.spawn(move || loop {
                    let job = match job_rx.lock().unwrap().recv() {
                        Ok(job) => job,
                        Err(_) => break,
                    };
                    let pkgbase = job.to_build.pkgbase.clone();
                    let outcome = worker.build(worker_id, &job);
                    if result_tx.send((pkgbase, outcome)).is_err() {
                        break;
                    }
                });
            }
            drop(result_tx);

            let mut running: HashSet<String> = HashSet::new();
            loop {
                let picks = if signals::interrupted() {
                    Vec::new()
                } else {
                    let limit = self.max_concurrency - running.len();
                    self.pick(limit, &running, running.is_empty())
                };
                let picked_any = !picks.is_empty();

                for to_build in picks {
                    let pkgbase = to_build.pkgbase.clone();
                    if !self.nvdata.contains_key(&pkgbase) {
                        // pulled in by a watcher but never version-checked
                        tracing::debug!("{pkgbase} has no version data, finishing it unbuilt");
                        self.mark_done(&pkgbase);
                        continue;
                    }
                    let job = self.make_job(to_build);
                    if let Some(db) = &self.db {
                        if let Err(e) = db.set_package_status(&pkgbase, PkgStatus::Building) {
                            tracing::warn!("Cannot update status of {pkgbase}: {e}");
                        }
                    }
                    self.attempted.insert(pkgbase.clone());
                    progress.set_message(pkgbase.clone());
                    if job_tx.send(job).is_err() {
                        tracing::error!("Worker pool went away, stopping submission");
                        break;
                    }
                    running.insert(pkgbase);
                }

                if running.is_empty() {
                    if picked_any {
                        // every pick resolved without a submission; there
                        // may be newly released work
                        continue;
                    }
                    break;
                }

                let (pkgbase, outcome) = match result_rx.recv() {
                    Ok(result) => result,
                    Err(_) => break,
                };
                running.remove(&pkgbase);
                self.handle_result(&pkgbase, outcome, &progress);
                while let Ok((pkgbase, outcome)) = result_rx.try_recv() {
                    running.remove(&pkgbase);
                    self.handle_result(&pkgbase, outcome, &progress);
                }
            }

            drop(job_tx);
        });

        progress.finish_and_clear();
    }

    /// Record one worker result; runs on the main thread
    fn handle_result(
        &mut self,
        pkgbase: &str,
        outcome: BuildOutcome,
        progress: &indicatif::ProgressBar,
    ) {
        let elapsed = outcome.elapsed.as_secs_f64();

        match &outcome.result {
            BuildResult::Successful | BuildResult::Staged => {
                self.built.insert(pkgbase.to_string());
                tracing::info!(
                    "{} {pkgbase} {} in {elapsed:.1}s",
                    output::status::SUCCESS,
                    outcome.result.class()
                );
            }
            BuildResult::Skipped(why) => {
                tracing::warn!("{pkgbase} skipped: {why}");
            }
            BuildResult::Failed(BuildFailure::MissingDependencies(deps)) => {
                self.failed.insert(pkgbase.to_string(), deps.clone());
                let all_failed_before = deps
                    .iter()
                    .all(|name| self.failed.contains_key(&Dependency::parse(name).pkgbase));
                let subject = if all_failed_before {
                    "dependencies failed previously"
                } else {
                    "dependencies failed in this batch"
                };
                self.reporter.error_report(
                    pkgbase,
                    &self.maintainers_of(pkgbase),
                    subject,
                    &format!("{pkgbase} could not install: {}", deps.join(", ")),
                );
            }
            BuildResult::Failed(BuildFailure::Error(error)) => {
                self.failed.insert(pkgbase.to_string(), Vec::new());
                let logfile = self.logdir.join(format!("{pkgbase}.log"));
                self.reporter.error_report(
                    pkgbase,
                    &self.maintainers_of(pkgbase),
                    "build failed",
                    &format!("{error}\n\nlog: {}", logfile.display()),
                );
            }
        }

        let nv_version = self
            .nvdata
            .get(pkgbase)
            .and_then(|rs| primary_new_version(rs))
            .map(String::from);
        let reasons = self.build_reasons.get(pkgbase).cloned().unwrap_or_default();
        if let Some(db) = &self.db {
            let row = PkgLogRow {
                pkgbase: pkgbase.to_string(),
                nv_version: nv_version.clone(),
                pkg_version: outcome.version.clone(),
                elapsed: outcome.elapsed,
                result: outcome.result.class().to_string(),
                cputime: outcome.rusage.map(|r| r.cputime),
                memory: outcome.rusage.map(|r| r.memory),
                msg: match &outcome.result {
                    BuildResult::Skipped(why) => Some(why.clone()),
                    BuildResult::Failed(BuildFailure::Error(error)) => Some(error.clone()),
                    _ => None,
                },
                build_reasons: serde_json::to_string(&reasons).unwrap_or_default(),
                maintainers: self.maintainers_of(pkgbase).join(", "),
            };
            if let Err(e) = db.log_build(&row) {
                tracing::warn!("Cannot record build of {pkgbase}: {e}");
            }
        }

        self.log_event(BuildEvent {
            event: outcome.result.class().to_string(),
            pkgbase: Some(pkgbase.to_string()),
            nv_version,
            pkg_version: outcome.version.clone(),
            elapsed: Some(elapsed),
            msg: Some(display_reasons(&reasons)),
        });

        self.mark_done(pkgbase);
        progress.inc(1);
    }
}
