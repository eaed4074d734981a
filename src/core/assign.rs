//! Reason assignment
//!
//! Merges version-change results, recipe changes, prior failures,
//! command-line targets and `update_on_build` triggers into the
//! per-package reason lists that define the batch.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::core::nv::NvData;
use crate::core::pkginfo::LilacInfo;
use crate::core::reason::BuildReason;
use crate::db::Database;

/// A command-line target: pkgbase plus an opaque runner tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdlineTarget {
    pub pkgbase: String,
    pub runner: Option<String>,
}

impl CmdlineTarget {
    /// Parse "pkgbase" or "pkgbase:runner"
    pub fn parse(arg: &str) -> Self {
        match arg.split_once(':') {
            Some((pkgbase, runner)) => Self {
                pkgbase: pkgbase.to_string(),
                runner: Some(runner.to_string()),
            },
            None => Self {
                pkgbase: arg.to_string(),
                runner: None,
            },
        }
    }
}

/// Everything the assignment pass reads
pub struct AssignInput<'a> {
    /// Managed package metadata
    pub infos: &'a HashMap<String, LilacInfo>,
    /// Version checker results
    pub nvdata: &'a NvData,
    /// Packages whose version check failed
    pub nv_unknown: &'a HashSet<String>,
    /// Packages whose recipe changed since the last batch
    pub recipe_changed: &'a HashSet<String>,
    /// Packages whose release counter changed since the last batch
    pub pkgrel_changed: &'a HashSet<String>,
    /// Failure records from the previous batch
    pub prior_failed: &'a HashMap<String, Vec<String>>,
    /// Command-line targets, empty for a full batch
    pub targets: &'a [CmdlineTarget],
    /// Packages under care this invocation
    pub care: &'a HashSet<String>,
    /// Optional database for throttle decisions
    pub db: Option<&'a dyn Database>,
    /// Reference time for throttle arithmetic
    pub now: DateTime<Utc>,
}

/// Run the assignment pass, producing the reasoned set
pub fn assign_reasons(input: &AssignInput<'_>) -> HashMap<String, Vec<BuildReason>> {
    let mut reasons: HashMap<String, Vec<BuildReason>> = HashMap::new();

    assign_version_changes(input, &mut reasons);
    assign_pkgrel_changes(input, &mut reasons);
    assign_updated_failed(input, &mut reasons);
    assign_cmdline(input, &mut reasons);
    assign_failed_by_deps(input, &mut reasons);
    assign_on_build_closure(input, &mut reasons);

    reasons
}

/// Rule: upstream version changes, minus throttled sources
fn assign_version_changes(
    input: &AssignInput<'_>,
    reasons: &mut HashMap<String, Vec<BuildReason>>,
) {
    let success_times = query_success_times(input);

    for pkgbase in input.care {
        let Some(results) = input.nvdata.get(pkgbase) else {
            continue;
        };
        let Some(info) = input.infos.get(pkgbase) else {
            continue;
        };
        let throttles = info.throttle_info();

        let mut items = Vec::new();
        let mut changes = Vec::new();
        for (idx, result) in results.iter().enumerate() {
            if !result.changed() {
                continue;
            }
            if let (Some(interval), Some(last_success)) =
                (throttles.get(&idx), success_times.get(pkgbase))
            {
                if input.now < *last_success + Duration::seconds(*interval) {
                    tracing::info!(
                        "Throttling {pkgbase} source {idx}: last success too recent"
                    );
                    continue;
                }
            }
            let source = info
                .update_on
                .get(idx)
                .map(|s| s.source.clone())
                .unwrap_or_else(|| result.source.clone());
            items.push((idx, source));
            changes.push((
                result.oldver.clone().unwrap_or_default(),
                result.newver.clone().unwrap_or_default(),
            ));
        }

        if !items.is_empty() {
            reasons
                .entry(pkgbase.clone())
                .or_default()
                .push(BuildReason::NvChecker { items, changes });
        }
    }
}

/// Throttle inputs exist only with a database; one query covers the batch
fn query_success_times(input: &AssignInput<'_>) -> HashMap<String, DateTime<Utc>> {
    let Some(db) = input.db else {
        return HashMap::new();
    };
    let throttled: Vec<String> = input
        .care
        .iter()
        .filter(|p| {
            input
                .infos
                .get(*p)
                .map(|i| !i.throttle_info().is_empty())
                .unwrap_or(false)
        })
        .cloned()
        .collect();
    if throttled.is_empty() {
        return HashMap::new();
    }
    match db.get_pkgs_last_success_times(&throttled) {
        Ok(times) => times.into_iter().collect(),
        Err(e) => {
            tracing::warn!("Failed to query last success times: {e}");
            HashMap::new()
        }
    }
}

/// Rule: release counter bumped, unless the version state is unknown
fn assign_pkgrel_changes(
    input: &AssignInput<'_>,
    reasons: &mut HashMap<String, Vec<BuildReason>>,
) {
    for pkgbase in input.pkgrel_changed {
        if !input.care.contains(pkgbase) || input.nv_unknown.contains(pkgbase) {
            continue;
        }
        reasons
            .entry(pkgbase.clone())
            .or_default()
            .push(BuildReason::UpdatedPkgrel);
    }
}

/// Rule: failed last time and the recipe has changed since
fn assign_updated_failed(
    input: &AssignInput<'_>,
    reasons: &mut HashMap<String, Vec<BuildReason>>,
) {
    for pkgbase in input.prior_failed.keys() {
        if !input.care.contains(pkgbase) || !input.recipe_changed.contains(pkgbase) {
            continue;
        }
        reasons
            .entry(pkgbase.clone())
            .or_default()
            .push(BuildReason::UpdatedFailed);
    }
}

/// Rule: explicit command-line targets
fn assign_cmdline(input: &AssignInput<'_>, reasons: &mut HashMap<String, Vec<BuildReason>>) {
    for target in input.targets {
        if !input.infos.contains_key(&target.pkgbase) {
            tracing::warn!("Ignoring unknown command-line target {}", target.pkgbase);
            continue;
        }
        reasons
            .entry(target.pkgbase.clone())
            .or_default()
            .push(BuildReason::Cmdline {
                runner: target.runner.clone(),
            });
    }
}

/// Rule: retry packages that failed on missing dependencies, full batches only
fn assign_failed_by_deps(
    input: &AssignInput<'_>,
    reasons: &mut HashMap<String, Vec<BuildReason>>,
) {
    if !input.targets.is_empty() {
        return;
    }
    for (pkgbase, missing) in input.prior_failed {
        if missing.is_empty() || !input.care.contains(pkgbase) {
            continue;
        }
        reasons
            .entry(pkgbase.clone())
            .or_default()
            .push(BuildReason::FailedByDeps {
                deps: missing.clone(),
            });
    }
}

/// Rule: `update_on_build` fan-out, to a fixed point
fn assign_on_build_closure(
    input: &AssignInput<'_>,
    reasons: &mut HashMap<String, Vec<BuildReason>>,
) {
    let mut if_this_then_those: HashMap<&str, Vec<&LilacInfo>> = HashMap::new();
    for info in input.infos.values() {
        for entry in &info.update_on_build {
            if_this_then_those
                .entry(entry.pkgbase.as_str())
                .or_default()
                .push(info);
        }
    }

    let mut queue: Vec<String> = reasons.keys().cloned().collect();
    queue.sort();
    while let Some(pkgbase) = queue.pop() {
        let Some(watchers) = if_this_then_those.get(pkgbase.as_str()) else {
            continue;
        };
        for watcher in watchers.iter() {
            if reasons.contains_key(&watcher.pkgbase) {
                continue;
            }
            reasons.insert(
                watcher.pkgbase.clone(),
                vec![BuildReason::OnBuild {
                    update_on_build: watcher
                        .update_on_build
                        .iter()
                        .map(|e| e.pkgbase.clone())
                        .collect(),
                }],
            );
            queue.push(watcher.pkgbase.clone());
        }
    }
}

/// Packages under care: everything managed for a full batch, otherwise the
/// targets plus their transitive runtime dependencies
pub fn care_set(
    infos: &HashMap<String, LilacInfo>,
    depmap: &crate::core::graph::DepMap,
    targets: &[CmdlineTarget],
) -> HashSet<String> {
    if targets.is_empty() {
        return infos.keys().cloned().collect();
    }

    let mut care = HashSet::new();
    let mut queue: Vec<String> = targets.iter().map(|t| t.pkgbase.clone()).collect();
    while let Some(pkgbase) = queue.pop() {
        if !infos.contains_key(&pkgbase) || !care.insert(pkgbase.clone()) {
            continue;
        }
        if let Some(deps) = depmap.get(&pkgbase) {
            for dep in deps {
                if !care.contains(&dep.pkgbase) {
                    queue.push(dep.pkgbase.clone());
                }
            }
        }
    }
    care
}
