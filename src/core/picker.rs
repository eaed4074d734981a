//! Admission picking
//!
//! Each time the driver has capacity it asks for up to `limit` ready
//! packages. Selection honors priority first, then historical CPU
//! intensity, then two live resource constraints: memory-heavy packages
//! are deferred while lighter ones fit, and an idle CPU promotes one
//! likely-big job to the front of its priority tier. When memory alone
//! would stall an otherwise idle scheduler, a single package is admitted
//! regardless so the batch always moves.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::config::defaults::{
    DEFAULT_CPU_INTENSITY, DEFAULT_MEMORY_BUDGET, PROMOTION_TIER_THRESHOLD,
};
use crate::core::batch::Batch;
use crate::core::graph::Dependency;
use crate::core::reason::BuildReason;
use crate::core::worker::PkgToBuild;
use crate::db::RusageRecord;

impl Batch {
    /// Pick up to `limit` packages to submit now
    pub fn pick(
        &mut self,
        limit: usize,
        running: &HashSet<String>,
        starving: bool,
    ) -> Vec<PkgToBuild> {
        if limit == 0 || !self.sorter.is_active() {
            return Vec::new();
        }
        let ready: Vec<String> = self
            .sorter
            .get_ready()
            .into_iter()
            .filter(|pkgbase| !running.contains(pkgbase))
            .collect();
        if ready.is_empty() {
            return Vec::new();
        }

        let rusages = self.last_rusages(&ready);

        let mut order = ready;
        order.sort_by(|a, b| {
            self.sorter.priority_of(a).cmp(&self.sorter.priority_of(b)).then_with(|| {
                cpu_intensity(&rusages, a)
                    .partial_cmp(&cpu_intensity(&rusages, b))
                    .unwrap_or(Ordering::Equal)
            })
        });

        let cpu_ratio = self.resources.cpu_ratio();
        if cpu_ratio < 1.0 {
            promote_big_package(&mut order, |pkgbase| self.sorter.priority_of(pkgbase));
        }

        let mut memory_avail = self.resources.memory_available();
        let mut picks = Vec::new();
        let mut limited_by_memory = false;
        for pkgbase in &order {
            if picks.len() >= limit {
                break;
            }
            if let Some(rusage) = rusages.get(pkgbase) {
                if rusage.memory > memory_avail {
                    tracing::debug!(
                        "Deferring {pkgbase}: needs {} bytes, {memory_avail} available",
                        rusage.memory
                    );
                    limited_by_memory = true;
                    continue;
                }
            }
            let Some(to_build) = self.check_buildability(pkgbase) else {
                continue;
            };
            memory_avail = memory_avail.saturating_sub(
                rusages
                    .get(pkgbase)
                    .map(|r| r.memory)
                    .unwrap_or(DEFAULT_MEMORY_BUDGET),
            );
            picks.push(to_build);
        }

        // Nothing fits and nothing runs: admit the smallest buildable
        // package regardless of memory so the batch keeps moving.
        if picks.is_empty() && limited_by_memory && starving {
            order.sort_by_key(|pkgbase| {
                (
                    self.sorter.priority_of(pkgbase),
                    rusages
                        .get(pkgbase)
                        .map(|r| r.memory)
                        .unwrap_or(DEFAULT_MEMORY_BUDGET),
                )
            });
            for pkgbase in &order {
                if !self.sorter.get_ready().contains(pkgbase) {
                    continue;
                }
                if let Some(to_build) = self.check_buildability(pkgbase) {
                    tracing::info!("Starvation pick: {pkgbase} ignores the memory cap");
                    return vec![to_build];
                }
            }
        }

        picks
    }

    fn last_rusages(&self, ready: &[String]) -> HashMap<String, RusageRecord> {
        let Some(db) = &self.db else {
            return HashMap::new();
        };
        match db.get_pkgs_last_rusage(ready) {
            Ok(rusages) => rusages,
            Err(e) => {
                tracing::warn!("Cannot fetch resource history: {e}");
                HashMap::new()
            }
        }
    }

    /// Decide whether a ready package is still worth building now.
    ///
    /// Packages already failed, retries whose missing dependencies are
    /// still missing, and `update_on_build`-only packages whose watched
    /// versions did not move are finalized without a worker.
    pub fn check_buildability(&mut self, pkgbase: &str) -> Option<PkgToBuild> {
        if self.failed.contains_key(pkgbase) {
            self.mark_done(pkgbase);
            return None;
        }

        let mut to_build = PkgToBuild::new(pkgbase);
        let reasons = self.build_reasons.get(pkgbase).cloned().unwrap_or_default();

        if let [BuildReason::FailedByDeps { deps }] = reasons.as_slice() {
            let still_missing: Vec<&String> = deps
                .iter()
                .filter(|name| !self.resolver.resolve(&Dependency::parse(name)))
                .collect();
            if !still_missing.is_empty() {
                tracing::info!(
                    "{pkgbase} still misses {}; not retrying",
                    still_missing
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                self.mark_done(pkgbase);
                return None;
            }
        }

        if let Some(db) = self.db.clone() {
            if let [BuildReason::OnBuild { update_on_build }] = reasons.as_slice() {
                if update_on_build
                    .iter()
                    .any(|watched| self.failed.contains_key(watched))
                {
                    self.mark_done(pkgbase);
                    return None;
                }
                match db.get_update_on_build_vers(update_on_build) {
                    Ok(vers) => {
                        if vers.iter().all(|(old, new)| old == new) {
                            tracing::info!("{pkgbase}: watched packages unchanged, not rebuilding");
                            self.mark_done(pkgbase);
                            return None;
                        }
                        to_build.on_build_vers = vers;
                    }
                    Err(e) => {
                        self.reporter.error_report(
                            pkgbase,
                            &self.maintainers_of(pkgbase),
                            "update_on_build evaluation failed",
                            &e.to_string(),
                        );
                        return None;
                    }
                }
            } else {
                // Version context for the worker even when the rebuild was
                // triggered by something else.
                let watched: Vec<String> = self
                    .infos
                    .get(pkgbase)
                    .map(|info| {
                        info.update_on_build
                            .iter()
                            .map(|e| e.pkgbase.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                if !watched.is_empty() {
                    match db.get_update_on_build_vers(&watched) {
                        Ok(vers) => {
                            to_build.on_build_vers = vers
                                .into_iter()
                                .map(|(_, new)| (new.clone(), new))
                                .collect();
                        }
                        Err(e) => {
                            self.reporter.error_report(
                                pkgbase,
                                &self.maintainers_of(pkgbase),
                                "update_on_build evaluation failed",
                                &e.to_string(),
                            );
                            return None;
                        }
                    }
                }
            }
        }

        Some(to_build)
    }
}

fn cpu_intensity(rusages: &HashMap<String, RusageRecord>, pkgbase: &str) -> f64 {
    rusages
        .get(pkgbase)
        .map(|r| r.cpu_intensity())
        .unwrap_or(DEFAULT_CPU_INTENSITY)
}

/// With CPU to spare, move the head tier's last entry to the front.
///
/// The list is sorted ascending by CPU intensity within a tier, so the
/// tier's last entry is the likely-biggest job; starting it early keeps
/// the tail of the batch short. Tiny tiers are left alone.
fn promote_big_package<F>(order: &mut Vec<String>, priority_of: F)
where
    F: Fn(&str) -> u32,
{
    let Some(head) = order.first() else {
        return;
    };
    let head_priority = priority_of(head);
    let tier_len = order
        .iter()
        .take_while(|pkgbase| priority_of(pkgbase) == head_priority)
        .count();
    if tier_len > PROMOTION_TIER_THRESHOLD {
        let promoted = order.remove(tier_len - 1);
        order.insert(0, promoted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promote_big_package_needs_a_big_tier() {
        let mut order: Vec<String> = ["p1", "p2", "p3"].iter().map(|s| s.to_string()).collect();
        promote_big_package(&mut order, |_| 3);
        assert_eq!(order, vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn test_promote_big_package_moves_tier_tail() {
        let mut order: Vec<String> = ["p1", "p2", "p3", "p4", "p5"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        promote_big_package(&mut order, |_| 3);
        assert_eq!(order, vec!["p5", "p1", "p2", "p3", "p4"]);
    }

    #[test]
    fn test_promote_big_package_respects_tier_boundary() {
        // Head tier is only p1..p4 at priority 0; p5 is lower priority.
        let mut order: Vec<String> = ["p1", "p2", "p3", "p4", "p5"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        promote_big_package(&mut order, |p| if p == "p5" { 3 } else { 0 });
        assert_eq!(order, vec!["p4", "p1", "p2", "p3", "p5"]);
    }
}
