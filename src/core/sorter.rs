//! Build ordering
//!
//! An incremental topological tracker over the batch graph. Packages
//! become ready once every dependency is finalized; packages that carry
//! no build reason were pulled into the graph for ordering only and are
//! finalized on sight. `done` is idempotent because the picker may
//! evaluate the same ready package in both the regular and the
//! starvation round.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::config::defaults::DEFAULT_PRIORITY;
use crate::core::graph::{building_priority, BuildGraph};
use crate::core::reason::BuildReason;

/// Topological readiness tracker with priority lookup
#[derive(Debug)]
pub struct BuildSorter {
    in_degree: HashMap<String, usize>,
    dependents: HashMap<String, Vec<String>>,
    newly_ready: VecDeque<String>,
    ready: Vec<String>,
    finalized: HashSet<String>,
    total: usize,
    has_reason: HashSet<String>,
    priorities: HashMap<String, u32>,
}

impl BuildSorter {
    /// Build the tracker from the batch graph and the reasoned set
    pub fn new(graph: &BuildGraph, build_reasons: &HashMap<String, Vec<BuildReason>>) -> Self {
        let mut nodes: HashSet<String> = build_reasons.keys().cloned().collect();
        for (pkgbase, deps) in &graph.dep_building_map {
            nodes.insert(pkgbase.clone());
            nodes.extend(deps.iter().cloned());
        }

        let mut in_degree: HashMap<String, usize> =
            nodes.iter().map(|n| (n.clone(), 0)).collect();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for (pkgbase, deps) in &graph.dep_building_map {
            for dep in deps {
                *in_degree.entry(pkgbase.clone()).or_insert(0) += 1;
                dependents.entry(dep.clone()).or_default().push(pkgbase.clone());
            }
        }
        for deps in dependents.values_mut() {
            deps.sort();
        }

        let mut seed: Vec<String> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(n, _)| n.clone())
            .collect();
        seed.sort();

        let priorities = nodes
            .iter()
            .map(|n| {
                (
                    n.clone(),
                    building_priority(n, &graph.revdepmap, build_reasons),
                )
            })
            .collect();

        Self {
            total: nodes.len(),
            in_degree,
            dependents,
            newly_ready: seed.into(),
            ready: Vec::new(),
            finalized: HashSet::new(),
            has_reason: build_reasons.keys().cloned().collect(),
            priorities,
        }
    }

    /// Whether any package is still in flight through the sorter
    pub fn is_active(&self) -> bool {
        self.finalized.len() < self.total
    }

    /// All currently ready packages, in a deterministic order.
    ///
    /// Packages without a build reason are finalized instead of emitted;
    /// finalizing them may release further packages, so the drain loops.
    pub fn get_ready(&mut self) -> Vec<String> {
        while let Some(pkgbase) = self.newly_ready.pop_front() {
            if self.has_reason.contains(&pkgbase) {
                self.ready.push(pkgbase);
            } else {
                self.finalize(&pkgbase);
            }
        }
        self.ready.clone()
    }

    /// Mark a ready package as finished; unknown or repeated packages are
    /// silently ignored
    pub fn done(&mut self, pkgbase: &str) {
        let Some(pos) = self.ready.iter().position(|p| p == pkgbase) else {
            return;
        };
        self.ready.remove(pos);
        self.finalize(pkgbase);
    }

    /// Effective priority of a package, lower is sooner
    pub fn priority_of(&self, pkgbase: &str) -> u32 {
        self.priorities
            .get(pkgbase)
            .copied()
            .unwrap_or(DEFAULT_PRIORITY)
    }

    fn finalize(&mut self, pkgbase: &str) {
        if !self.finalized.insert(pkgbase.to_string()) {
            return;
        }
        let mut released = Vec::new();
        let dependents = self.dependents.get(pkgbase).cloned().unwrap_or_default();
        for dependent in dependents {
            if let Some(degree) = self.in_degree.get_mut(&dependent) {
                *degree -= 1;
                if *degree == 0 {
                    released.push(dependent);
                }
            }
        }
        released.sort();
        self.newly_ready.extend(released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::BuildGraph;

    fn graph(edges: &[(&str, &[&str])]) -> BuildGraph {
        let mut g = BuildGraph::default();
        for (pkgbase, deps) in edges {
            let set: HashSet<String> = deps.iter().map(|d| d.to_string()).collect();
            for dep in &set {
                g.revdepmap
                    .entry(dep.clone())
                    .or_default()
                    .insert(pkgbase.to_string());
            }
            g.dep_building_map.insert(pkgbase.to_string(), set);
        }
        g
    }

    fn reasons(pkgs: &[&str]) -> HashMap<String, Vec<BuildReason>> {
        pkgs.iter()
            .map(|p| (p.to_string(), vec![BuildReason::Cmdline { runner: None }]))
            .collect()
    }

    #[test]
    fn test_linear_chain_order() {
        let g = graph(&[("b", &["a"]), ("c", &["b"])]);
        let rs = reasons(&["a", "b", "c"]);
        let mut sorter = BuildSorter::new(&g, &rs);

        assert_eq!(sorter.get_ready(), vec!["a"]);
        sorter.done("a");
        assert_eq!(sorter.get_ready(), vec!["b"]);
        sorter.done("b");
        assert_eq!(sorter.get_ready(), vec!["c"]);
        sorter.done("c");
        assert!(sorter.get_ready().is_empty());
        assert!(!sorter.is_active());
    }

    #[test]
    fn test_filter_on_emit_auto_done() {
        // "lib" is in the graph for ordering only; it has no reason, so
        // its dependent becomes ready immediately.
        let g = graph(&[("app", &["lib"])]);
        let rs = reasons(&["app"]);
        let mut sorter = BuildSorter::new(&g, &rs);

        assert_eq!(sorter.get_ready(), vec!["app"]);
        sorter.done("app");
        assert!(!sorter.is_active());
    }

    #[test]
    fn test_done_is_idempotent() {
        let g = graph(&[("b", &["a"])]);
        let rs = reasons(&["a", "b"]);
        let mut sorter = BuildSorter::new(&g, &rs);

        sorter.get_ready();
        sorter.done("a");
        sorter.done("a");
        sorter.done("never-heard-of-it");
        assert_eq!(sorter.get_ready(), vec!["b"]);
    }

    #[test]
    fn test_diamond_releases_both_sides() {
        let g = graph(&[("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);
        let rs = reasons(&["a", "b", "c", "d"]);
        let mut sorter = BuildSorter::new(&g, &rs);

        assert_eq!(sorter.get_ready(), vec!["a"]);
        sorter.done("a");
        assert_eq!(sorter.get_ready(), vec!["b", "c"]);
        sorter.done("b");
        assert_eq!(sorter.get_ready(), vec!["c"]);
        sorter.done("c");
        assert_eq!(sorter.get_ready(), vec!["d"]);
        sorter.done("d");
        assert!(!sorter.is_active());
    }

    #[test]
    fn test_cycle_never_becomes_ready() {
        let g = graph(&[("a", &["b"]), ("b", &["a"])]);
        let rs = reasons(&["a", "b"]);
        let mut sorter = BuildSorter::new(&g, &rs);

        assert!(sorter.get_ready().is_empty());
        assert!(sorter.is_active());
    }

    #[test]
    fn test_priority_of_unknown_package() {
        let g = graph(&[]);
        let rs = reasons(&[]);
        let sorter = BuildSorter::new(&g, &rs);
        assert_eq!(sorter.priority_of("nope"), DEFAULT_PRIORITY);
    }
}
