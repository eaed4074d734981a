//! Dependency graph
//!
//! Consolidates managed-package dependencies into the build-order graph
//! used by the sorter, its reverse map used by the priority function, and
//! the reason pull-in for unsatisfied managed dependencies.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use crate::config::defaults::DEFAULT_PRIORITY;
use crate::core::pkginfo::LilacInfo;
use crate::core::reason::BuildReason;
use crate::core::report::Reporter;

/// A directed dependency edge target
///
/// `pkgbase` names the on-disk directory of the dependency; `pkgname` is
/// the binary package that must be resolvable for the edge to be
/// satisfied (one pkgbase may produce several).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dependency {
    /// Directory / source package of the dependency
    pub pkgbase: String,
    /// Binary package name
    pub pkgname: String,
}

impl Dependency {
    /// Parse a metadata entry: either "dir" or "dir/pkgname"
    pub fn parse(entry: &str) -> Self {
        match entry.split_once('/') {
            Some((dir, pkgname)) => Self {
                pkgbase: dir.to_string(),
                pkgname: pkgname.to_string(),
            },
            None => Self {
                pkgbase: entry.to_string(),
                pkgname: entry.to_string(),
            },
        }
    }
}

/// pkgbase -> dependencies it needs
pub type DepMap = HashMap<String, Vec<Dependency>>;

/// Decides whether a dependency is currently satisfied
pub trait DepResolver: Send + Sync {
    /// True if the dependency can be satisfied right now
    fn resolve(&self, dep: &Dependency) -> bool;
}

/// Resolves dependencies against built artifacts in the destination dir
#[derive(Debug)]
pub struct DestdirResolver {
    destdir: PathBuf,
}

impl DestdirResolver {
    /// Create a resolver answering from `destdir`
    pub fn new(destdir: PathBuf) -> Self {
        Self { destdir }
    }
}

impl DepResolver for DestdirResolver {
    fn resolve(&self, dep: &Dependency) -> bool {
        let prefix = format!("{}-", dep.pkgname);
        let Ok(entries) = std::fs::read_dir(&self.destdir) else {
            return false;
        };
        entries.flatten().any(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with(&prefix) && name.contains(".pkg.tar."))
                .unwrap_or(false)
        })
    }
}

/// Build the runtime and build-time dependency maps from package metadata
pub fn build_depmaps(infos: &HashMap<String, LilacInfo>) -> (DepMap, DepMap) {
    let parse = |entries: &[String]| -> Vec<Dependency> {
        let mut deps: Vec<Dependency> = entries.iter().map(|e| Dependency::parse(e)).collect();
        deps.sort();
        deps.dedup();
        deps
    };

    let mut depmap = DepMap::new();
    let mut build_depmap = DepMap::new();
    for (pkgbase, info) in infos {
        depmap.insert(pkgbase.clone(), parse(&info.repo_depends));
        build_depmap.insert(pkgbase.clone(), parse(&info.build_depends));
    }
    (depmap, build_depmap)
}

/// The per-batch build-order graph and its reverse
#[derive(Debug, Default)]
pub struct BuildGraph {
    /// pkgbase -> managed dependency pkgbases, for the topological sorter
    pub dep_building_map: HashMap<String, HashSet<String>>,
    /// dependency pkgbase -> pkgbases that need it
    pub revdepmap: HashMap<String, HashSet<String>>,
}

/// Build the batch graph from `depmap` restricted to reasoned packages.
///
/// Unsatisfied managed dependencies that did not fail last time are pulled
/// into the batch with a `Depended` reason; unsatisfied unmanaged
/// dependencies produce one error report per depending package and are
/// dropped from the graph.
pub fn build_graph<F>(
    depmap: &DepMap,
    infos: &HashMap<String, LilacInfo>,
    build_reasons: &mut HashMap<String, Vec<BuildReason>>,
    resolver: &dyn DepResolver,
    is_last_build_failed: F,
    reporter: &dyn Reporter,
) -> BuildGraph
where
    F: Fn(&str) -> bool,
{
    let mut graph = BuildGraph::default();
    let mut nonexistent: HashMap<String, Vec<String>> = HashMap::new();

    let mut queue: VecDeque<String> = build_reasons.keys().cloned().collect();
    let mut seen: HashSet<String> = queue.iter().cloned().collect();

    while let Some(pkgbase) = queue.pop_front() {
        let Some(deps) = depmap.get(&pkgbase) else {
            continue;
        };
        for dep in deps {
            let managed = infos.contains_key(&dep.pkgbase);
            let resolved = resolver.resolve(dep);

            if !resolved && !managed {
                tracing::warn!(
                    "{pkgbase} depends on unmanaged package {}, dropping the edge",
                    dep.pkgname
                );
                nonexistent
                    .entry(pkgbase.clone())
                    .or_default()
                    .push(dep.pkgname.clone());
                continue;
            }
            if !managed {
                continue;
            }

            if !resolved && !is_last_build_failed(&dep.pkgbase) {
                build_reasons
                    .entry(dep.pkgbase.clone())
                    .or_default()
                    .push(BuildReason::Depended {
                        depender: pkgbase.clone(),
                    });
                if seen.insert(dep.pkgbase.clone()) {
                    queue.push_back(dep.pkgbase.clone());
                }
            }

            graph
                .dep_building_map
                .entry(pkgbase.clone())
                .or_default()
                .insert(dep.pkgbase.clone());
        }
    }

    for (pkgbase, deps) in &graph.dep_building_map {
        for dep in deps {
            graph
                .revdepmap
                .entry(dep.clone())
                .or_default()
                .insert(pkgbase.clone());
        }
    }

    for (pkgbase, missing) in nonexistent {
        let maintainers = infos
            .get(&pkgbase)
            .map(|i| i.maintainers.clone())
            .unwrap_or_default();
        reporter.error_report(
            &pkgbase,
            &maintainers,
            "depends on nonexistent packages",
            &format!(
                "{pkgbase} depends on packages not managed by this repository: {}",
                missing.join(", ")
            ),
        );
    }

    graph
}

/// Effective scheduling priority of a package.
///
/// A package inherits urgency from everything transitively waiting on it:
/// the reasons of its whole reverse-dependency closure are pooled and the
/// smallest priority class wins.
pub fn building_priority(
    pkgbase: &str,
    revdepmap: &HashMap<String, HashSet<String>>,
    build_reasons: &HashMap<String, Vec<BuildReason>>,
) -> u32 {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(pkgbase);

    let mut best: Option<u32> = None;
    while let Some(current) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        if let Some(reasons) = build_reasons.get(current) {
            for reason in reasons {
                if let Some(class) = reason.priority_class() {
                    best = Some(best.map_or(class, |b| b.min(class)));
                }
            }
        }
        if let Some(rdeps) = revdepmap.get(current) {
            for rdep in rdeps {
                if !visited.contains(rdep.as_str()) {
                    queue.push_back(rdep);
                }
            }
        }
    }

    best.unwrap_or(DEFAULT_PRIORITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::MemoryReporter;

    struct NothingResolves;
    impl DepResolver for NothingResolves {
        fn resolve(&self, _dep: &Dependency) -> bool {
            false
        }
    }

    fn info(pkgbase: &str, repo_depends: &[&str]) -> LilacInfo {
        LilacInfo {
            pkgbase: pkgbase.to_string(),
            repo_depends: repo_depends.iter().map(|s| s.to_string()).collect(),
            managed: true,
            ..Default::default()
        }
    }

    fn infos(list: &[(&str, &[&str])]) -> HashMap<String, LilacInfo> {
        list.iter()
            .map(|(p, deps)| (p.to_string(), info(p, deps)))
            .collect()
    }

    #[test]
    fn test_dependency_parse() {
        assert_eq!(
            Dependency::parse("foo"),
            Dependency {
                pkgbase: "foo".to_string(),
                pkgname: "foo".to_string()
            }
        );
        assert_eq!(
            Dependency::parse("foo/foo-git"),
            Dependency {
                pkgbase: "foo".to_string(),
                pkgname: "foo-git".to_string()
            }
        );
    }

    #[test]
    fn test_unresolved_managed_dep_is_pulled_in() {
        let infos = infos(&[("app", &["lib"]), ("lib", &[])]);
        let (depmap, _) = build_depmaps(&infos);
        let mut reasons = HashMap::from([(
            "app".to_string(),
            vec![BuildReason::Cmdline { runner: None }],
        )]);
        let reporter = MemoryReporter::default();

        let graph = build_graph(
            &depmap,
            &infos,
            &mut reasons,
            &NothingResolves,
            |_| false,
            &reporter,
        );

        assert_eq!(
            reasons.get("lib").unwrap(),
            &vec![BuildReason::Depended {
                depender: "app".to_string()
            }]
        );
        assert!(graph.dep_building_map["app"].contains("lib"));
        assert!(graph.revdepmap["lib"].contains("app"));
        assert!(reporter.reports().is_empty());
    }

    #[test]
    fn test_last_failed_dep_is_not_pulled_in() {
        let infos = infos(&[("app", &["lib"]), ("lib", &[])]);
        let (depmap, _) = build_depmaps(&infos);
        let mut reasons = HashMap::from([(
            "app".to_string(),
            vec![BuildReason::Cmdline { runner: None }],
        )]);
        let reporter = MemoryReporter::default();

        let graph = build_graph(
            &depmap,
            &infos,
            &mut reasons,
            &NothingResolves,
            |p| p == "lib",
            &reporter,
        );

        assert!(!reasons.contains_key("lib"));
        // still ordered after lib in case lib shows up some other way
        assert!(graph.dep_building_map["app"].contains("lib"));
    }

    #[test]
    fn test_unmanaged_dep_reported_once() {
        let infos = infos(&[("app", &["ghost"])]);
        let (depmap, _) = build_depmaps(&infos);
        let mut reasons = HashMap::from([(
            "app".to_string(),
            vec![BuildReason::Cmdline { runner: None }],
        )]);
        let reporter = MemoryReporter::default();

        let graph = build_graph(
            &depmap,
            &infos,
            &mut reasons,
            &NothingResolves,
            |_| false,
            &reporter,
        );

        assert!(!reasons.contains_key("ghost"));
        assert!(graph.dep_building_map.get("app").is_none());
        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].pkgbase, "app");
    }

    #[test]
    fn test_transitive_pull_in() {
        let infos = infos(&[("c", &["b"]), ("b", &["a"]), ("a", &[])]);
        let (depmap, _) = build_depmaps(&infos);
        let mut reasons = HashMap::from([(
            "c".to_string(),
            vec![BuildReason::Cmdline { runner: None }],
        )]);
        let reporter = MemoryReporter::default();

        build_graph(
            &depmap,
            &infos,
            &mut reasons,
            &NothingResolves,
            |_| false,
            &reporter,
        );

        assert!(reasons.contains_key("b"));
        assert!(reasons.contains_key("a"));
    }

    #[test]
    fn test_building_priority_inherits_from_dependents() {
        // leaf <- mid <- top, top has pkgrel priority 0
        let revdepmap = HashMap::from([
            (
                "leaf".to_string(),
                HashSet::from(["mid".to_string()]),
            ),
            ("mid".to_string(), HashSet::from(["top".to_string()])),
        ]);
        let reasons = HashMap::from([
            ("top".to_string(), vec![BuildReason::UpdatedPkgrel]),
            (
                "mid".to_string(),
                vec![BuildReason::Depended {
                    depender: "top".to_string(),
                }],
            ),
            (
                "leaf".to_string(),
                vec![BuildReason::Depended {
                    depender: "mid".to_string(),
                }],
            ),
        ]);

        assert_eq!(building_priority("leaf", &revdepmap, &reasons), 0);
        assert_eq!(building_priority("top", &revdepmap, &reasons), 0);
    }

    #[test]
    fn test_building_priority_handles_cycles() {
        let revdepmap = HashMap::from([
            ("a".to_string(), HashSet::from(["b".to_string()])),
            ("b".to_string(), HashSet::from(["a".to_string()])),
        ]);
        let reasons = HashMap::from([(
            "a".to_string(),
            vec![BuildReason::Cmdline { runner: None }],
        )]);

        assert_eq!(building_priority("a", &revdepmap, &reasons), 3);
        assert_eq!(building_priority("b", &revdepmap, &reasons), 3);
    }

    #[test]
    fn test_building_priority_default() {
        assert_eq!(
            building_priority("alone", &HashMap::new(), &HashMap::new()),
            DEFAULT_PRIORITY
        );
    }
}
