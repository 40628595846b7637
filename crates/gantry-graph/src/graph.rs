//! Dependency graph construction and cycle detection

use crate::{GraphError, Result};
use gantry_manifest::Package;
use semver::VersionReq;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// An internal dependency edge, annotated with the satisfied range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    /// The package declaring the dependency
    pub dependent: String,
    /// The workspace package satisfying it
    pub dependency: String,
    /// The declared range expression
    pub range: String,
}

/// Resolved workspace dependency graph
///
/// Nodes are workspace packages; edges are declared dependency ranges that a
/// same-named workspace package satisfies. Declared dependencies with no
/// name match in the workspace are external and carry no edge. Immutable
/// after construction.
#[derive(Debug, Clone)]
pub struct PackageGraph {
    packages: BTreeMap<String, Package>,
    /// Internal dependencies per package, in name order
    dependencies: BTreeMap<String, Vec<String>>,
    /// Reverse adjacency: package -> packages depending on it, in name order
    dependents: BTreeMap<String, Vec<String>>,
    edges: Vec<DependencyEdge>,
}

impl PackageGraph {
    /// Resolve the graph from a set of workspace packages
    ///
    /// Fails with [`GraphError::UnsatisfiedRange`] when a declared range has
    /// a name match whose version does not satisfy it, and with
    /// [`GraphError::Cycle`] when the resolved edges form a cycle.
    pub fn build(packages: BTreeMap<String, Package>) -> Result<Self> {
        let mut dependencies: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut edges = Vec::new();

        for name in packages.keys() {
            dependencies.entry(name.clone()).or_default();
            dependents.entry(name.clone()).or_default();
        }

        // BTreeMap iteration keeps package and dependency order stable by
        // name, so error reporting and scheduling order are reproducible.
        for (name, package) in &packages {
            for (dep_name, range) in &package.dependencies {
                let Some(dep_package) = packages.get(dep_name) else {
                    // No name match in the workspace: external dependency,
                    // assumed to come from a registry. Not an edge.
                    continue;
                };

                let req = VersionReq::parse(range).map_err(|e| GraphError::InvalidRange {
                    package: name.clone(),
                    dependency: dep_name.clone(),
                    range: range.clone(),
                    source: e,
                })?;

                if !req.matches(&dep_package.version) {
                    return Err(GraphError::UnsatisfiedRange {
                        dependent: name.clone(),
                        dependency: dep_name.clone(),
                        range: range.clone(),
                        found: dep_package.version.clone(),
                    });
                }

                dependencies
                    .get_mut(name)
                    .expect("node pre-inserted")
                    .push(dep_name.clone());
                dependents
                    .get_mut(dep_name)
                    .expect("node pre-inserted")
                    .push(name.clone());
                edges.push(DependencyEdge {
                    dependent: name.clone(),
                    dependency: dep_name.clone(),
                    range: range.clone(),
                });
            }
        }

        let graph = Self {
            packages,
            dependencies,
            dependents,
            edges,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Get a package by name
    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    /// All packages, keyed by name
    pub fn packages(&self) -> &BTreeMap<String, Package> {
        &self.packages
    }

    /// All package names, in order
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.packages.keys()
    }

    /// Internal dependencies of a package, in name order
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.dependencies.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Packages that directly depend on `name`, in name order
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All resolved internal edges
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Number of packages in the graph
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether the graph has no packages
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Compute a topological order (dependencies first) over a subset of the
    /// graph, ties broken by package name.
    ///
    /// Kahn's algorithm with a sorted ready set so repeated runs on the same
    /// input produce the same sequence.
    pub fn topological_order(&self, subset: &BTreeSet<String>) -> Vec<String> {
        let mut remaining: BTreeMap<&str, usize> = subset
            .iter()
            .map(|name| {
                let degree = self
                    .dependencies_of(name)
                    .iter()
                    .filter(|dep| subset.contains(*dep))
                    .count();
                (name.as_str(), degree)
            })
            .collect();

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut order = Vec::with_capacity(subset.len());
        while let Some(name) = ready.iter().next().copied() {
            ready.remove(name);
            remaining.remove(name);
            order.push(name.to_string());

            for dependent in self.dependents_of(name) {
                if let Some(degree) = remaining.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }

        order
    }

    /// Cycle detection: DFS with three-color marking
    ///
    /// Unvisited/in-progress/done; a back-edge to an in-progress node is a
    /// cycle, reported with the full node path.
    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        fn visit(
            graph: &PackageGraph,
            name: &str,
            marks: &mut BTreeMap<String, Mark>,
            path: &mut Vec<String>,
        ) -> Result<()> {
            match marks.get(name).copied().unwrap_or(Mark::Unvisited) {
                Mark::Done => return Ok(()),
                Mark::InProgress => {
                    // Close the cycle: trim the path to where it re-enters
                    let start = path.iter().position(|n| n == name).unwrap_or(0);
                    let mut cycle: Vec<&str> = path[start..].iter().map(String::as_str).collect();
                    cycle.push(name);
                    return Err(GraphError::Cycle {
                        path: cycle.join(" -> "),
                    });
                }
                Mark::Unvisited => {}
            }

            marks.insert(name.to_string(), Mark::InProgress);
            path.push(name.to_string());

            for dep in graph.dependencies_of(name) {
                visit(graph, dep, marks, path)?;
            }

            path.pop();
            marks.insert(name.to_string(), Mark::Done);
            Ok(())
        }

        let mut marks = BTreeMap::new();
        let mut path = Vec::new();
        for name in self.packages.keys() {
            visit(self, name, &mut marks, &mut path)?;
        }
        Ok(())
    }

    /// Reverse reachability: every package with a dependency path to a seed,
    /// seeds included. Worklist over the dependents adjacency, O(V+E).
    pub(crate) fn reachable_dependents(&self, seeds: &BTreeSet<String>) -> BTreeSet<String> {
        let mut reached: BTreeSet<String> = seeds
            .iter()
            .filter(|name| self.packages.contains_key(*name))
            .cloned()
            .collect();
        let mut queue: VecDeque<String> = reached.iter().cloned().collect();

        while let Some(name) = queue.pop_front() {
            for dependent in self.dependents_of(&name) {
                if reached.insert(dependent.clone()) {
                    queue.push_back(dependent.clone());
                }
            }
        }

        reached
    }

    /// Forward reachability: every package a seed transitively depends on,
    /// seeds included.
    pub(crate) fn reachable_dependencies(&self, seeds: &BTreeSet<String>) -> BTreeSet<String> {
        let mut reached: BTreeSet<String> = seeds.clone();
        let mut queue: VecDeque<String> = seeds.iter().cloned().collect();

        while let Some(name) = queue.pop_front() {
            for dep in self.dependencies_of(&name) {
                if reached.insert(dep.clone()) {
                    queue.push_back(dep.clone());
                }
            }
        }

        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;
    use std::path::PathBuf;

    fn make_package(name: &str, version: &str, deps: &[(&str, &str)]) -> Package {
        Package {
            name: name.to_string(),
            version: Version::parse(version).unwrap(),
            dir: PathBuf::from(name),
            dependencies: deps
                .iter()
                .map(|(n, r)| (n.to_string(), r.to_string()))
                .collect(),
            scripts: BTreeMap::new(),
        }
    }

    fn make_graph(packages: Vec<Package>) -> Result<PackageGraph> {
        PackageGraph::build(packages.into_iter().map(|p| (p.name.clone(), p)).collect())
    }

    #[test]
    fn test_empty_graph() {
        let graph = make_graph(vec![]).unwrap();
        assert!(graph.is_empty());
        assert_eq!(graph.edges().len(), 0);
    }

    #[test]
    fn test_internal_edge_per_satisfiable_declaration() {
        let graph = make_graph(vec![
            make_package("a", "1.0.0", &[("b", "^2.0.0")]),
            make_package("b", "2.3.1", &[]),
        ])
        .unwrap();

        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.dependencies_of("a"), &["b".to_string()]);
        assert_eq!(graph.dependents_of("b"), &["a".to_string()]);
        assert_eq!(graph.edges()[0].range, "^2.0.0");
    }

    #[test]
    fn test_external_dependency_is_not_an_edge() {
        let graph = make_graph(vec![make_package(
            "a",
            "1.0.0",
            &[("left-pad", "^1.3.0")],
        )])
        .unwrap();

        assert_eq!(graph.edges().len(), 0);
        assert!(graph.dependencies_of("a").is_empty());
    }

    #[test]
    fn test_unsatisfied_range_is_fatal() {
        let err = make_graph(vec![
            make_package("a", "1.0.0", &[("b", "^2.0.0")]),
            make_package("b", "1.9.0", &[]),
        ])
        .unwrap_err();

        match err {
            GraphError::UnsatisfiedRange {
                dependent,
                dependency,
                range,
                found,
            } => {
                assert_eq!(dependent, "a");
                assert_eq!(dependency, "b");
                assert_eq!(range, "^2.0.0");
                assert_eq!(found, Version::new(1, 9, 0));
            }
            other => panic!("expected UnsatisfiedRange, got {other:?}"),
        }
    }

    #[test]
    fn test_tilde_range() {
        let graph = make_graph(vec![
            make_package("a", "1.0.0", &[("b", "~1.2.0")]),
            make_package("b", "1.2.9", &[]),
        ])
        .unwrap();
        assert_eq!(graph.edges().len(), 1);

        let err = make_graph(vec![
            make_package("a", "1.0.0", &[("b", "~1.2.0")]),
            make_package("b", "1.3.0", &[]),
        ])
        .unwrap_err();
        assert!(matches!(err, GraphError::UnsatisfiedRange { .. }));
    }

    #[test]
    fn test_comparator_range() {
        let graph = make_graph(vec![
            make_package("a", "1.0.0", &[("b", ">=2.0.0, <3.0.0")]),
            make_package("b", "2.5.0", &[]),
        ])
        .unwrap();
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn test_invalid_range_reports_declaring_package() {
        let err = make_graph(vec![
            make_package("a", "1.0.0", &[("b", "not a range")]),
            make_package("b", "1.0.0", &[]),
        ])
        .unwrap_err();

        match err {
            GraphError::InvalidRange { package, dependency, .. } => {
                assert_eq!(package, "a");
                assert_eq!(dependency, "b");
            }
            other => panic!("expected InvalidRange, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_reports_full_path() {
        let err = make_graph(vec![
            make_package("a", "1.0.0", &[("b", "^1.0.0")]),
            make_package("b", "1.0.0", &[("c", "^1.0.0")]),
            make_package("c", "1.0.0", &[("a", "^1.0.0")]),
        ])
        .unwrap_err();

        match err {
            GraphError::Cycle { path } => {
                assert_eq!(path, "a -> b -> c -> a");
            }
            other => panic!("expected Cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_cycle() {
        let err = make_graph(vec![make_package("a", "1.0.0", &[("a", "^1.0.0")])]).unwrap_err();
        match err {
            GraphError::Cycle { path } => assert_eq!(path, "a -> a"),
            other => panic!("expected Cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_topological_order_diamond() {
        let graph = make_graph(vec![
            make_package("root", "1.0.0", &[("left", "^1.0.0"), ("right", "^1.0.0")]),
            make_package("left", "1.0.0", &[("bottom", "^1.0.0")]),
            make_package("right", "1.0.0", &[("bottom", "^1.0.0")]),
            make_package("bottom", "1.0.0", &[]),
        ])
        .unwrap();

        let all: BTreeSet<String> = graph.names().cloned().collect();
        let order = graph.topological_order(&all);
        // bottom first, root last, left before right (name tie-break)
        assert_eq!(order, vec!["bottom", "left", "right", "root"]);
    }

    #[test]
    fn test_topological_order_subset_ignores_outside_edges() {
        let graph = make_graph(vec![
            make_package("a", "1.0.0", &[("b", "^1.0.0")]),
            make_package("b", "1.0.0", &[("c", "^1.0.0")]),
            make_package("c", "1.0.0", &[]),
        ])
        .unwrap();

        // Subset {a, b}: b's dependency on c is outside the subset and must
        // not block it.
        let subset: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let order = graph.topological_order(&subset);
        assert_eq!(order, vec!["b", "a"]);
    }
}
